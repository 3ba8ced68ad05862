//! Registry of embedded instances, driven from the owner thread.
//!
//! The host hands out [`InstanceId`]s, runs window lookups on background
//! threads, and applies every marshaled [`Command`] when the shell pumps it.

use std::{
    collections::BTreeMap,
    fmt,
    sync::Arc,
    thread,
};

use log::{debug, error, info, warn};

use crate::app_spec::ApplicationSpec;
use crate::dispatch::{Command, CommandQueue};
use crate::error::EmbedError;
use crate::lifecycle::{EmbeddedInstance, LifecycleContext, LifecycleState};
use crate::locator::WindowLocator;
use crate::platform::{ScreenPoint, SurfaceHandle, WindowHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// A new instance is waiting for its window.
    Started(InstanceId),
    /// The catalog entry forbids multiple instances and this one is live.
    AlreadyRunning(InstanceId),
}

pub struct EmbeddingHost {
    ctx: LifecycleContext,
    instances: BTreeMap<InstanceId, EmbeddedInstance>,
    next_id: u64,
}

impl EmbeddingHost {
    pub fn new(ctx: LifecycleContext) -> Self {
        Self { ctx, instances: BTreeMap::new(), next_id: 1 }
    }

    pub fn queue(&self) -> &CommandQueue {
        &self.ctx.queue
    }

    fn allocate_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn instance(&self, id: InstanceId) -> Option<&EmbeddedInstance> {
        self.instances.get(&id)
    }

    pub fn ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    fn running_instance_of(&self, spec: &ApplicationSpec) -> Option<InstanceId> {
        self.instances
            .values()
            .filter(|i| i.is_live())
            .find(|i| i.spec().is_some_and(|s| s.same_target(spec)))
            .map(EmbeddedInstance::id)
    }

    /// Spawns the process and looks for its window on a background thread;
    /// the result is applied by a later [`pump`](Self::pump).
    pub fn launch(
        &mut self,
        spec: Arc<ApplicationSpec>,
        container: SurfaceHandle,
    ) -> Result<LaunchOutcome, EmbedError> {
        if !spec.allow_multiple {
            if let Some(existing) = self.running_instance_of(&spec) {
                info!("[Host] '{}' already running as {}", spec.name, existing);
                return Ok(LaunchOutcome::AlreadyRunning(existing));
            }
        }
        let id = self.allocate_id();
        let path = spec.path.clone();
        let mut instance = EmbeddedInstance::new(id, spec, container, self.ctx.clone());
        let mut process = match instance.begin_launch() {
            Ok(p) => p,
            Err(e) => {
                instance.discard();
                return Err(e);
            }
        };

        let sys = self.ctx.sys.clone();
        let queue = self.ctx.queue.clone();
        let criteria = instance.locate_criteria(process.id());
        let timeout = instance.max_load_time();
        let cancel = instance.locate_cancel_flag();
        let poll = self.ctx.options.poll_interval;
        self.instances.insert(id, instance);

        let spawned = thread::Builder::new()
            .name(format!("locate-{}", id))
            .spawn(move || {
                let result = WindowLocator::new(sys.as_ref())
                    .with_poll_interval(poll)
                    .with_cancel(cancel)
                    .locate(criteria, timeout, Some(process.as_mut()));
                queue.post(Command::WindowLocated { id, result, process });
            });
        if let Err(source) = spawned {
            error!("[Host] Could not start window lookup for {}: {}", id, source);
            if let Some(mut instance) = self.instances.remove(&id) {
                instance.discard();
            }
            return Err(EmbedError::LaunchFailure { path, source });
        }
        Ok(LaunchOutcome::Started(id))
    }

    /// Launches and embeds on the calling thread, blocking for up to the
    /// spec's max load time.
    pub fn launch_blocking(
        &mut self,
        spec: Arc<ApplicationSpec>,
        container: SurfaceHandle,
    ) -> Result<LaunchOutcome, EmbedError> {
        if !spec.allow_multiple {
            if let Some(existing) = self.running_instance_of(&spec) {
                return Ok(LaunchOutcome::AlreadyRunning(existing));
            }
        }
        let id = self.allocate_id();
        let mut instance = EmbeddedInstance::new(id, spec, container, self.ctx.clone());
        match instance.start() {
            Ok(()) => {
                self.instances.insert(id, instance);
                Ok(LaunchOutcome::Started(id))
            }
            Err(e) => {
                instance.discard();
                Err(e)
            }
        }
    }

    /// Embeds a window the host did not start.
    pub fn attach(
        &mut self,
        window: WindowHandle,
        container: SurfaceHandle,
    ) -> Result<InstanceId, EmbedError> {
        if let Some(existing) = self.instances.values().find(|i| i.window() == Some(window)) {
            warn!("[Host] Window {} is already embedded as {}", window, existing.id());
            return Ok(existing.id());
        }
        let id = self.allocate_id();
        let instance = EmbeddedInstance::attach(id, window, container, self.ctx.clone())?;
        self.instances.insert(id, instance);
        Ok(id)
    }

    /// Drag-select: embeds the top-level window under `point`. Windows in
    /// `exclude` (the shell's own) are never picked.
    pub fn attach_at_point(
        &mut self,
        point: ScreenPoint,
        container: SurfaceHandle,
        exclude: &[WindowHandle],
    ) -> Result<Option<InstanceId>, EmbedError> {
        let Some(window) = self.ctx.sys.root_window_at(point) else {
            debug!("[Host] No window at {:?}", point);
            return Ok(None);
        };
        if exclude.contains(&window) {
            debug!("[Host] Ignoring own window {} at {:?}", window, point);
            return Ok(None);
        }
        self.attach(window, container).map(Some)
    }

    fn instance_mut(&mut self, id: InstanceId) -> Result<&mut EmbeddedInstance, EmbedError> {
        self.instances.get_mut(&id).ok_or(EmbedError::UnknownInstance(id))
    }

    /// The container of `id` may have changed size (layout pass, tab switch).
    pub fn request_resize(&self, id: InstanceId) -> Result<bool, EmbedError> {
        self.instances
            .get(&id)
            .map(EmbeddedInstance::request_resize)
            .ok_or(EmbedError::UnknownInstance(id))
    }

    /// A rejected detach (wrong state) leaves the instance registered.
    pub fn detach(&mut self, id: InstanceId) -> Result<(), EmbedError> {
        let result = self.instance_mut(id)?.detach();
        self.forget_disposed(id);
        result
    }

    pub fn close(&mut self, id: InstanceId) -> Result<(), EmbedError> {
        let result = self.instance_mut(id)?.close();
        self.forget_disposed(id);
        result
    }

    fn forget_disposed(&mut self, id: InstanceId) {
        if self.instances.get(&id).is_some_and(|i| i.state() == LifecycleState::Disposed) {
            self.instances.remove(&id);
        }
    }

    pub fn dispose(&mut self, id: InstanceId) -> Result<(), EmbedError> {
        let mut instance = self.instances.remove(&id).ok_or(EmbedError::UnknownInstance(id))?;
        instance.dispose();
        Ok(())
    }

    /// Applies every queued command on the calling (owner) thread. Failures
    /// of background launches are returned so the shell can report them.
    pub fn pump(&mut self) -> Vec<(InstanceId, EmbedError)> {
        let mut failures = Vec::new();
        for command in self.ctx.queue.drain() {
            let id = match &command {
                Command::ApplyContainerFill(id) | Command::LocationChanged(id, _) => *id,
                Command::WindowLocated { id, .. } => *id,
            };
            let Some(instance) = self.instances.get_mut(&id) else {
                debug!("[Host] Dropping {:?} for removed instance", command);
                continue;
            };
            if let Err(e) = instance.handle_command(command) {
                if e.is_user_visible() {
                    error!("[Host] {} failed: {}", id, e);
                    failures.push((id, e));
                } else {
                    debug!("[Host] {} reported {}", id, e);
                }
            }
        }
        self.reap();
        failures
    }

    /// Disposes failed instances and forgets disposed ones.
    fn reap(&mut self) {
        for instance in self.instances.values_mut() {
            if instance.state() == LifecycleState::Failed {
                instance.dispose();
            }
        }
        self.instances.retain(|_, i| i.state() != LifecycleState::Disposed);
    }

    /// Disposes every instance; embedded applications keep running.
    pub fn shutdown(&mut self) {
        info!("[Host] Shutting down {} instance(s)", self.instances.len());
        for (_, mut instance) in std::mem::take(&mut self.instances) {
            instance.dispose();
        }
    }
}

impl Drop for EmbeddingHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{LifecycleOptions, RemovalListener, RemovalReason};
    use crate::platform::fake::{Behaviour, FakeLauncher, FakeWindowSystem};
    use crate::platform::{Size, WindowRect, WindowStyle};
    use parking_lot::Mutex;
    use std::time::{Duration, Instant};

    const SURFACE: SurfaceHandle = SurfaceHandle(42);
    const APP: WindowHandle = WindowHandle(3);

    #[derive(Default)]
    struct Removals(Mutex<Vec<(InstanceId, RemovalReason)>>);

    impl RemovalListener for Removals {
        fn instance_removed(&self, id: InstanceId, reason: RemovalReason) {
            self.0.lock().push((id, reason));
        }
    }

    fn host() -> (EmbeddingHost, Arc<FakeWindowSystem>, Arc<FakeLauncher>, Arc<Removals>) {
        let sys = FakeWindowSystem::new();
        sys.add_surface(SURFACE, Size::new(400, 300));
        sys.add_window(APP, WindowStyle(0x00CF_0000), WindowRect::new(0, 0, 200, 100));
        let launcher = FakeLauncher::new(sys.clone());
        launcher.program("app.exe", Behaviour::window(APP, Duration::from_millis(30)));
        let removals = Arc::new(Removals::default());
        let ctx = LifecycleContext {
            sys: sys.clone(),
            launcher: launcher.clone(),
            queue: CommandQueue::default(),
            listener: removals.clone(),
            options: LifecycleOptions {
                resize_debounce: Duration::from_millis(50),
                close_grace: Duration::from_millis(50),
                poll_interval: Duration::from_millis(5),
            },
        };
        (EmbeddingHost::new(ctx), sys, launcher, removals)
    }

    fn pump_until(host: &mut EmbeddingHost, mut done: impl FnMut(&EmbeddingHost) -> bool) -> Vec<(InstanceId, EmbedError)> {
        let deadline = Instant::now() + Duration::from_secs(3);
        let mut failures = Vec::new();
        while Instant::now() < deadline && !done(host) {
            host.queue().wait_for_any(Duration::from_millis(20));
            failures.extend(host.pump());
        }
        failures
    }

    #[test]
    fn background_launch_embeds_on_pump() {
        let (mut host, sys, _launcher, _removals) = host();
        let spec = Arc::new(ApplicationSpec::new("App", "app.exe"));
        let LaunchOutcome::Started(id) = host.launch(spec, SURFACE).unwrap() else {
            panic!("expected a new instance");
        };
        assert_eq!(host.instance(id).unwrap().state(), LifecycleState::WaitingForWindow);

        pump_until(&mut host, |h| {
            h.instance(id).is_some_and(|i| i.state() == LifecycleState::Active)
        });
        assert_eq!(host.instance(id).unwrap().state(), LifecycleState::Active);
        assert_eq!(sys.window(APP).unwrap().parent, Some(SURFACE));
    }

    #[test]
    fn single_instance_specs_are_not_launched_twice() {
        let (mut host, _sys, launcher, _removals) = host();
        let spec = Arc::new(ApplicationSpec::new("App", "app.exe"));
        let first = host.launch_blocking(spec.clone(), SURFACE).unwrap();
        let second = host.launch(spec.clone(), SurfaceHandle(43)).unwrap();
        let LaunchOutcome::Started(id) = first else { panic!() };
        assert_eq!(second, LaunchOutcome::AlreadyRunning(id));
        assert_eq!(launcher.spawned(), 1);

        let multi = Arc::new(ApplicationSpec::new("App", "app.exe").with_allow_multiple(true));
        assert!(matches!(host.launch(multi, SurfaceHandle(44)), Ok(LaunchOutcome::Started(_))));
        assert_eq!(launcher.spawned(), 2);
    }

    #[test]
    fn background_timeout_is_reported_and_instance_removed() {
        let (mut host, _sys, launcher, removals) = host();
        launcher.program(
            "silent.exe",
            Behaviour { window: None, obeys_close: false, exits_at_once: false },
        );
        let spec = Arc::new(
            ApplicationSpec::new("Silent", "silent.exe").with_max_load_time(Duration::from_millis(60)),
        );
        let LaunchOutcome::Started(id) = host.launch(spec, SURFACE).unwrap() else { panic!() };

        let failures = pump_until(&mut host, |h| h.is_empty());
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], (fid, EmbedError::WindowTimeout { .. }) if fid == id));
        assert_eq!(removals.0.lock().clone(), vec![(id, RemovalReason::Disposed)]);
        assert!(!launcher.process(0).killed.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn missing_executable_fails_synchronously() {
        let (mut host, _sys, launcher, _removals) = host();
        launcher.mark_missing("missingapp.exe");
        let spec = Arc::new(ApplicationSpec::new("Missing", "missingapp.exe"));
        let err = host.launch(spec, SURFACE).unwrap_err();
        assert!(matches!(err, EmbedError::LaunchFailure { .. }));
        assert!(host.is_empty());
    }

    #[test]
    fn failed_starts_emit_no_removal() {
        let (mut host, sys, launcher, removals) = host();
        launcher.mark_missing("missingapp.exe");
        let missing = Arc::new(ApplicationSpec::new("Missing", "missingapp.exe"));
        assert!(host.launch(missing.clone(), SURFACE).is_err());
        assert!(host.launch_blocking(missing, SURFACE).is_err());

        let gone = WindowHandle(404);
        assert!(host.attach(gone, SURFACE).is_err());
        sys.place_at(ScreenPoint { x: 3, y: 3 }, gone);
        assert!(host.attach_at_point(ScreenPoint { x: 3, y: 3 }, SURFACE, &[]).is_err());

        assert!(host.is_empty());
        assert!(removals.0.lock().is_empty());
    }

    #[test]
    fn rejected_detach_keeps_waiting_instance() {
        let (mut host, sys, launcher, removals) = host();
        launcher.program("late.exe", Behaviour::window(APP, Duration::from_millis(300)));
        let spec = Arc::new(ApplicationSpec::new("Late", "late.exe"));
        let LaunchOutcome::Started(id) = host.launch(spec, SURFACE).unwrap() else { panic!() };

        assert!(matches!(host.detach(id), Err(EmbedError::InvalidState { .. })));
        assert!(matches!(host.close(id), Err(EmbedError::InvalidState { .. })));
        assert_eq!(host.instance(id).unwrap().state(), LifecycleState::WaitingForWindow);
        assert!(removals.0.lock().is_empty());

        pump_until(&mut host, |h| {
            h.instance(id).is_some_and(|i| i.state() == LifecycleState::Active)
        });
        assert_eq!(sys.window(APP).unwrap().parent, Some(SURFACE));
        host.detach(id).unwrap();
        assert!(host.is_empty());
        assert_eq!(removals.0.lock().clone(), vec![(id, RemovalReason::Detached)]);
    }

    #[test]
    fn drag_select_attaches_foreign_window_but_not_own() {
        let (mut host, sys, launcher, _removals) = host();
        let own = WindowHandle(99);
        sys.add_window(own, WindowStyle(0), WindowRect::default());
        sys.place_at(ScreenPoint { x: 10, y: 10 }, APP);
        sys.place_at(ScreenPoint { x: 500, y: 500 }, own);

        assert_eq!(host.attach_at_point(ScreenPoint { x: 500, y: 500 }, SURFACE, &[own]).unwrap(), None);
        assert_eq!(host.attach_at_point(ScreenPoint { x: 1, y: 1 }, SURFACE, &[own]).unwrap(), None);
        let id = host
            .attach_at_point(ScreenPoint { x: 10, y: 10 }, SURFACE, &[own])
            .unwrap()
            .unwrap();
        assert!(!host.instance(id).unwrap().is_owned());

        host.close(id).unwrap();
        assert!(sys.window(APP).unwrap().close_requested);
        assert_eq!(launcher.spawned(), 0);
        assert!(host.is_empty());
    }

    #[test]
    fn lost_window_is_removed_on_pump() {
        let (mut host, sys, _launcher, removals) = host();
        let id = host.attach(APP, SURFACE).unwrap();
        assert!(host.request_resize(id).unwrap());
        sys.destroy_window(APP);

        let failures = pump_until(&mut host, |h| h.is_empty());
        assert!(failures.is_empty(), "lost windows are not user visible");
        assert_eq!(removals.0.lock().clone(), vec![(id, RemovalReason::WindowLost)]);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let (mut host, _sys, _launcher, _removals) = host();
        assert!(matches!(host.detach(InstanceId(9)), Err(EmbedError::UnknownInstance(_))));
        assert!(matches!(host.request_resize(InstanceId(9)), Err(EmbedError::UnknownInstance(_))));
    }
}
