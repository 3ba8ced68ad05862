//! The embedding state machine of a single instance.
//!
//! ```text
//! Created → Launching → WaitingForWindow → Active → Detaching ┐
//!     │          │              │            │               ├→ Disposed
//!     │          └──────────────┴→ Failed    └──→ Closing ───┘
//!     └── attach(window) ─────────────────→ Active
//! ```
//!
//! All transitions run on the owner thread. The window's original style and
//! rectangle are captured once, when the window is embedded, and are what
//! `detach` puts back.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use once_cell::unsync::OnceCell;

use crate::app_spec::ApplicationSpec;
use crate::constants;
use crate::dispatch::{Command, CommandQueue};
use crate::error::EmbedError;
use crate::host::InstanceId;
use crate::locator::{LocateCriteria, LocateError, WindowLocator};
use crate::platform::{
    ChildProcess, HookHandle, LocationCallback, NativeError, PositionFlags, ProcessLauncher,
    SurfaceHandle, WindowHandle, WindowRect, WindowStyle, WindowSystem,
};
use crate::resize::ResizeCoordinator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Launching,
    WaitingForWindow,
    /// Embedded in the container.
    Active,
    Detaching,
    Closing,
    /// Launch or window discovery failed; nothing was modified.
    Failed,
    Disposed,
}

/// Why an instance left the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalReason {
    Detached,
    Closed,
    /// Explicit disposal, or cleanup after a failed start.
    Disposed,
    /// The window vanished underneath a native call.
    WindowLost,
}

/// Receives the one removal notification each instance emits. Instances
/// that never reached a caller (a failed attach, a launch the host rejected)
/// emit nothing.
pub trait RemovalListener: Send + Sync {
    fn instance_removed(&self, id: InstanceId, reason: RemovalReason);
}

/// Who owns the process behind the embedded window.
#[derive(Debug)]
pub enum ProcessOwnership {
    /// Spawned by us. `process` is `None` while lent to a background locator
    /// and after the handle was released.
    Owned {
        pid: u32,
        process: Option<Box<dyn ChildProcess>>,
    },
    /// Attached to a window someone else started; never terminated by us.
    Foreign,
}

/// Style and rectangle as they were before embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub style: WindowStyle,
    pub rect: WindowRect,
}

#[derive(Debug, Clone, Copy)]
pub struct LifecycleOptions {
    pub resize_debounce: Duration,
    pub close_grace: Duration,
    pub poll_interval: Duration,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            resize_debounce: constants::DEFAULT_RESIZE_DEBOUNCE,
            close_grace: constants::DEFAULT_CLOSE_GRACE,
            poll_interval: constants::LOCATE_POLL_INTERVAL,
        }
    }
}

/// Collaborators shared by every instance of a host.
#[derive(Clone)]
pub struct LifecycleContext {
    pub sys: Arc<dyn WindowSystem>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub queue: CommandQueue,
    pub listener: Arc<dyn RemovalListener>,
    pub options: LifecycleOptions,
}

pub struct EmbeddedInstance {
    id: InstanceId,
    spec: Option<Arc<ApplicationSpec>>,
    container: SurfaceHandle,
    state: LifecycleState,
    window: Option<WindowHandle>,
    ownership: Option<ProcessOwnership>,
    snapshot: OnceCell<WindowSnapshot>,
    hook: Option<HookHandle>,
    resize: ResizeCoordinator,
    locate_cancel: Arc<AtomicBool>,
    announce_removal: bool,
    ctx: LifecycleContext,
}

impl EmbeddedInstance {
    /// A not yet started instance of a catalog entry.
    pub fn new(
        id: InstanceId,
        spec: Arc<ApplicationSpec>,
        container: SurfaceHandle,
        ctx: LifecycleContext,
    ) -> Self {
        let resize = Self::coordinator(id, &ctx, container, spec.resize);
        Self {
            id,
            spec: Some(spec),
            container,
            state: LifecycleState::Created,
            window: None,
            ownership: None,
            snapshot: OnceCell::new(),
            hook: None,
            resize,
            locate_cancel: Arc::new(AtomicBool::new(false)),
            announce_removal: true,
            ctx,
        }
    }

    /// Embeds a window someone else owns, skipping launch and lookup.
    pub fn attach(
        id: InstanceId,
        window: WindowHandle,
        container: SurfaceHandle,
        ctx: LifecycleContext,
    ) -> Result<Self, EmbedError> {
        let resize = Self::coordinator(id, &ctx, container, true);
        let mut instance = Self {
            id,
            spec: None,
            container,
            state: LifecycleState::Created,
            window: None,
            ownership: Some(ProcessOwnership::Foreign),
            snapshot: OnceCell::new(),
            hook: None,
            resize,
            locate_cancel: Arc::new(AtomicBool::new(false)),
            announce_removal: false,
            ctx,
        };
        info!("[Lifecycle:{}] Attaching foreign window {}", id, window);
        instance.embed(window)?;
        instance.announce_removal = true;
        Ok(instance)
    }

    fn coordinator(
        id: InstanceId,
        ctx: &LifecycleContext,
        container: SurfaceHandle,
        resize: bool,
    ) -> ResizeCoordinator {
        ResizeCoordinator::new(
            id,
            ctx.sys.clone(),
            container,
            resize,
            ctx.options.resize_debounce,
            ctx.queue.clone(),
        )
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn spec(&self) -> Option<&Arc<ApplicationSpec>> {
        self.spec.as_ref()
    }

    pub fn name(&self) -> &str {
        self.spec.as_deref().map_or("<attached window>", |s| s.name.as_str())
    }

    pub fn window(&self) -> Option<WindowHandle> {
        self.window
    }

    pub fn container(&self) -> SurfaceHandle {
        self.container
    }

    pub fn snapshot(&self) -> Option<&WindowSnapshot> {
        self.snapshot.get()
    }

    pub fn hook(&self) -> Option<HookHandle> {
        self.hook
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.ownership, Some(ProcessOwnership::Owned { .. }))
    }

    pub fn pid(&self) -> Option<u32> {
        match &self.ownership {
            Some(ProcessOwnership::Owned { pid, .. }) => Some(*pid),
            _ => None,
        }
    }

    /// Live means neither failed nor disposed.
    pub fn is_live(&self) -> bool {
        !matches!(self.state, LifecycleState::Failed | LifecycleState::Disposed)
    }

    /// Shared flag that aborts a background window lookup for this instance.
    pub fn locate_cancel_flag(&self) -> Arc<AtomicBool> {
        self.locate_cancel.clone()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("[Lifecycle:{}] {:?} → {:?}", self.id, self.state, next);
        self.state = next;
    }

    fn expect_state(
        &self,
        operation: &'static str,
        allowed: &[LifecycleState],
    ) -> Result<(), EmbedError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EmbedError::InvalidState { operation, state: self.state })
        }
    }

    /// Launches the executable and blocks until its window is embedded.
    pub fn start(&mut self) -> Result<(), EmbedError> {
        let mut process = self.begin_launch()?;
        let result = WindowLocator::new(self.ctx.sys.as_ref())
            .with_poll_interval(self.ctx.options.poll_interval)
            .with_cancel(self.locate_cancel.clone())
            .locate(self.locate_criteria(process.id()), self.max_load_time(), Some(process.as_mut()));
        self.complete_launch(result, process)
    }

    /// `Created → Launching → WaitingForWindow`. The spawned process is handed
    /// to the caller, who drives the window lookup and returns it through
    /// [`complete_launch`](Self::complete_launch).
    pub fn begin_launch(&mut self) -> Result<Box<dyn ChildProcess>, EmbedError> {
        self.expect_state("start", &[LifecycleState::Created])?;
        let Some(spec) = self.spec.clone() else {
            return Err(EmbedError::InvalidState { operation: "start", state: self.state });
        };
        self.transition(LifecycleState::Launching);
        match self.ctx.launcher.spawn(&spec) {
            Ok(process) => {
                let pid = process.id();
                info!("[Lifecycle:{}] Launched '{}' (pid {})", self.id, spec.name, pid);
                self.ownership = Some(ProcessOwnership::Owned { pid, process: None });
                self.transition(LifecycleState::WaitingForWindow);
                Ok(process)
            }
            Err(source) => {
                error!("[Lifecycle:{}] Error starting '{}': {}", self.id, spec.path.display(), source);
                self.transition(LifecycleState::Failed);
                Err(EmbedError::LaunchFailure { path: spec.path.clone(), source })
            }
        }
    }

    pub fn locate_criteria(&self, pid: u32) -> LocateCriteria {
        LocateCriteria::ProcessTree(pid)
    }

    pub fn max_load_time(&self) -> Duration {
        self.spec
            .as_ref()
            .map_or(constants::DEFAULT_MAX_LOAD_TIME, |s| s.max_load_time)
    }

    /// `WaitingForWindow → Active`, or `Failed` when no window turned up.
    /// A process that never showed a window is left running.
    pub fn complete_launch(
        &mut self,
        result: Result<WindowHandle, LocateError>,
        process: Box<dyn ChildProcess>,
    ) -> Result<(), EmbedError> {
        if self.state != LifecycleState::WaitingForWindow {
            // disposed while the lookup was running; release without killing
            debug!("[Lifecycle:{}] Dropping late lookup result {:?}", self.id, result);
            return Err(EmbedError::InvalidState {
                operation: "complete launch",
                state: self.state,
            });
        }
        if let Some(ProcessOwnership::Owned { process: slot, .. }) = self.ownership.as_mut() {
            *slot = Some(process);
        }
        match result {
            Ok(window) => self.embed(window),
            Err(LocateError::Timeout { waited, .. }) => {
                let path = self.spec.as_ref().map(|s| s.path.clone()).unwrap_or_default();
                error!(
                    "[Lifecycle:{}] Error waiting for MainWindow of '{}'",
                    self.id,
                    path.display()
                );
                self.transition(LifecycleState::Failed);
                Err(EmbedError::WindowTimeout { path, waited })
            }
            Err(LocateError::Cancelled) => {
                self.transition(LifecycleState::Failed);
                Err(EmbedError::InvalidState { operation: "complete launch", state: self.state })
            }
        }
    }

    /// Snapshots, strips and reparents `window`, then sizes it per policy.
    fn embed(&mut self, window: WindowHandle) -> Result<(), EmbedError> {
        match self.try_embed(window) {
            Ok(()) => {
                self.transition(LifecycleState::Active);
                info!("[Lifecycle:{}] '{}' embedded as {}", self.id, self.name(), window);
                Ok(())
            }
            Err(NativeError::InvalidHandle) => {
                warn!("[Lifecycle:{}] Window {} vanished while embedding", self.id, window);
                self.dispose_with(RemovalReason::WindowLost);
                Err(EmbedError::HandleInvalidated)
            }
            Err(e) => {
                error!("[Lifecycle:{}] Embedding {} failed: {}", self.id, window, e);
                if self.snapshot.get().is_some() {
                    let _ = self.restore(window);
                }
                self.transition(LifecycleState::Failed);
                Err(e.into())
            }
        }
    }

    fn try_embed(&mut self, window: WindowHandle) -> Result<(), NativeError> {
        let sys = self.ctx.sys.clone();
        let snapshot = WindowSnapshot {
            style: sys.get_style(window)?,
            rect: sys.get_rect(window)?,
        };
        if self.snapshot.set(snapshot).is_err() {
            warn!("[Lifecycle:{}] Snapshot already taken; keeping the first", self.id);
        }
        self.window = Some(window);

        let stripped = snapshot.style.stripped();
        sys.set_style(window, stripped)?;
        debug!(
            "[Lifecycle:{}] Style {:#x} → {:#x}",
            self.id, snapshot.style.0, stripped.0
        );
        sys.reparent(window, Some(self.container))?;

        if self.resize.is_inert() {
            // keep the native size; the container grows to match it
            let size = snapshot.rect.size();
            sys.set_position(
                window,
                WindowRect::at_origin(size),
                PositionFlags::new().frame_changed(),
            )?;
            sys.resize_surface(self.container, size)?;
        } else {
            self.resize.bind(window);
            self.resize.apply_container_fill()?;
            self.install_observer(window);
        }
        Ok(())
    }

    fn install_observer(&mut self, window: WindowHandle) {
        if self.hook.is_some() {
            return;
        }
        let queue = self.ctx.queue.clone();
        let id = self.id;
        let callback: LocationCallback =
            Arc::new(move |h| queue.post(Command::LocationChanged(id, h)));
        match self.ctx.sys.install_location_observer(window, callback) {
            Ok(hook) => self.hook = Some(hook),
            Err(e) => {
                let err = EmbedError::HookInstallFailure(e.to_string());
                warn!("[Lifecycle:{}] {}; continuing without it", self.id, err);
            }
        }
    }

    fn remove_observer(&mut self) {
        if let Some(hook) = self.hook.take() {
            self.ctx.sys.remove_location_observer(hook);
        }
    }

    /// Queues a deferred fill after the container's size may have changed.
    pub fn request_resize(&self) -> bool {
        self.state == LifecycleState::Active && self.resize.request_resize()
    }

    /// Applies container fill now; a vanished window disposes the instance.
    pub fn apply_container_fill(&mut self) -> Result<(), EmbedError> {
        if self.state != LifecycleState::Active {
            return Ok(());
        }
        match self.resize.apply_container_fill() {
            Ok(()) => Ok(()),
            Err(e) => self.native_failure("container fill", e),
        }
    }

    /// Runs a command marshaled from a timer or observer thread.
    pub fn handle_command(&mut self, command: Command) -> Result<(), EmbedError> {
        match command {
            Command::ApplyContainerFill(_) => self.apply_container_fill(),
            Command::LocationChanged(_, h) => {
                if self.hook.is_some() && self.window == Some(h) {
                    self.apply_container_fill()
                } else {
                    Ok(())
                }
            }
            Command::WindowLocated { result, process, .. } => self.complete_launch(result, process),
        }
    }

    fn native_failure(&mut self, what: &str, e: NativeError) -> Result<(), EmbedError> {
        match e {
            NativeError::InvalidHandle => {
                warn!("[Lifecycle:{}] Lost window during {}", self.id, what);
                self.dispose_with(RemovalReason::WindowLost);
                Err(EmbedError::HandleInvalidated)
            }
            other => {
                warn!("[Lifecycle:{}] {} failed: {}", self.id, what, other);
                Err(other.into())
            }
        }
    }

    fn restore(&self, window: WindowHandle) -> Result<(), NativeError> {
        let Some(snapshot) = self.snapshot.get() else {
            return Ok(());
        };
        let sys = &self.ctx.sys;
        sys.set_style(window, snapshot.style)?;
        sys.reparent(window, None)?;
        sys.set_position(window, snapshot.rect, PositionFlags::new().frame_changed())
    }

    /// `Active → Detaching → Disposed`: the application keeps running as an
    /// ordinary top-level window with its original style and geometry.
    pub fn detach(&mut self) -> Result<(), EmbedError> {
        self.expect_state("detach", &[LifecycleState::Active])?;
        self.transition(LifecycleState::Detaching);
        self.resize.cancel();
        self.remove_observer();
        let Some(window) = self.window else {
            self.dispose_with(RemovalReason::Detached);
            return Ok(());
        };
        match self.restore(window) {
            Ok(()) => {
                info!("[Lifecycle:{}] Detached {}", self.id, window);
                self.dispose_with(RemovalReason::Detached);
                Ok(())
            }
            Err(e) => {
                let result = self.native_failure("detach", e);
                if self.state != LifecycleState::Disposed {
                    self.dispose_with(RemovalReason::Detached);
                }
                result
            }
        }
    }

    /// `Active → Closing → Disposed`: asks the application to close. An owned
    /// process that ignores the request is killed after the grace period.
    pub fn close(&mut self) -> Result<(), EmbedError> {
        self.expect_state("close", &[LifecycleState::Active])?;
        self.transition(LifecycleState::Closing);
        self.resize.cancel();
        self.remove_observer();
        if let Some(window) = self.window {
            match self.ctx.sys.request_close(window) {
                Ok(()) => debug!("[Lifecycle:{}] Close requested for {}", self.id, window),
                Err(NativeError::InvalidHandle) => {
                    debug!("[Lifecycle:{}] Window {} already gone", self.id, window)
                }
                Err(e) => warn!("[Lifecycle:{}] Close request failed: {}", self.id, e),
            }
        }
        if let Some(ProcessOwnership::Owned { process, .. }) = self.ownership.as_mut() {
            if let Some(process) = process.take() {
                spawn_reaper(self.id, process, self.ctx.options.close_grace);
            }
        }
        self.dispose_with(RemovalReason::Closed);
        Ok(())
    }

    /// Releases everything and notifies the listener. Idempotent.
    pub fn dispose(&mut self) {
        self.dispose_with(RemovalReason::Disposed);
    }

    /// Disposes without a removal notification, for instances whose id was
    /// never handed out.
    pub(crate) fn discard(&mut self) {
        self.announce_removal = false;
        self.dispose();
    }

    fn dispose_with(&mut self, reason: RemovalReason) {
        if self.state == LifecycleState::Disposed {
            return;
        }
        self.locate_cancel.store(true, Ordering::SeqCst);
        self.resize.cancel();
        self.remove_observer();
        if let Some(ProcessOwnership::Owned { pid, process }) = self.ownership.as_mut() {
            if process.take().is_some() {
                debug!("[Lifecycle:{}] Released handle of pid {}", self.id, pid);
            }
        }
        self.transition(LifecycleState::Disposed);
        info!("[Lifecycle:{}] Disposed ({:?})", self.id, reason);
        if self.announce_removal {
            self.ctx.listener.instance_removed(self.id, reason);
        }
    }
}

impl Drop for EmbeddedInstance {
    fn drop(&mut self) {
        self.dispose_with(RemovalReason::Disposed);
    }
}

/// Waits out the grace period off the owner thread, then kills if needed.
fn spawn_reaper(id: InstanceId, mut process: Box<dyn ChildProcess>, grace: Duration) {
    let spawned = thread::Builder::new()
        .name("close-reaper".into())
        .spawn(move || {
            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if process.has_exited() {
                    debug!("[Lifecycle:{}] pid {} closed gracefully", id, process.id());
                    return;
                }
                thread::sleep(Duration::from_millis(25));
            }
            if process.has_exited() {
                return;
            }
            warn!("[Lifecycle:{}] pid {} ignored close; terminating", id, process.id());
            if let Err(e) = process.kill() {
                error!("[Lifecycle:{}] Could not terminate pid {}: {}", id, process.id(), e);
            }
        });
    if let Err(e) = spawned {
        error!("[Lifecycle:{}] Could not start close reaper: {}", id, e);
    }
}
