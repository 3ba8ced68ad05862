//! Scripted in-memory window system and launcher for tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    io,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use super::{
    ChildProcess, HookHandle, LocationCallback, NativeError, NativeResult, PositionFlags,
    ProcessLauncher, ScreenPoint, Size, SurfaceHandle, WindowHandle, WindowRect, WindowStyle,
    WindowSystem,
};
use crate::app_spec::ApplicationSpec;

#[derive(Debug, Clone)]
pub struct FakeWindow {
    pub style: WindowStyle,
    pub rect: WindowRect,
    pub parent: Option<SurfaceHandle>,
    pub close_requested: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SetStyle(WindowHandle, WindowStyle),
    Reparent(WindowHandle, Option<SurfaceHandle>),
    SetPosition(WindowHandle, WindowRect),
    ResizeSurface(SurfaceHandle, Size),
    InstallObserver(WindowHandle),
    RemoveObserver(HookHandle),
    RequestClose(WindowHandle),
}

#[derive(Default)]
struct State {
    windows: HashMap<WindowHandle, FakeWindow>,
    surfaces: HashMap<SurfaceHandle, Size>,
    hooks: HashMap<HookHandle, (WindowHandle, LocationCallback)>,
    next_hook: isize,
    /// pid -> (window, visible from)
    main_windows: HashMap<u32, (WindowHandle, Instant)>,
    children: HashMap<u32, Vec<u32>>,
    points: Vec<(ScreenPoint, WindowHandle)>,
    fail_hooks: bool,
    calls: Vec<Call>,
}

#[derive(Default)]
pub struct FakeWindowSystem {
    state: Mutex<State>,
}

impl std::fmt::Debug for FakeWindowSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeWindowSystem").finish_non_exhaustive()
    }
}

impl FakeWindowSystem {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_window(&self, handle: WindowHandle, style: WindowStyle, rect: WindowRect) {
        self.state.lock().windows.insert(
            handle,
            FakeWindow { style, rect, parent: None, close_requested: false },
        );
    }

    pub fn add_surface(&self, surface: SurfaceHandle, size: Size) {
        self.state.lock().surfaces.insert(surface, size);
    }

    pub fn set_surface_size(&self, surface: SurfaceHandle, size: Size) {
        self.add_surface(surface, size);
    }

    /// Makes `handle` the main window of `pid` once `delay` has passed.
    pub fn show_main_window(&self, pid: u32, handle: WindowHandle, delay: Duration) {
        self.state
            .lock()
            .main_windows
            .insert(pid, (handle, Instant::now() + delay));
    }

    pub fn add_child_process(&self, parent: u32, child: u32) {
        self.state.lock().children.entry(parent).or_default().push(child);
    }

    pub fn place_at(&self, point: ScreenPoint, handle: WindowHandle) {
        self.state.lock().points.push((point, handle));
    }

    pub fn fail_hook_installs(&self) {
        self.state.lock().fail_hooks = true;
    }

    /// Simulates the user closing the window or its process dying.
    pub fn destroy_window(&self, handle: WindowHandle) {
        self.state.lock().windows.remove(&handle);
    }

    /// Simulates the embedded application moving or resizing itself.
    pub fn move_by_app(&self, handle: WindowHandle, rect: WindowRect) {
        let callbacks: Vec<LocationCallback> = {
            let mut state = self.state.lock();
            if let Some(w) = state.windows.get_mut(&handle) {
                w.rect = rect;
            }
            state
                .hooks
                .values()
                .filter(|(target, _)| *target == handle)
                .map(|(_, cb)| cb.clone())
                .collect()
        };
        for cb in callbacks {
            cb(handle);
        }
    }

    pub fn window(&self, handle: WindowHandle) -> Option<FakeWindow> {
        self.state.lock().windows.get(&handle).cloned()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn active_hooks(&self) -> usize {
        self.state.lock().hooks.len()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn with_window<T>(
        &self,
        handle: WindowHandle,
        f: impl FnOnce(&mut FakeWindow) -> T,
    ) -> NativeResult<T> {
        let mut state = self.state.lock();
        state
            .windows
            .get_mut(&handle)
            .map(f)
            .ok_or(NativeError::InvalidHandle)
    }

    fn record(&self, call: Call) {
        self.state.lock().calls.push(call);
    }
}

impl WindowSystem for FakeWindowSystem {
    fn is_window(&self, handle: WindowHandle) -> bool {
        self.state.lock().windows.contains_key(&handle)
    }

    fn get_style(&self, handle: WindowHandle) -> NativeResult<WindowStyle> {
        self.with_window(handle, |w| w.style)
    }

    fn set_style(&self, handle: WindowHandle, style: WindowStyle) -> NativeResult<()> {
        self.with_window(handle, |w| w.style = style)?;
        self.record(Call::SetStyle(handle, style));
        Ok(())
    }

    fn get_rect(&self, handle: WindowHandle) -> NativeResult<WindowRect> {
        self.with_window(handle, |w| w.rect)
    }

    fn reparent(&self, handle: WindowHandle, parent: Option<SurfaceHandle>) -> NativeResult<()> {
        self.with_window(handle, |w| w.parent = parent)?;
        self.record(Call::Reparent(handle, parent));
        Ok(())
    }

    fn set_position(
        &self,
        handle: WindowHandle,
        rect: WindowRect,
        flags: PositionFlags,
    ) -> NativeResult<()> {
        assert_ne!(flags.bits() & PositionFlags::NO_ZORDER, 0);
        assert_ne!(flags.bits() & PositionFlags::NO_ACTIVATE, 0);
        self.with_window(handle, |w| w.rect = rect)?;
        self.record(Call::SetPosition(handle, rect));
        Ok(())
    }

    fn surface_client_size(&self, surface: SurfaceHandle) -> NativeResult<Size> {
        self.state
            .lock()
            .surfaces
            .get(&surface)
            .copied()
            .ok_or(NativeError::Os { call: "GetClientRect", code: 1400 })
    }

    fn resize_surface(&self, surface: SurfaceHandle, size: Size) -> NativeResult<()> {
        self.state.lock().surfaces.insert(surface, size);
        self.record(Call::ResizeSurface(surface, size));
        Ok(())
    }

    fn install_location_observer(
        &self,
        handle: WindowHandle,
        callback: LocationCallback,
    ) -> NativeResult<HookHandle> {
        let mut state = self.state.lock();
        if state.fail_hooks {
            return Err(NativeError::Os { call: "SetWinEventHook", code: 87 });
        }
        if !state.windows.contains_key(&handle) {
            return Err(NativeError::InvalidHandle);
        }
        state.next_hook += 1;
        let hook = HookHandle(state.next_hook);
        state.hooks.insert(hook, (handle, callback));
        state.calls.push(Call::InstallObserver(handle));
        Ok(hook)
    }

    fn remove_location_observer(&self, hook: HookHandle) {
        let mut state = self.state.lock();
        if state.hooks.remove(&hook).is_some() {
            state.calls.push(Call::RemoveObserver(hook));
        }
    }

    fn request_close(&self, handle: WindowHandle) -> NativeResult<()> {
        self.with_window(handle, |w| w.close_requested = true)?;
        self.record(Call::RequestClose(handle));
        Ok(())
    }

    fn main_window_of(&self, pid: u32) -> Option<WindowHandle> {
        let state = self.state.lock();
        state
            .main_windows
            .get(&pid)
            .filter(|(h, at)| Instant::now() >= *at && state.windows.contains_key(h))
            .map(|(h, _)| *h)
    }

    fn child_processes(&self, pid: u32) -> Vec<u32> {
        let mut children = self.state.lock().children.get(&pid).cloned().unwrap_or_default();
        children.sort_unstable();
        children
    }

    fn root_window_at(&self, point: ScreenPoint) -> Option<WindowHandle> {
        self.state
            .lock()
            .points
            .iter()
            .find(|(p, _)| *p == point)
            .map(|(_, h)| *h)
    }
}

/// Observable state of a fake process.
#[derive(Debug, Default)]
pub struct FakeProcessState {
    pub exited: AtomicBool,
    pub killed: AtomicBool,
}

#[derive(Debug)]
pub struct FakeProcess {
    pid: u32,
    state: Arc<FakeProcessState>,
    /// Exits on its own once a close was requested, if set.
    window: Option<(Arc<FakeWindowSystem>, WindowHandle)>,
}

impl ChildProcess for FakeProcess {
    fn id(&self) -> u32 {
        self.pid
    }

    fn has_exited(&mut self) -> bool {
        if let Some((sys, handle)) = &self.window {
            if sys.window(*handle).map_or(false, |w| w.close_requested) {
                self.state.exited.store(true, Ordering::SeqCst);
            }
        }
        self.state.exited.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> io::Result<()> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.exited.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// What a launched fake executable does.
#[derive(Debug, Clone)]
pub struct Behaviour {
    /// Window shown after a delay, or never.
    pub window: Option<(WindowHandle, Duration)>,
    /// Honours a graceful close request.
    pub obeys_close: bool,
    /// Exits immediately after start.
    pub exits_at_once: bool,
}

impl Behaviour {
    pub fn window(handle: WindowHandle, delay: Duration) -> Self {
        Self { window: Some((handle, delay)), obeys_close: true, exits_at_once: false }
    }
}

pub struct FakeLauncher {
    sys: Arc<FakeWindowSystem>,
    next_pid: AtomicU32,
    behaviours: Mutex<BTreeMap<PathBuf, Behaviour>>,
    missing: Mutex<HashSet<PathBuf>>,
    pub processes: Mutex<Vec<(u32, Arc<FakeProcessState>)>>,
}

impl FakeLauncher {
    pub fn new(sys: Arc<FakeWindowSystem>) -> Arc<Self> {
        Arc::new(Self {
            sys,
            next_pid: AtomicU32::new(1000),
            behaviours: Mutex::new(BTreeMap::new()),
            missing: Mutex::new(HashSet::new()),
            processes: Mutex::new(Vec::new()),
        })
    }

    pub fn program(&self, path: impl Into<PathBuf>, behaviour: Behaviour) {
        self.behaviours.lock().insert(path.into(), behaviour);
    }

    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        self.missing.lock().insert(path.into());
    }

    pub fn process(&self, index: usize) -> Arc<FakeProcessState> {
        self.processes.lock()[index].1.clone()
    }

    pub fn spawned(&self) -> usize {
        self.processes.lock().len()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn spawn(&self, spec: &ApplicationSpec) -> io::Result<Box<dyn ChildProcess>> {
        if self.missing.lock().contains(&spec.path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "The system cannot find the file specified."));
        }
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let state = Arc::new(FakeProcessState::default());
        let behaviour = self.behaviours.lock().get(&spec.path).cloned();
        let mut window = None;
        if let Some(b) = behaviour {
            if let Some((handle, delay)) = b.window {
                self.sys.show_main_window(pid, handle, delay);
                if b.obeys_close {
                    window = Some((self.sys.clone(), handle));
                }
            }
            if b.exits_at_once {
                state.exited.store(true, Ordering::SeqCst);
            }
        }
        self.processes.lock().push((pid, state.clone()));
        Ok(Box::new(FakeProcess { pid, state, window }))
    }
}
