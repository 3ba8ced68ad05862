//! Keeping an embedded window's geometry in step with its container.
//!
//! Container-side changes arrive as bursts of [`ResizeCoordinator::request_resize`]
//! calls and are coalesced by a single-shot [`DebounceTimer`]. Window-side
//! changes come from the location observer and are applied straight away.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error};
use parking_lot::{Condvar, Mutex};

use crate::dispatch::{Command, CommandQueue};
use crate::host::InstanceId;
use crate::platform::{
    NativeResult, PositionFlags, SurfaceHandle, WindowHandle, WindowRect, WindowSystem,
};

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    shutdown: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condvar: Condvar,
}

/// Single-shot timer running on its own service thread.
///
/// `arm` is a no-op while a shot is pending; the shot disarms itself right
/// before `on_fire` runs.
pub struct DebounceTimer {
    interval: Duration,
    shared: Arc<TimerShared>,
    worker: Option<JoinHandle<()>>,
}

impl DebounceTimer {
    pub fn new<F>(interval: Duration, on_fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState::default()),
            condvar: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("resize-debounce".into())
            .spawn(move || Self::run(&worker_shared, on_fire))
            .map_err(|e| error!("[Resize] Could not start debounce thread: {}", e))
            .ok();
        Self { interval, shared, worker }
    }

    fn run<F: Fn()>(shared: &TimerShared, on_fire: F) {
        let mut state = shared.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => shared.condvar.wait(&mut state),
                Some(deadline) if Instant::now() < deadline => {
                    let _ = shared.condvar.wait_until(&mut state, deadline);
                }
                Some(_) => {
                    state.deadline = None;
                    drop(state);
                    on_fire();
                    state = shared.state.lock();
                }
            }
        }
    }

    /// Returns `true` if this call armed the timer.
    pub fn arm(&self) -> bool {
        let mut state = self.shared.state.lock();
        if state.deadline.is_some() || self.worker.is_none() {
            return false;
        }
        state.deadline = Some(Instant::now() + self.interval);
        self.shared.condvar.notify_one();
        true
    }

    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    pub fn cancel(&self) {
        self.shared.state.lock().deadline = None;
        self.shared.condvar.notify_one();
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for DebounceTimer {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            state.deadline = None;
        }
        self.shared.condvar.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Per-instance resize policy.
///
/// With `resize == false` the coordinator is inert: no timer thread exists
/// and [`request_resize`](Self::request_resize) does nothing.
pub struct ResizeCoordinator {
    id: InstanceId,
    sys: Arc<dyn WindowSystem>,
    container: SurfaceHandle,
    window: Option<WindowHandle>,
    timer: Option<DebounceTimer>,
}

impl ResizeCoordinator {
    pub fn new(
        id: InstanceId,
        sys: Arc<dyn WindowSystem>,
        container: SurfaceHandle,
        resize: bool,
        interval: Duration,
        queue: CommandQueue,
    ) -> Self {
        let timer = resize.then(|| {
            DebounceTimer::new(interval, move || {
                queue.post(Command::ApplyContainerFill(id));
            })
        });
        Self { id, sys, container, window: None, timer }
    }

    /// Sets the window that fills the container.
    pub fn bind(&mut self, window: WindowHandle) {
        self.window = Some(window);
    }

    pub fn is_inert(&self) -> bool {
        self.timer.is_none()
    }

    /// The container's size may have changed. Returns `true` if a deferred
    /// fill was scheduled by this call.
    pub fn request_resize(&self) -> bool {
        match (&self.timer, self.window) {
            (Some(timer), Some(_)) => {
                let armed = timer.arm();
                if armed {
                    debug!("[Resize:{}] Fill scheduled in {:?}", self.id, timer.interval());
                }
                armed
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.timer.as_ref().is_some_and(DebounceTimer::is_pending)
    }

    pub fn cancel(&self) {
        if let Some(timer) = &self.timer {
            timer.cancel();
        }
    }

    /// Pins the window to the container origin at the container's client size.
    pub fn apply_container_fill(&self) -> NativeResult<()> {
        let Some(window) = self.window else {
            return Ok(());
        };
        if self.is_inert() {
            return Ok(());
        }
        let size = self.sys.surface_client_size(self.container)?;
        debug!(
            "[Resize:{}] Filling {} to {}×{}",
            self.id, window, size.width, size.height
        );
        self.sys
            .set_position(window, WindowRect::at_origin(size), PositionFlags::new())
    }
}
