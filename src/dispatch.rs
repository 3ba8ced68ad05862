//! Marshaling work from foreign threads onto the owner (UI) thread.
//!
//! The debounce timer thread, the OS observer callback and background window
//! lookups never touch window or container state. They post a [`Command`]
//! here and wake the owner's event loop, which drains the queue and applies
//! each command on its own thread.

use std::{cell::RefCell, collections::VecDeque, fmt, sync::Arc, time::Duration};

use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::host::InstanceId;
use crate::locator::LocateError;
use crate::platform::{ChildProcess, WindowHandle};

/// Nudges the owner thread's event loop; called from any thread.
pub trait Waker: Send + Sync {
    fn wake(&self);
}

/// For owners that block in [`CommandQueue::wait`] instead of an event loop.
#[derive(Debug, Default)]
pub struct NoopWaker;

impl Waker for NoopWaker {
    fn wake(&self) {}
}

pub enum Command {
    /// The resize debounce interval elapsed.
    ApplyContainerFill(InstanceId),
    /// The embedded window reported new bounds.
    LocationChanged(InstanceId, WindowHandle),
    /// A background lookup finished; the process comes back with it.
    WindowLocated {
        id: InstanceId,
        result: Result<WindowHandle, LocateError>,
        process: Box<dyn ChildProcess>,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::ApplyContainerFill(id) => write!(f, "ApplyContainerFill({})", id),
            Command::LocationChanged(id, h) => write!(f, "LocationChanged({}, {})", id, h),
            Command::WindowLocated { id, result, .. } => {
                write!(f, "WindowLocated({}, {:?})", id, result)
            }
        }
    }
}

struct Inner {
    queue: Mutex<VecDeque<Command>>,
    condvar: Condvar,
    waker: Box<dyn Waker>,
}

/// Multi-producer queue consumed on the owner thread. Cheap to clone.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub fn new(waker: Box<dyn Waker>) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(VecDeque::new()),
                condvar: Condvar::new(),
                waker,
            }),
        }
    }

    pub fn post(&self, command: Command) {
        debug!("[Dispatch] post {:?}", command);
        self.inner.queue.lock().push_back(command);
        self.inner.condvar.notify_one();
        self.inner.waker.wake();
    }

    /// Takes everything queued so far, in posting order.
    pub fn drain(&self) -> Vec<Command> {
        self.inner.queue.lock().drain(..).collect()
    }

    /// Blocks until at least one command is queued or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Vec<Command> {
        let mut queue = self.inner.queue.lock();
        if queue.is_empty() {
            let _ = self.inner.condvar.wait_for(&mut queue, timeout);
        }
        queue.drain(..).collect()
    }

    /// Blocks until something is queued or `timeout` elapses, leaving the
    /// commands in place for [`drain`](Self::drain). Returns whether any are.
    pub fn wait_for_any(&self, timeout: Duration) -> bool {
        let mut queue = self.inner.queue.lock();
        if queue.is_empty() {
            let _ = self.inner.condvar.wait_for(&mut queue, timeout);
        }
        !queue.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(Box::new(NoopWaker))
    }
}

/// Owner-thread state reached from callbacks that may nest, such as a window
/// procedure re-entered by a modal loop. A nested callback never sees the
/// state while an outer one holds it; deferrable work is queued and runs as
/// soon as the outer borrow ends.
pub struct ReentrantState<T> {
    value: RefCell<T>,
    pending: RefCell<Vec<fn(&mut T)>>,
}

impl<T> ReentrantState<T> {
    pub fn new(value: T) -> Self {
        Self { value: RefCell::new(value), pending: RefCell::new(Vec::new()) }
    }

    /// Runs `f` unless the state is already borrowed, then any deferred work.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let result = {
            let mut value = self.value.try_borrow_mut().ok()?;
            f(&mut value)
        };
        self.run_pending();
        Some(result)
    }

    /// Runs `f` now, or once the current holder is done. Repeated deferrals
    /// of the same function collapse into one run.
    pub fn with_or_defer(&self, f: fn(&mut T)) {
        if self.try_with(f).is_none() {
            debug!("[Dispatch] State busy; deferring");
            let mut pending = self.pending.borrow_mut();
            if !pending.iter().any(|g| std::ptr::fn_addr_eq(*g, f)) {
                pending.push(f);
            }
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.borrow().is_empty()
    }

    fn run_pending(&self) {
        loop {
            let batch: Vec<_> = self.pending.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                return;
            }
            let Ok(mut value) = self.value.try_borrow_mut() else {
                self.pending.borrow_mut().splice(0..0, batch);
                return;
            };
            for f in batch {
                f(&mut value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingWaker(Arc<AtomicUsize>);

    impl Waker for CountingWaker {
        fn wake(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn posts_from_other_threads_arrive_in_order_and_wake() {
        let wakes = Arc::new(AtomicUsize::new(0));
        let queue = CommandQueue::new(Box::new(CountingWaker(wakes.clone())));
        let producer = queue.clone();
        thread::spawn(move || {
            producer.post(Command::ApplyContainerFill(InstanceId(1)));
            producer.post(Command::ApplyContainerFill(InstanceId(2)));
        })
        .join()
        .unwrap();

        let ids: Vec<_> = queue
            .drain()
            .into_iter()
            .map(|c| match c {
                Command::ApplyContainerFill(id) => id,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec![InstanceId(1), InstanceId(2)]);
        assert_eq!(wakes.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn wait_returns_empty_after_timeout() {
        let queue = CommandQueue::default();
        assert!(queue.wait(Duration::from_millis(10)).is_empty());
    }

    #[test]
    fn wait_for_any_leaves_commands_queued() {
        let queue = CommandQueue::default();
        assert!(!queue.wait_for_any(Duration::from_millis(10)));

        let producer = queue.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.post(Command::ApplyContainerFill(InstanceId(7)));
        });
        assert!(queue.wait_for_any(Duration::from_secs(2)));
        handle.join().unwrap();
        assert!(queue.wait_for_any(Duration::ZERO));
        assert_eq!(queue.drain().len(), 1);
    }

    #[derive(Default)]
    struct Shell {
        pumps: usize,
        layouts: usize,
    }

    fn pump(shell: &mut Shell) {
        shell.pumps += 1;
    }

    #[test]
    fn nested_work_is_deferred_until_the_outer_borrow_ends() {
        let state = ReentrantState::new(Shell::default());
        let outer = state.try_with(|shell| {
            shell.layouts += 1;
            // a nested dispatch while the outer handler runs
            state.with_or_defer(pump);
            state.with_or_defer(pump);
            assert!(state.try_with(|_| ()).is_none());
            assert!(state.has_pending());
            shell.pumps
        });
        assert_eq!(outer, Some(0));
        assert!(!state.has_pending());
        assert_eq!(state.try_with(|s| (s.layouts, s.pumps)), Some((1, 1)));
    }

    #[test]
    fn free_state_runs_work_at_once() {
        let state = ReentrantState::new(Shell::default());
        state.with_or_defer(pump);
        assert!(!state.has_pending());
        assert_eq!(state.try_with(|s| s.pumps), Some(1));
    }
}
