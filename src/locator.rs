//! Finding the window a launched (or foreign) process presents.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::constants;
use crate::platform::{ChildProcess, WindowHandle, WindowSystem};

/// Which process windows qualify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateCriteria {
    /// The main window of the process itself.
    MainWindow(u32),
    /// The main window of any direct child process.
    ChildProcessWindow(u32),
    /// The process's own main window first, then its children's, per tick.
    ProcessTree(u32),
}

impl LocateCriteria {
    fn pid(self) -> u32 {
        match self {
            LocateCriteria::MainWindow(pid)
            | LocateCriteria::ChildProcessWindow(pid)
            | LocateCriteria::ProcessTree(pid) => pid,
        }
    }

    fn includes_children(self) -> bool {
        !matches!(self, LocateCriteria::MainWindow(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateError {
    Timeout {
        waited: Duration,
        /// The process was seen exiting without leaving children behind.
        process_exited: bool,
    },
    Cancelled,
}

pub struct WindowLocator<'a> {
    sys: &'a dyn WindowSystem,
    poll_interval: Duration,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> WindowLocator<'a> {
    pub fn new(sys: &'a dyn WindowSystem) -> Self {
        Self {
            sys,
            poll_interval: constants::LOCATE_POLL_INTERVAL,
            cancel: None,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Aborts the wait as soon as `flag` becomes true.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// One poll tick. The process's own window beats any child's.
    pub fn probe(&self, criteria: LocateCriteria) -> Option<WindowHandle> {
        let pid = criteria.pid();
        if !matches!(criteria, LocateCriteria::ChildProcessWindow(_)) {
            if let Some(h) = self.sys.main_window_of(pid) {
                return Some(h);
            }
        }
        if criteria.includes_children() {
            for child in self.sys.child_processes(pid) {
                if let Some(h) = self.sys.main_window_of(child) {
                    debug!("[Locator] Window {} belongs to child pid {}", h, child);
                    return Some(h);
                }
            }
        }
        None
    }

    /// Polls until a window shows up or `timeout` elapses.
    ///
    /// With `process` given, a process that exited and has no children left
    /// fails the wait early with the same `Timeout` kind.
    pub fn locate(
        &self,
        criteria: LocateCriteria,
        timeout: Duration,
        mut process: Option<&mut dyn ChildProcess>,
    ) -> Result<WindowHandle, LocateError> {
        let start = Instant::now();
        debug!("[Locator] Waiting up to {:?} for {:?}", timeout, criteria);
        loop {
            if self.is_cancelled() {
                info!("[Locator] Wait for {:?} cancelled", criteria);
                return Err(LocateError::Cancelled);
            }
            if let Some(h) = self.probe(criteria) {
                info!("[Locator] Found window {} after {:?}", h, start.elapsed());
                return Ok(h);
            }
            if let Some(p) = process.as_deref_mut() {
                let orphaned = !criteria.includes_children()
                    || self.sys.child_processes(criteria.pid()).is_empty();
                if p.has_exited() && orphaned {
                    warn!(
                        "[Locator] pid {} exited before showing a window",
                        criteria.pid()
                    );
                    return Err(LocateError::Timeout {
                        waited: start.elapsed(),
                        process_exited: true,
                    });
                }
            }
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!("[Locator] No window for {:?} within {:?}", criteria, timeout);
                return Err(LocateError::Timeout { waited: elapsed, process_exited: false });
            }
            thread::sleep(self.poll_interval.min(timeout - elapsed));
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::SeqCst))
    }
}
