//! Spawning external executables and observing the processes we own.

use std::{
    fmt, io,
    process::{Child, Command},
};

use log::{debug, info, warn};

use crate::app_spec::ApplicationSpec;

/// A process the core launched itself and may therefore terminate.
pub trait ChildProcess: Send + fmt::Debug {
    fn id(&self) -> u32;
    fn has_exited(&mut self) -> bool;
    fn kill(&mut self) -> io::Result<()>;
}

pub trait ProcessLauncher: Send + Sync {
    fn spawn(&self, spec: &ApplicationSpec) -> io::Result<Box<dyn ChildProcess>>;
}

/// Launches through `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdProcessLauncher;

impl ProcessLauncher for StdProcessLauncher {
    fn spawn(&self, spec: &ApplicationSpec) -> io::Result<Box<dyn ChildProcess>> {
        let mut cmd = Command::new(&spec.path);
        push_arguments(&mut cmd, &spec.arguments);
        if let Some(dir) = spec.effective_work_directory() {
            cmd.current_dir(dir);
        }
        debug!("[Process] Spawning {:?}", cmd);
        let child = cmd.spawn()?;
        info!("[Process] Started '{}' as pid {}", spec.path.display(), child.id());
        Ok(Box::new(StdChild(child)))
    }
}

// The argument string is a single command line, handed to the OS untouched.
#[cfg(windows)]
fn push_arguments(cmd: &mut Command, arguments: &str) {
    use std::os::windows::process::CommandExt;
    if !arguments.trim().is_empty() {
        cmd.raw_arg(arguments);
    }
}

#[cfg(not(windows))]
fn push_arguments(cmd: &mut Command, arguments: &str) {
    cmd.args(arguments.split_whitespace());
}

#[derive(Debug)]
struct StdChild(Child);

impl ChildProcess for StdChild {
    fn id(&self) -> u32 {
        self.0.id()
    }

    fn has_exited(&mut self) -> bool {
        match self.0.try_wait() {
            Ok(Some(status)) => {
                debug!("[Process] pid {} exited with {}", self.0.id(), status);
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!("[Process] Could not poll pid {}: {}", self.0.id(), e);
                false
            }
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        self.0.kill()?;
        // reap so the handle does not linger as a zombie
        let _ = self.0.wait();
        Ok(())
    }
}
