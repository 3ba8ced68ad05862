//! Error taxonomy shared by the locator, the lifecycle state machine and the host.

use std::{io, path::PathBuf, time::Duration};

use crate::host::InstanceId;
use crate::lifecycle::LifecycleState;
use crate::platform::NativeError;

#[derive(Debug)]
pub enum EmbedError {
    /// The executable could not be started.
    LaunchFailure { path: PathBuf, source: io::Error },
    /// No usable window appeared within the allowed load time.
    WindowTimeout { path: PathBuf, waited: Duration },
    /// A native call observed a window that no longer exists.
    HandleInvalidated,
    /// The location-change observer could not be registered.
    HookInstallFailure(String),
    /// A native call failed for a reason other than a stale handle.
    Native(NativeError),
    /// The operation is not valid in the instance's current state.
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
    /// The host has no instance with this id.
    UnknownInstance(InstanceId),
}

impl std::fmt::Display for EmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedError::LaunchFailure { path, source } => {
                write!(f, "Error starting '{}': {}", path.display(), source)
            }
            EmbedError::WindowTimeout { path, waited } => write!(
                f,
                "Error waiting for MainWindow of '{}' (gave up after {:?})",
                path.display(),
                waited
            ),
            EmbedError::HandleInvalidated => {
                write!(f, "The embedded window was closed or its process exited.")
            }
            EmbedError::HookInstallFailure(s) => {
                write!(f, "Location observer could not be installed: {}", s)
            }
            EmbedError::Native(e) => write!(f, "Native window operation failed: {}", e),
            EmbedError::InvalidState { operation, state } => {
                write!(f, "Cannot {} while instance is {:?}", operation, state)
            }
            EmbedError::UnknownInstance(id) => write!(f, "No embedded instance with id {}", id),
        }
    }
}

impl std::error::Error for EmbedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EmbedError::LaunchFailure { source, .. } => Some(source),
            EmbedError::Native(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NativeError> for EmbedError {
    fn from(e: NativeError) -> Self {
        match e {
            NativeError::InvalidHandle => EmbedError::HandleInvalidated,
            other => EmbedError::Native(other),
        }
    }
}

impl EmbedError {
    /// Launch and window-discovery failures are the only ones shown to the user.
    pub fn is_user_visible(&self) -> bool {
        matches!(
            self,
            EmbedError::LaunchFailure { .. } | EmbedError::WindowTimeout { .. }
        )
    }
}
