//! Embeds the top-level windows of external applications into host containers.
//!
//! - Launches a catalog entry, or adopts an already running window
//! - Finds the window the process presents, then strips and reparents it
//! - Keeps it sized to its container and restores it on detach
//! - Marshals timer and OS callbacks onto the owner thread

pub mod app_spec;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod lifecycle;
pub mod locator;
pub mod platform;
pub mod resize;

#[cfg(windows)]
pub mod host_window;

use std::sync::Once;

use env_logger::{Builder, Env};

pub use app_spec::ApplicationSpec;
pub use config::{CatalogItem, ConfigLoader};
pub use dispatch::{Command, CommandQueue, Waker};
pub use error::EmbedError;
pub use host::{EmbeddingHost, InstanceId, LaunchOutcome};
pub use lifecycle::{
    EmbeddedInstance, LifecycleContext, LifecycleOptions, LifecycleState, RemovalListener,
    RemovalReason,
};
pub use locator::{LocateCriteria, LocateError, WindowLocator};
pub use platform::{
    ScreenPoint, Size, SurfaceHandle, WindowHandle, WindowRect, WindowStyle, WindowSystem,
};

// a shell may build more than one host per process; env_logger panics on a
// second init, so it only ever happens once
static LOGGER_INIT: Once = Once::new();

/// Installs the `env_logger` backend. Defaults to `debug`; `RUST_LOG` overrides.
pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        let _ = Builder::from_env(Env::default().default_filter_or("debug")).try_init();
    });
}
