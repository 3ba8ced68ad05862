use std::time::Duration;

/// Quiet interval the resize debounce waits before applying container fill.
pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(500);

/// How long `locate` waits for a launched process to show a window.
pub const DEFAULT_MAX_LOAD_TIME: Duration = Duration::from_secs(5);

/// Poll period of the window locator. Kept above a few milliseconds so the
/// wait does not spin a core.
pub const LOCATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Time an owned process gets to honour a graceful close before it is killed.
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_secs(3);

/// Catalog file read at startup when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// Default width (in pixels) for the host window.
pub const DEFAULT_WINDOW_WIDTH: i32 = 1280;

/// Default height (in pixels) for the host window.
pub const DEFAULT_WINDOW_HEIGHT: i32 = 720;

#[cfg(windows)]
pub use win32::*;

#[cfg(windows)]
mod win32 {
    use windows::core::{w, PCWSTR};

    /// The Win32 window class name used for the host's main window.
    pub const WINDOW_CLASS_NAME: PCWSTR = w!("WINDOW_EMBEDDER_HOST");

    /// The Win32 window class name used for per-instance container panels.
    pub const CONTAINER_CLASS_NAME: PCWSTR = w!("WINDOW_EMBEDDER_CONTAINER");

    /// The Win32 window class name of the scrolling panel around a
    /// fixed-size container.
    pub const VIEWPORT_CLASS_NAME: PCWSTR = w!("WINDOW_EMBEDDER_VIEWPORT");

    /// Title text for the host window.
    pub const WINDOW_TITLE: PCWSTR = w!("Embedded App Viewer");
}
