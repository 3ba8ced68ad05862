//! Native window primitives.
//!
//! `WindowSystem` is the stateless controller the lifecycle drives: style bits,
//! bounding rectangles, parentage, positioning and the location-change
//! observer. `win32` implements it on Windows; tests use an in-memory fake.
//!
//! Every operation is synchronous and reports `NativeError::InvalidHandle`
//! when the window disappeared underneath it.

use std::{fmt, sync::Arc};

pub mod process;
#[cfg(windows)]
pub mod win32;

#[cfg(test)]
pub(crate) mod fake;

pub use process::{ChildProcess, ProcessLauncher, StdProcessLauncher};

/// A native top-level window owned by someone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub isize);

/// The host-provided surface an embedded window is reparented into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub isize);

/// Registration token of a location-change observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookHandle(pub isize);

impl WindowHandle {
    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Raw `GWL_STYLE` bits of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowStyle(pub u32);

impl WindowStyle {
    pub const DLGFRAME: u32 = 0x0040_0000;
    pub const BORDER: u32 = 0x0080_0000;
    pub const CAPTION: u32 = 0x00C0_0000;
    pub const SYSMENU: u32 = 0x0008_0000;
    pub const THICKFRAME: u32 = 0x0004_0000;
    pub const POPUP: u32 = 0x8000_0000;
    pub const VISIBLE: u32 = 0x1000_0000;

    /// Title bar, resize grips, system menu and dialog frame.
    pub const DECORATIONS: u32 =
        Self::CAPTION | Self::THICKFRAME | Self::POPUP | Self::SYSMENU | Self::DLGFRAME;

    /// Clears the decoration bits and leaves every other bit alone.
    pub fn stripped(self) -> Self {
        WindowStyle(self.0 & !Self::DECORATIONS)
    }

    pub fn has_any_decoration(self) -> bool {
        self.0 & Self::DECORATIONS != 0
    }
}

/// Bounding rectangle; screen coordinates for top-level windows,
/// parent-client coordinates once reparented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowRect {
    pub left: i32,
    pub top: i32,
    pub width: i32,
    pub height: i32,
}

impl WindowRect {
    pub fn new(left: i32, top: i32, width: i32, height: i32) -> Self {
        Self { left, top, width, height }
    }

    pub fn at_origin(size: Size) -> Self {
        Self::new(0, 0, size.width, size.height)
    }

    pub fn size(&self) -> Size {
        Size { width: self.width, height: self.height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Size {
    pub width: i32,
    pub height: i32,
}

impl Size {
    pub fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// `SetWindowPos` flags. Every value carries "no z-order" and "no activate".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionFlags(u32);

impl PositionFlags {
    pub const NO_ZORDER: u32 = 0x0004;
    pub const NO_ACTIVATE: u32 = 0x0010;
    pub const FRAME_CHANGED: u32 = 0x0020;

    pub fn new() -> Self {
        PositionFlags(Self::NO_ZORDER | Self::NO_ACTIVATE)
    }

    /// Makes the OS recompute the non-client area after a style change.
    pub fn frame_changed(self) -> Self {
        PositionFlags(self.0 | Self::FRAME_CHANGED)
    }

    pub fn bits(self) -> u32 {
        self.0
    }
}

impl Default for PositionFlags {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NativeError {
    /// The window was destroyed (closed by the user or its process exited).
    InvalidHandle,
    Os { call: &'static str, code: u32 },
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeError::InvalidHandle => write!(f, "window handle is no longer valid"),
            NativeError::Os { call, code } => write!(f, "{} failed with OS error {}", call, code),
        }
    }
}

impl std::error::Error for NativeError {}

pub type NativeResult<T> = Result<T, NativeError>;

/// Invoked from the OS event-delivery context whenever the observed window's
/// bounds change. Must only marshal; never touch window state directly.
pub type LocationCallback = Arc<dyn Fn(WindowHandle) + Send + Sync>;

pub trait WindowSystem: Send + Sync {
    fn is_window(&self, handle: WindowHandle) -> bool;

    fn get_style(&self, handle: WindowHandle) -> NativeResult<WindowStyle>;
    fn set_style(&self, handle: WindowHandle, style: WindowStyle) -> NativeResult<()>;

    fn get_rect(&self, handle: WindowHandle) -> NativeResult<WindowRect>;

    /// Moves the window under `parent`, or back to the desktop on `None`.
    fn reparent(&self, handle: WindowHandle, parent: Option<SurfaceHandle>) -> NativeResult<()>;

    fn set_position(
        &self,
        handle: WindowHandle,
        rect: WindowRect,
        flags: PositionFlags,
    ) -> NativeResult<()>;

    fn surface_client_size(&self, surface: SurfaceHandle) -> NativeResult<Size>;
    fn resize_surface(&self, surface: SurfaceHandle, size: Size) -> NativeResult<()>;

    /// Registers `callback` for location changes of `handle` only. The
    /// implementation keeps the callback alive until the matching
    /// `remove_location_observer` returns.
    fn install_location_observer(
        &self,
        handle: WindowHandle,
        callback: LocationCallback,
    ) -> NativeResult<HookHandle>;

    /// Idempotent. Once this returns the callback is never invoked again.
    fn remove_location_observer(&self, hook: HookHandle);

    /// Asks the application to close through its standard affordance.
    fn request_close(&self, handle: WindowHandle) -> NativeResult<()>;

    /// First visible, unowned top-level window of the process.
    fn main_window_of(&self, pid: u32) -> Option<WindowHandle>;

    /// Direct child processes, in ascending process id order.
    fn child_processes(&self, pid: u32) -> Vec<u32>;

    /// Root ancestor of the window under a screen point.
    fn root_window_at(&self, point: ScreenPoint) -> Option<WindowHandle>;
}
