//! Win32 implementation of [`WindowSystem`].
//!
//! Style rewriting goes through `GetWindowLongPtrW`/`SetWindowLongPtrW`,
//! reparenting through `SetParent`, and the location observer is an
//! out-of-context `SetWinEventHook` for `EVENT_OBJECT_LOCATIONCHANGE`,
//! limited to the process and thread that own the target window.
//!
//! The WinEvent callback is a plain `extern "system"` function without user
//! data, so observers live in a process-wide registry keyed by hook handle.
//! An entry is only removed after `UnhookWinEvent` returned, which keeps the
//! callback context alive for as long as the OS may call it.

use std::{collections::HashMap, ffi::c_void};

use log::{debug, error, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use windows::Win32::{
    Foundation::{
        BOOL, CloseHandle, ERROR_INVALID_WINDOW_HANDLE, GetLastError, HWND, LPARAM, POINT,
        RECT, SetLastError, WIN32_ERROR, WPARAM,
    },
    System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    },
    UI::{
        Accessibility::{HWINEVENTHOOK, SetWinEventHook, UnhookWinEvent},
        WindowsAndMessaging::{
            EVENT_OBJECT_LOCATIONCHANGE, EnumWindows, GA_ROOT, GW_OWNER, GWL_STYLE,
            GetAncestor, GetClientRect, GetWindow, GetWindowLongPtrW, GetWindowRect,
            GetWindowThreadProcessId, IsWindow, IsWindowVisible, OBJID_WINDOW, PostMessageW,
            SET_WINDOW_POS_FLAGS, SetParent, SetWindowLongPtrW, SetWindowPos,
            WINEVENT_OUTOFCONTEXT, WM_CLOSE, WindowFromPoint, WS_CAPTION, WS_DLGFRAME,
            WS_POPUP, WS_SYSMENU, WS_THICKFRAME,
        },
    },
};

use super::{
    HookHandle, LocationCallback, NativeError, NativeResult, PositionFlags, ScreenPoint, Size,
    SurfaceHandle, WindowHandle, WindowRect, WindowStyle, WindowSystem,
};

const _: () = {
    assert!(WindowStyle::CAPTION == WS_CAPTION.0);
    assert!(WindowStyle::THICKFRAME == WS_THICKFRAME.0);
    assert!(WindowStyle::POPUP == WS_POPUP.0);
    assert!(WindowStyle::SYSMENU == WS_SYSMENU.0);
    assert!(WindowStyle::DLGFRAME == WS_DLGFRAME.0);
};

const CHILDID_SELF: i32 = 0;

struct Observer {
    target: WindowHandle,
    callback: LocationCallback,
}

static OBSERVERS: Lazy<Mutex<HashMap<isize, Observer>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn hwnd(handle: WindowHandle) -> HWND {
    HWND(handle.0 as *mut c_void)
}

fn surface_hwnd(surface: SurfaceHandle) -> HWND {
    HWND(surface.0 as *mut c_void)
}

fn from_hwnd(h: HWND) -> Option<WindowHandle> {
    if h.0.is_null() {
        None
    } else {
        Some(WindowHandle(h.0 as isize))
    }
}

/// The real desktop window system.
#[derive(Debug, Default, Clone, Copy)]
pub struct Win32WindowSystem;

impl Win32WindowSystem {
    pub fn new() -> Self {
        Self
    }

    /// Classifies a failed call: a vanished window wins over the raw error code.
    fn fail(&self, handle: WindowHandle, call: &'static str, code: u32) -> NativeError {
        if !self.is_window(handle) || code == ERROR_INVALID_WINDOW_HANDLE.0 {
            debug!("[Win32] {} observed stale handle {}", call, handle);
            NativeError::InvalidHandle
        } else {
            warn!("[Win32] {} on {} failed: OS error {}", call, handle, code);
            NativeError::Os { call, code }
        }
    }

    fn ensure_window(&self, handle: WindowHandle) -> NativeResult<()> {
        if self.is_window(handle) {
            Ok(())
        } else {
            Err(NativeError::InvalidHandle)
        }
    }
}

impl WindowSystem for Win32WindowSystem {
    fn is_window(&self, handle: WindowHandle) -> bool {
        !handle.is_null() && unsafe { IsWindow(Some(hwnd(handle))) }.as_bool()
    }

    fn get_style(&self, handle: WindowHandle) -> NativeResult<WindowStyle> {
        self.ensure_window(handle)?;
        unsafe { SetLastError(WIN32_ERROR(0)) };
        let raw = unsafe { GetWindowLongPtrW(hwnd(handle), GWL_STYLE) };
        if raw == 0 {
            let err = unsafe { GetLastError() };
            if err.0 != 0 {
                return Err(self.fail(handle, "GetWindowLongPtrW", err.0));
            }
        }
        Ok(WindowStyle(raw as u32))
    }

    fn set_style(&self, handle: WindowHandle, style: WindowStyle) -> NativeResult<()> {
        self.ensure_window(handle)?;
        unsafe { SetLastError(WIN32_ERROR(0)) };
        let old = unsafe { SetWindowLongPtrW(hwnd(handle), GWL_STYLE, style.0 as isize) };
        if old == 0 {
            let err = unsafe { GetLastError() };
            if err.0 != 0 {
                return Err(self.fail(handle, "SetWindowLongPtrW", err.0));
            }
        }
        debug!("[Win32] Style of {} {:#x} → {:#x}", handle, old, style.0);
        Ok(())
    }

    fn get_rect(&self, handle: WindowHandle) -> NativeResult<WindowRect> {
        let mut rc = RECT::default();
        unsafe { GetWindowRect(hwnd(handle), &mut rc) }
            .map_err(|e| self.fail(handle, "GetWindowRect", e.code().0 as u32))?;
        Ok(WindowRect::new(rc.left, rc.top, rc.right - rc.left, rc.bottom - rc.top))
    }

    fn reparent(&self, handle: WindowHandle, parent: Option<SurfaceHandle>) -> NativeResult<()> {
        self.ensure_window(handle)?;
        let new_parent = parent.map(surface_hwnd);
        match unsafe { SetParent(hwnd(handle), new_parent) } {
            Ok(prev) => {
                debug!(
                    "[Win32] Reparented {} from {:?} to {:?}",
                    handle, prev, new_parent
                );
                Ok(())
            }
            Err(e) => {
                // SetParent reports a null previous parent as failure when the
                // window was top-level; only trust the error if the code is set.
                let code = unsafe { GetLastError() };
                if code.0 == 0 {
                    Ok(())
                } else {
                    debug!("[Win32] SetParent error: {:?}", e);
                    Err(self.fail(handle, "SetParent", code.0))
                }
            }
        }
    }

    fn set_position(
        &self,
        handle: WindowHandle,
        rect: WindowRect,
        flags: PositionFlags,
    ) -> NativeResult<()> {
        unsafe {
            SetWindowPos(
                hwnd(handle),
                None,
                rect.left,
                rect.top,
                rect.width,
                rect.height,
                SET_WINDOW_POS_FLAGS(flags.bits()),
            )
        }
        .map_err(|e| self.fail(handle, "SetWindowPos", e.code().0 as u32))
    }

    fn surface_client_size(&self, surface: SurfaceHandle) -> NativeResult<Size> {
        let mut rc = RECT::default();
        unsafe { GetClientRect(surface_hwnd(surface), &mut rc) }.map_err(|e| {
            error!("[Win32] GetClientRect on container {:?} failed: {:?}", surface, e);
            NativeError::Os { call: "GetClientRect", code: e.code().0 as u32 }
        })?;
        Ok(Size::new(rc.right - rc.left, rc.bottom - rc.top))
    }

    fn resize_surface(&self, surface: SurfaceHandle, size: Size) -> NativeResult<()> {
        unsafe {
            SetWindowPos(
                surface_hwnd(surface),
                None,
                0,
                0,
                size.width,
                size.height,
                SET_WINDOW_POS_FLAGS(PositionFlags::new().bits()),
            )
        }
        .map_err(|e| NativeError::Os { call: "SetWindowPos", code: e.code().0 as u32 })
    }

    fn install_location_observer(
        &self,
        handle: WindowHandle,
        callback: LocationCallback,
    ) -> NativeResult<HookHandle> {
        self.ensure_window(handle)?;
        // Out-of-context hooks are delivered through the installing thread's
        // message loop, so no callback can run before the entry is inserted.
        let mut pid = 0u32;
        let tid = unsafe { GetWindowThreadProcessId(hwnd(handle), Some(&mut pid)) };
        if tid == 0 {
            return Err(NativeError::InvalidHandle);
        }
        // scoped to the target's thread; the callback still filters by hwnd
        let mut observers = OBSERVERS.lock();
        let hook = unsafe {
            SetWinEventHook(
                EVENT_OBJECT_LOCATIONCHANGE,
                EVENT_OBJECT_LOCATIONCHANGE,
                None,
                Some(win_event_proc),
                pid,
                tid,
                WINEVENT_OUTOFCONTEXT,
            )
        };
        if hook.0.is_null() {
            let code = unsafe { GetLastError() };
            return Err(NativeError::Os { call: "SetWinEventHook", code: code.0 });
        }
        let key = hook.0 as isize;
        observers.insert(key, Observer { target: handle, callback });
        debug!("[Win32] Location observer {:#x} installed for {}", key, handle);
        Ok(HookHandle(key))
    }

    fn remove_location_observer(&self, hook: HookHandle) {
        let registered = OBSERVERS.lock().contains_key(&hook.0);
        if !registered {
            return;
        }
        let ok = unsafe { UnhookWinEvent(HWINEVENTHOOK(hook.0 as *mut c_void)) }.as_bool();
        if !ok {
            warn!("[Win32] UnhookWinEvent({:#x}) reported failure", hook.0);
        }
        OBSERVERS.lock().remove(&hook.0);
        debug!("[Win32] Location observer {:#x} removed", hook.0);
    }

    fn request_close(&self, handle: WindowHandle) -> NativeResult<()> {
        self.ensure_window(handle)?;
        unsafe { PostMessageW(Some(hwnd(handle)), WM_CLOSE, WPARAM(0), LPARAM(0)) }
            .map_err(|e| self.fail(handle, "PostMessageW", e.code().0 as u32))
    }

    fn main_window_of(&self, pid: u32) -> Option<WindowHandle> {
        let mut search = MainWindowSearch { pid, found: None };
        let _ = unsafe {
            EnumWindows(
                Some(enum_main_window_proc),
                LPARAM(&mut search as *mut MainWindowSearch as isize),
            )
        };
        search.found
    }

    fn child_processes(&self, pid: u32) -> Vec<u32> {
        let mut children = Vec::new();
        let snapshot = match unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) } {
            Ok(s) => s,
            Err(e) => {
                warn!("[Win32] CreateToolhelp32Snapshot failed: {:?}", e);
                return children;
            }
        };
        let mut entry = PROCESSENTRY32W {
            dwSize: std::mem::size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };
        unsafe {
            if Process32FirstW(snapshot, &mut entry).is_ok() {
                loop {
                    if entry.th32ParentProcessID == pid && entry.th32ProcessID != pid {
                        children.push(entry.th32ProcessID);
                    }
                    if Process32NextW(snapshot, &mut entry).is_err() {
                        break;
                    }
                }
            }
            let _ = CloseHandle(snapshot);
        }
        children.sort_unstable();
        children
    }

    fn root_window_at(&self, point: ScreenPoint) -> Option<WindowHandle> {
        let hit = unsafe { WindowFromPoint(POINT { x: point.x, y: point.y }) };
        if hit.0.is_null() {
            return None;
        }
        from_hwnd(unsafe { GetAncestor(hit, GA_ROOT) })
    }
}

struct MainWindowSearch {
    pid: u32,
    found: Option<WindowHandle>,
}

unsafe extern "system" fn enum_main_window_proc(h: HWND, lparam: LPARAM) -> BOOL {
    unsafe {
        let search = &mut *(lparam.0 as *mut MainWindowSearch);
        let mut owner_pid = 0u32;
        GetWindowThreadProcessId(h, Some(&mut owner_pid));
        if owner_pid != search.pid || !IsWindowVisible(h).as_bool() {
            return BOOL(1);
        }
        let unowned = GetWindow(h, GW_OWNER).map_or(true, |o| o.0.is_null());
        if unowned {
            search.found = from_hwnd(h);
            return BOOL(0);
        }
        BOOL(1)
    }
}

unsafe extern "system" fn win_event_proc(
    hook: HWINEVENTHOOK,
    event: u32,
    h: HWND,
    id_object: i32,
    id_child: i32,
    _event_thread: u32,
    _event_time: u32,
) {
    if event != EVENT_OBJECT_LOCATIONCHANGE
        || id_object != OBJID_WINDOW.0
        || id_child != CHILDID_SELF
        || h.0.is_null()
    {
        return;
    }
    let callback = {
        let observers = OBSERVERS.lock();
        match observers.get(&(hook.0 as isize)) {
            Some(o) if o.target.0 == h.0 as isize => o.callback.clone(),
            _ => return,
        }
    };
    callback(WindowHandle(h.0 as isize));
}
