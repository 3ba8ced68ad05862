//! Win32 shell around an [`EmbeddingHost`]: one top-level window whose
//! client area holds a container panel per instance.
//!
//! ## Handled Messages
//!
//! - **WM_COMMAND**: catalog launches and the Window menu.
//! - **WM_SIZE**: refit the containers, then `request_resize` each instance.
//! - **WM_LBUTTONUP**: finishes a drag-select started from the menu.
//! - **WM_DRAIN_COMMANDS**: posted by the queue waker; pumps the host.
//! - **WM_SHOW_ERRORS**: shows queued launch errors once no handler runs.
//! - **WM_CLOSE**: detach what is still embedded so the apps survive us.
//! - **WM_DESTROY**: post `WM_QUIT`; `run` frees the shell afterwards.
//!
//! The shell state sits in a [`ReentrantState`]. A drain or resize that
//! arrives while a handler further up the stack holds it (a nested modal
//! loop, a message sent from another thread) runs once that handler returns.

use std::{
    cell::Cell,
    collections::BTreeMap,
    ffi::{OsStr, c_void},
    os::windows::ffi::OsStrExt,
    sync::Arc,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use windows::{
    core::PCWSTR,
    Win32::{
        Foundation::{GetLastError, HWND, LPARAM, LRESULT, POINT, RECT, WPARAM},
        Graphics::Gdi::HBRUSH,
        System::LibraryLoader::GetModuleHandleW,
        UI::{
            Input::KeyboardAndMouse::{ReleaseCapture, SetCapture},
            WindowsAndMessaging::{
                AppendMenuW, CS_HREDRAW, CS_VREDRAW, CreateMenu, CreatePopupMenu,
                CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GW_CHILD,
                GWLP_USERDATA, GetClientRect, GetCursorPos, GetMessageW, GetScrollInfo,
                GetWindow, GetWindowLongPtrW, HICON, HMENU, IDC_ARROW, LoadCursorW,
                MB_ICONERROR, MB_OK, MF_POPUP, MF_SEPARATOR, MF_STRING, MSG, MessageBoxW,
                PostMessageW, PostQuitMessage, RegisterClassW, SB_BOTTOM, SB_HORZ, SB_LINEDOWN,
                SB_LINEUP, SB_PAGEDOWN, SB_PAGEUP, SB_THUMBPOSITION, SB_THUMBTRACK, SB_TOP,
                SB_VERT, SCROLLBAR_COMMAND, SCROLLBAR_CONSTANTS, SCROLLINFO, SIF_ALL, SIF_PAGE,
                SIF_POS, SIF_RANGE, SW_HIDE, SW_SHOW, SWP_NOACTIVATE, SWP_NOSIZE, SWP_NOZORDER,
                SetMenu, SetScrollInfo, SetWindowLongPtrW, SetWindowPos, SetWindowTextW,
                ShowWindow, TranslateMessage, WINDOW_EX_STYLE, WINDOW_STYLE, WM_APP, WM_CLOSE,
                WM_COMMAND, WM_DESTROY, WM_HSCROLL, WM_LBUTTONUP, WM_SIZE, WM_VSCROLL,
                WNDCLASSW, WS_CHILD, WS_CLIPCHILDREN, WS_CLIPSIBLINGS, WS_HSCROLL,
                WS_OVERLAPPEDWINDOW, WS_VISIBLE, WS_VSCROLL,
            },
        },
    },
};

use crate::{
    app_spec::ApplicationSpec,
    config::CatalogItem,
    constants,
    dispatch::{CommandQueue, ReentrantState, Waker},
    error::EmbedError,
    host::{EmbeddingHost, InstanceId, LaunchOutcome},
    lifecycle::{
        LifecycleContext, LifecycleOptions, LifecycleState, RemovalListener, RemovalReason,
    },
    platform::{ScreenPoint, StdProcessLauncher, SurfaceHandle, WindowHandle, win32::Win32WindowSystem},
};

const WM_DRAIN_COMMANDS: u32 = WM_APP + 1;
const WM_SHOW_ERRORS: u32 = WM_APP + 2;

const TITLE: &str = "Embedded App Viewer";

const ID_NEXT: usize = 1;
const ID_DETACH: usize = 2;
const ID_CLOSE: usize = 3;
const ID_ATTACH: usize = 4;
const ID_LAUNCH_BASE: usize = 1000;

/// Pixels per scroll-bar arrow click in a viewport.
const SCROLL_LINE: i32 = 20;

/// Wakes the message loop from timer, hook and locator threads.
struct PostMessageWaker {
    hwnd: isize,
}

impl Waker for PostMessageWaker {
    fn wake(&self) {
        post(HWND(self.hwnd as *mut c_void), WM_DRAIN_COMMANDS);
    }
}

fn post(hwnd: HWND, msg: u32) {
    if let Err(e) = unsafe { PostMessageW(Some(hwnd), msg, WPARAM(0), LPARAM(0)) } {
        warn!("[HostWindow] Could not post {:#x}: {:?}", msg, e);
    }
}

#[derive(Default)]
struct RemovalLog(Mutex<Vec<(InstanceId, RemovalReason)>>);

impl RemovalListener for RemovalLog {
    fn instance_removed(&self, id: InstanceId, reason: RemovalReason) {
        self.0.lock().push((id, reason));
    }
}

struct Container {
    hwnd: HWND,
    /// Scrolling panel around a fixed-size container.
    viewport: Option<HWND>,
    name: String,
}

impl Container {
    /// The window laid out in the client area.
    fn outer(&self) -> HWND {
        self.viewport.unwrap_or(self.hwnd)
    }
}

struct ShellState {
    hwnd: HWND,
    host: EmbeddingHost,
    catalog: Vec<Arc<ApplicationSpec>>,
    containers: BTreeMap<InstanceId, Container>,
    active: Option<InstanceId>,
    removals: Arc<RemovalLog>,
    picking: bool,
    errors: Vec<String>,
}

impl ShellState {
    fn launch(&mut self, index: usize) {
        let Some(spec) = self.catalog.get(index).cloned() else {
            return;
        };
        let viewport = if spec.resize {
            None
        } else {
            match create_panel(self.hwnd, constants::VIEWPORT_CLASS_NAME, WS_HSCROLL | WS_VSCROLL) {
                Ok(v) => Some(v),
                Err(e) => {
                    error!("[HostWindow] {:#}", e);
                    return;
                }
            }
        };
        let container = match create_container(viewport.unwrap_or(self.hwnd)) {
            Ok(c) => c,
            Err(e) => {
                error!("[HostWindow] {:#}", e);
                if let Some(v) = viewport {
                    destroy(v);
                }
                return;
            }
        };
        let outer = viewport.unwrap_or(container);
        match self.host.launch(spec.clone(), surface(container)) {
            Ok(LaunchOutcome::Started(id)) => {
                self.containers
                    .insert(id, Container { hwnd: container, viewport, name: spec.name.clone() });
                self.activate(Some(id));
            }
            Ok(LaunchOutcome::AlreadyRunning(id)) => {
                destroy(outer);
                self.activate(Some(id));
            }
            Err(e) => {
                destroy(outer);
                self.report(&e);
            }
        }
        self.collect_removed();
    }

    fn begin_pick(&mut self) {
        info!("[HostWindow] Drag-select: release the mouse over a window to embed it");
        self.picking = true;
        unsafe {
            let _ = SetCapture(self.hwnd);
        }
    }

    fn finish_pick(&mut self) {
        self.picking = false;
        if let Err(e) = unsafe { ReleaseCapture() } {
            debug!("[HostWindow] ReleaseCapture: {:?}", e);
        }
        let mut pt = POINT::default();
        if let Err(e) = unsafe { GetCursorPos(&mut pt) } {
            warn!("[HostWindow] GetCursorPos failed: {:?}", e);
            return;
        }
        let container = match create_container(self.hwnd) {
            Ok(c) => c,
            Err(e) => {
                error!("[HostWindow] {:#}", e);
                return;
            }
        };
        let own = [WindowHandle(self.hwnd.0 as isize)];
        match self
            .host
            .attach_at_point(ScreenPoint { x: pt.x, y: pt.y }, surface(container), &own)
        {
            Ok(Some(id)) => {
                self.containers.insert(
                    id,
                    Container { hwnd: container, viewport: None, name: format!("Window {}", id) },
                );
                self.activate(Some(id));
            }
            Ok(None) => destroy(container),
            Err(e) => {
                destroy(container);
                warn!("[HostWindow] Attach failed: {}", e);
            }
        }
        self.collect_removed();
    }

    fn on_active(&mut self, op: fn(&mut EmbeddingHost, InstanceId) -> Result<(), EmbedError>) {
        let Some(id) = self.active else {
            return;
        };
        if let Err(e) = op(&mut self.host, id) {
            warn!("[HostWindow] Operation on {} failed: {}", id, e);
        }
        self.collect_removed();
    }

    fn next(&mut self) {
        let ids: Vec<_> = self.containers.keys().copied().collect();
        let next = match self.active.and_then(|a| ids.iter().position(|i| *i == a)) {
            Some(pos) => ids.get((pos + 1) % ids.len().max(1)).copied(),
            None => ids.first().copied(),
        };
        self.activate(next);
    }

    fn activate(&mut self, id: Option<InstanceId>) {
        self.active = id;
        let title = id
            .and_then(|i| self.containers.get(&i))
            .map_or_else(|| TITLE.to_string(), |c| format!("{} - {}", TITLE, c.name));
        let wide = to_wide(&title);
        let _ = unsafe { SetWindowTextW(self.hwnd, PCWSTR(wide.as_ptr())) };
        self.layout();
    }

    /// Shows the active container, fills the client area, and lets every
    /// resizing instance catch up after the debounce interval.
    fn layout(&mut self) {
        let mut rc = RECT::default();
        if unsafe { GetClientRect(self.hwnd, &mut rc) }.is_err() {
            return;
        }
        for (id, container) in &self.containers {
            let outer = container.outer();
            let visible = self.active == Some(*id);
            unsafe {
                let _ = ShowWindow(outer, if visible { SW_SHOW } else { SW_HIDE });
                let _ = SetWindowPos(
                    outer,
                    None,
                    0,
                    0,
                    rc.right - rc.left,
                    rc.bottom - rc.top,
                    SWP_NOZORDER | SWP_NOACTIVATE,
                );
            }
            match container.viewport {
                Some(viewport) => update_scrollbars(viewport, container.hwnd),
                None => {
                    let _ = self.host.request_resize(*id);
                }
            }
        }
    }

    fn pump(&mut self) {
        for (_, e) in self.host.pump() {
            self.report(&e);
        }
        self.collect_removed();
        // a fixed-size container only learns its size once the app is embedded
        for container in self.containers.values() {
            if let Some(viewport) = container.viewport {
                update_scrollbars(viewport, container.hwnd);
            }
        }
    }

    /// Retires containers whose instance left the host. A closing app may
    /// still sit in its container, so that one is only hidden.
    fn collect_removed(&mut self) {
        let removed: Vec<_> = self.removals.0.lock().drain(..).collect();
        if removed.is_empty() {
            return;
        }
        for (id, reason) in removed {
            let Some(container) = self.containers.remove(&id) else {
                continue;
            };
            debug!("[HostWindow] Retiring container of {} ({:?})", id, reason);
            if reason == RemovalReason::Closed {
                unsafe {
                    let _ = ShowWindow(container.outer(), SW_HIDE);
                }
            } else {
                destroy(container.outer());
            }
            if self.active == Some(id) {
                self.active = None;
            }
        }
        if self.active.is_none() {
            let first = self.containers.keys().next().copied();
            self.activate(first);
        }
    }

    /// Queues `e` for a message box shown after the current handler.
    fn report(&mut self, e: &EmbedError) {
        error!("[HostWindow] {}", e);
        if self.errors.is_empty() {
            post(self.hwnd, WM_SHOW_ERRORS);
        }
        self.errors.push(e.to_string());
    }

    fn detach_all(&mut self) {
        for id in self.host.ids() {
            let live = self
                .host
                .instance(id)
                .is_some_and(|i| i.state() == LifecycleState::Active);
            if live {
                if let Err(e) = self.host.detach(id) {
                    warn!("[HostWindow] Detaching {} on exit failed: {}", id, e);
                }
            }
        }
        self.collect_removed();
    }
}

/// What `GWLP_USERDATA` points at.
struct Shell {
    state: ReentrantState<ShellState>,
    showing_errors: Cell<bool>,
}

impl Shell {
    /// Shows queued errors without holding the state, since `MessageBoxW`
    /// runs a nested message loop.
    fn show_errors(&self, hwnd: HWND) {
        if self.showing_errors.replace(true) {
            return;
        }
        while let Some(errors) = self.state.try_with(|s| std::mem::take(&mut s.errors)) {
            if errors.is_empty() {
                break;
            }
            for text in errors {
                message_box(hwnd, &text);
            }
        }
        self.showing_errors.set(false);
    }
}

fn message_box(hwnd: HWND, text: &str) {
    let text = to_wide(text);
    let caption = to_wide(TITLE);
    unsafe {
        let _ = MessageBoxW(
            Some(hwnd),
            PCWSTR(text.as_ptr()),
            PCWSTR(caption.as_ptr()),
            MB_OK | MB_ICONERROR,
        );
    }
}

/// # Safety
/// Registered through `WNDCLASSW::lpfnWndProc`; `GWLP_USERDATA` is either
/// null or a `Shell` that `run` keeps alive until the message loop ends.
unsafe extern "system" fn wnd_proc(hwnd: HWND, msg: u32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    unsafe {
        let shell_ptr = GetWindowLongPtrW(hwnd, GWLP_USERDATA) as *const Shell;
        let Some(shell) = shell_ptr.as_ref() else {
            return DefWindowProcW(hwnd, msg, wparam, lparam);
        };
        match msg {
            WM_DRAIN_COMMANDS => {
                shell.state.with_or_defer(ShellState::pump);
                LRESULT(0)
            }
            WM_SIZE => {
                shell.state.with_or_defer(ShellState::layout);
                LRESULT(0)
            }
            WM_SHOW_ERRORS => {
                shell.show_errors(hwnd);
                LRESULT(0)
            }
            WM_COMMAND => {
                let command = wparam.0 & 0xFFFF;
                let handled = shell.state.try_with(|state| match command {
                    ID_NEXT => state.next(),
                    ID_DETACH => state.on_active(EmbeddingHost::detach),
                    ID_CLOSE => state.on_active(EmbeddingHost::close),
                    ID_ATTACH => state.begin_pick(),
                    id if id >= ID_LAUNCH_BASE => state.launch(id - ID_LAUNCH_BASE),
                    _ => {}
                });
                if handled.is_none() {
                    warn!("[HostWindow] Ignoring command {} while busy", command);
                }
                LRESULT(0)
            }
            WM_LBUTTONUP => {
                shell.state.try_with(|state| {
                    if state.picking {
                        state.finish_pick();
                    }
                });
                LRESULT(0)
            }
            WM_CLOSE => {
                info!("[HostWindow] WM_CLOSE → detaching embedded windows");
                shell.state.try_with(ShellState::detach_all);
                let _ = DestroyWindow(hwnd);
                LRESULT(0)
            }
            WM_DESTROY => {
                info!("[HostWindow] WM_DESTROY");
                SetWindowLongPtrW(hwnd, GWLP_USERDATA, 0);
                PostQuitMessage(0);
                LRESULT(0)
            }
            _ => DefWindowProcW(hwnd, msg, wparam, lparam),
        }
    }
}

unsafe extern "system" fn container_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) }
}

unsafe extern "system" fn viewport_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_HSCROLL => {
            scroll(hwnd, SB_HORZ, wparam);
            LRESULT(0)
        }
        WM_VSCROLL => {
            scroll(hwnd, SB_VERT, wparam);
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

fn scroll_info(mask: windows::Win32::UI::WindowsAndMessaging::SCROLLINFO_MASK) -> SCROLLINFO {
    SCROLLINFO {
        cbSize: std::mem::size_of::<SCROLLINFO>() as u32,
        fMask: mask,
        ..Default::default()
    }
}

/// Sets the scroll ranges of `viewport` from the size of `content`.
fn update_scrollbars(viewport: HWND, content: HWND) {
    let mut view = RECT::default();
    let mut inner = RECT::default();
    unsafe {
        if GetClientRect(viewport, &mut view).is_err() || GetClientRect(content, &mut inner).is_err() {
            return;
        }
    }
    for (bar, content_len, view_len) in [
        (SB_HORZ, inner.right - inner.left, view.right - view.left),
        (SB_VERT, inner.bottom - inner.top, view.bottom - view.top),
    ] {
        let mut si = scroll_info(SIF_RANGE | SIF_PAGE);
        si.nMin = 0;
        si.nMax = (content_len - 1).max(0);
        si.nPage = view_len.max(0) as u32;
        let _ = unsafe { SetScrollInfo(viewport, bar, &si, true) };
    }
    move_content(viewport);
}

fn scroll(viewport: HWND, bar: SCROLLBAR_CONSTANTS, wparam: WPARAM) {
    let mut si = scroll_info(SIF_ALL);
    if unsafe { GetScrollInfo(viewport, bar, &mut si) }.is_err() {
        return;
    }
    let max_pos = (si.nMax - si.nPage as i32 + 1).max(0);
    let pos = match SCROLLBAR_COMMAND((wparam.0 & 0xFFFF) as i32) {
        SB_LINEUP => si.nPos - SCROLL_LINE,
        SB_LINEDOWN => si.nPos + SCROLL_LINE,
        SB_PAGEUP => si.nPos - si.nPage as i32,
        SB_PAGEDOWN => si.nPos + si.nPage as i32,
        SB_THUMBTRACK | SB_THUMBPOSITION => si.nTrackPos,
        SB_TOP => 0,
        SB_BOTTOM => max_pos,
        _ => return,
    }
    .clamp(0, max_pos);
    let mut update = scroll_info(SIF_POS);
    update.nPos = pos;
    let _ = unsafe { SetScrollInfo(viewport, bar, &update, true) };
    move_content(viewport);
}

/// Offsets the viewport's only child by the current scroll positions.
fn move_content(viewport: HWND) {
    let Ok(content) = (unsafe { GetWindow(viewport, GW_CHILD) }) else {
        return;
    };
    let mut offset = [0i32; 2];
    for (slot, bar) in offset.iter_mut().zip([SB_HORZ, SB_VERT]) {
        let mut si = scroll_info(SIF_POS);
        if unsafe { GetScrollInfo(viewport, bar, &mut si) }.is_ok() {
            *slot = si.nPos;
        }
    }
    let _ = unsafe {
        SetWindowPos(
            content,
            None,
            -offset[0],
            -offset[1],
            0,
            0,
            SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE,
        )
    };
}

static WINDOW_CLASSES: OnceCell<Result<(), String>> = OnceCell::new();

/// Registers the window classes once; later calls return the first outcome.
fn register_window_classes() -> Result<()> {
    WINDOW_CLASSES
        .get_or_init(|| unsafe { register_classes_inner() }.map_err(|e| format!("{:#}", e)))
        .clone()
        .map_err(|e| anyhow!(e))
}

unsafe fn register_classes_inner() -> Result<()> {
    unsafe {
        let hinst = GetModuleHandleW(None).context("GetModuleHandleW failed")?;
        let cursor = LoadCursorW(None, IDC_ARROW).unwrap_or_default();
        for (class, proc_) in [
            (constants::WINDOW_CLASS_NAME, wnd_proc as WndProc),
            (constants::CONTAINER_CLASS_NAME, container_proc as WndProc),
            (constants::VIEWPORT_CLASS_NAME, viewport_proc as WndProc),
        ] {
            let wc = WNDCLASSW {
                hInstance: hinst.into(),
                lpszClassName: class,
                lpfnWndProc: Some(proc_),
                style: CS_HREDRAW | CS_VREDRAW,
                hCursor: cursor,
                hbrBackground: HBRUSH::default(),
                lpszMenuName: PCWSTR::null(),
                hIcon: HICON::default(),
                cbClsExtra: 0,
                cbWndExtra: 0,
            };
            if RegisterClassW(&wc) == 0 {
                return Err(anyhow!("RegisterClassW failed: {:?}", GetLastError()));
            }
        }
        info!("[HostWindow] Window classes registered");
        Ok(())
    }
}

type WndProc = unsafe extern "system" fn(HWND, u32, WPARAM, LPARAM) -> LRESULT;

fn create_main_window() -> Result<HWND> {
    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            constants::WINDOW_CLASS_NAME,
            constants::WINDOW_TITLE,
            WS_OVERLAPPEDWINDOW | WS_VISIBLE | WS_CLIPCHILDREN,
            100,
            100,
            constants::DEFAULT_WINDOW_WIDTH,
            constants::DEFAULT_WINDOW_HEIGHT,
            None,
            None,
            Some(GetModuleHandleW(None)?.into()),
            None,
        )
    }
    .context("CreateWindowExW failed for the host window")?;
    info!("[HostWindow] Main window created: {:?}", hwnd);
    Ok(hwnd)
}

fn create_container(parent: HWND) -> Result<HWND> {
    create_panel(parent, constants::CONTAINER_CLASS_NAME, WINDOW_STYLE::default())
}

/// A visible child filling `parent`'s client area.
fn create_panel(parent: HWND, class: PCWSTR, extra: WINDOW_STYLE) -> Result<HWND> {
    let mut rc = RECT::default();
    unsafe { GetClientRect(parent, &mut rc) }.context("GetClientRect on panel parent")?;
    let hwnd = unsafe {
        CreateWindowExW(
            WINDOW_EX_STYLE::default(),
            class,
            PCWSTR::null(),
            WS_CHILD | WS_VISIBLE | WS_CLIPCHILDREN | WS_CLIPSIBLINGS | extra,
            0,
            0,
            rc.right - rc.left,
            rc.bottom - rc.top,
            Some(parent),
            None,
            Some(GetModuleHandleW(None)?.into()),
            None,
        )
    }
    .context("CreateWindowExW failed for a panel")?;
    debug!("[HostWindow] Panel {:?} created under {:?}", hwnd, parent);
    Ok(hwnd)
}

fn destroy(hwnd: HWND) {
    if let Err(e) = unsafe { DestroyWindow(hwnd) } {
        debug!("[HostWindow] DestroyWindow({:?}): {:?}", hwnd, e);
    }
}

fn surface(hwnd: HWND) -> SurfaceHandle {
    SurfaceHandle(hwnd.0 as isize)
}

/// Builds the menu bar: the catalog tree as nested popups, then a Window menu.
fn build_menu(items: &[CatalogItem], catalog: &mut Vec<Arc<ApplicationSpec>>) -> Result<HMENU> {
    unsafe {
        let bar = CreateMenu()?;
        let apps = CreatePopupMenu()?;
        append_catalog(apps, items, catalog)?;
        append(bar, MF_POPUP, apps.0 as usize, "&Applications")?;

        let window = CreatePopupMenu()?;
        append(window, MF_STRING, ID_NEXT, "&Next instance")?;
        append(window, MF_STRING, ID_ATTACH, "&Attach window under cursor")?;
        AppendMenuW(window, MF_SEPARATOR, 0, PCWSTR::null())?;
        append(window, MF_STRING, ID_DETACH, "&Detach")?;
        append(window, MF_STRING, ID_CLOSE, "&Close")?;
        append(bar, MF_POPUP, window.0 as usize, "&Window")?;
        Ok(bar)
    }
}

fn append_catalog(
    menu: HMENU,
    items: &[CatalogItem],
    catalog: &mut Vec<Arc<ApplicationSpec>>,
) -> Result<()> {
    for item in items {
        if let Some(spec) = item.to_spec() {
            let id = ID_LAUNCH_BASE + catalog.len();
            catalog.push(spec);
            append(menu, MF_STRING, id, &item.name)?;
        }
        if !item.items.is_empty() || item.is_folder() {
            let sub = unsafe { CreatePopupMenu()? };
            append_catalog(sub, &item.items, catalog)?;
            append(menu, MF_POPUP, sub.0 as usize, &item.name)?;
        }
    }
    Ok(())
}

fn append(
    menu: HMENU,
    flags: windows::Win32::UI::WindowsAndMessaging::MENU_ITEM_FLAGS,
    id: usize,
    text: &str,
) -> Result<()> {
    let wide = to_wide(text);
    unsafe { AppendMenuW(menu, flags, id, PCWSTR(wide.as_ptr())) }
        .with_context(|| format!("AppendMenuW '{}'", text))
}

/// Creates the shell, runs the message loop until the window closes.
pub fn run(items: &[CatalogItem]) -> Result<()> {
    register_window_classes()?;
    let hwnd = create_main_window()?;

    let mut catalog = Vec::new();
    let menu = build_menu(items, &mut catalog)?;
    unsafe { SetMenu(hwnd, Some(menu)) }.context("SetMenu")?;
    info!("[HostWindow] {} application(s) in the catalog", catalog.len());

    let removals = Arc::new(RemovalLog::default());
    let ctx = LifecycleContext {
        sys: Arc::new(Win32WindowSystem::new()),
        launcher: Arc::new(StdProcessLauncher),
        queue: CommandQueue::new(Box::new(PostMessageWaker { hwnd: hwnd.0 as isize })),
        listener: removals.clone(),
        options: LifecycleOptions::default(),
    };
    let shell = Box::into_raw(Box::new(Shell {
        state: ReentrantState::new(ShellState {
            hwnd,
            host: EmbeddingHost::new(ctx),
            catalog,
            containers: BTreeMap::new(),
            active: None,
            removals,
            picking: false,
            errors: Vec::new(),
        }),
        showing_errors: Cell::new(false),
    }));
    unsafe { SetWindowLongPtrW(hwnd, GWLP_USERDATA, shell as isize) };

    run_message_loop();
    // every wnd_proc frame has returned once the loop is done
    drop(unsafe { Box::from_raw(shell) });
    Ok(())
}

fn run_message_loop() {
    info!("[HostWindow] Entering message loop");
    let mut msg = MSG::default();
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
    info!("[HostWindow] Exited message loop");
}

/// Build a null-terminated UTF-16 string for Win32 APIs.
fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}
