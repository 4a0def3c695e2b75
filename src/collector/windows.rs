//! Windows implementation of event collection using low-level hooks.
//!
//! Keyboard and mouse events are captured with `SetWindowsHookExW` on a
//! dedicated thread running a message loop. The foreground window is
//! queried on demand by [`WindowsForegroundProbe`].

use crate::collector::types::{ForegroundWindow, InputEvent, KeyEvent, KeyIdentity, MouseButton, MouseEvent};
use crate::collector::{
    spawn_listener, CollectorConfig, CollectorError, EventSource, ReadySender, WindowProbe,
};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use windows::core::PWSTR;
use windows::Win32::Foundation::{CloseHandle, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::Threading::{
    GetCurrentThreadId, OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, GetForegroundWindow, GetMessageW, GetWindowTextLengthW, GetWindowTextW,
    GetWindowThreadProcessId, PostThreadMessageW, SetWindowsHookExW, UnhookWindowsHookEx, HHOOK,
    KBDLLHOOKSTRUCT, MSG, MSLLHOOKSTRUCT, WH_KEYBOARD_LL, WH_MOUSE_LL, WM_KEYDOWN, WM_LBUTTONDOWN,
    WM_LBUTTONUP, WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEHWHEEL, WM_MOUSEMOVE, WM_MOUSEWHEEL,
    WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN,
};

/// The Windows event collector using low-level hooks.
pub struct WindowsCollector {
    config: CollectorConfig,
    running: Arc<AtomicBool>,
    hook_thread_id: Arc<AtomicU32>,
    thread_handle: Option<JoinHandle<()>>,
}

impl WindowsCollector {
    /// Create a new Windows collector with the given configuration.
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            hook_thread_id: Arc::new(AtomicU32::new(0)),
            thread_handle: None,
        }
    }
}

impl EventSource for WindowsCollector {
    /// Install the hooks on a background thread.
    ///
    /// Waits for the hook thread to report whether installation succeeded so
    /// that a failure surfaces to the caller instead of a silent dead thread.
    fn start(&mut self, sender: Sender<InputEvent>) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }

        let running = self.running.clone();
        let thread_id = self.hook_thread_id.clone();
        let config = self.config.clone();

        let handle = spawn_listener(&self.running, move |ready| {
            thread_id.store(unsafe { GetCurrentThreadId() }, Ordering::SeqCst);
            run_hook_loop(sender, running, config, ready)
        })?;
        self.thread_handle = Some(handle);
        Ok(())
    }

    /// Stop the hook thread by posting `WM_QUIT` to its message loop.
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let thread_id = self.hook_thread_id.load(Ordering::SeqCst);
        if thread_id != 0 {
            unsafe {
                let _ = PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
        }
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for WindowsCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

thread_local! {
    static EVENT_SENDER: std::cell::RefCell<Option<Sender<InputEvent>>> = const { std::cell::RefCell::new(None) };
}

fn forward(event: InputEvent) {
    EVENT_SENDER.with(|sender| {
        if let Some(ref s) = *sender.borrow() {
            // Never block the input pipeline; a full channel drops the event.
            let _ = s.try_send(event);
        }
    });
}

/// Map a Windows virtual-key code to a normalized key identity.
pub fn key_identity(vk: u32) -> KeyIdentity {
    let name = match vk {
        0x08 => "backspace",
        0x09 => "tab",
        0x0D => "enter",
        0x10 | 0xA0 | 0xA1 => "shift",
        0x11 | 0xA2 | 0xA3 => "ctrl",
        0x12 | 0xA4 | 0xA5 => "alt",
        0x14 => "caps_lock",
        0x1B => "esc",
        0x20 => "space",
        0x21 => "page_up",
        0x22 => "page_down",
        0x23 => "end",
        0x24 => "home",
        0x25 => "left",
        0x26 => "up",
        0x27 => "right",
        0x28 => "down",
        0x2D => "insert",
        0x2E => "delete",
        0x5B | 0x5C => "win",
        0x30..=0x39 | 0x41..=0x5A => {
            let c = char::from_u32(vk).unwrap_or('?').to_ascii_lowercase();
            return KeyIdentity::new(c.to_string());
        }
        0x70..=0x7B => return KeyIdentity::new(format!("f{}", vk - 0x6F)),
        _ => return KeyIdentity::from_code(vk),
    };
    KeyIdentity::new(name)
}

/// Low-level keyboard hook callback.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code >= 0 {
        let kb_struct = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
        let msg = w_param.0 as u32;

        // Auto-repeat arrives as repeated key-downs and is forwarded as such.
        if matches!(msg, WM_KEYDOWN | WM_SYSKEYDOWN) {
            forward(InputEvent::Key(KeyEvent::new(key_identity(kb_struct.vkCode))));
        }
    }

    CallNextHookEx(HHOOK::default(), n_code, w_param, l_param)
}

/// Low-level mouse hook callback.
unsafe extern "system" fn mouse_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code >= 0 {
        let mouse_struct = &*(l_param.0 as *const MSLLHOOKSTRUCT);
        let (x, y) = (mouse_struct.pt.x, mouse_struct.pt.y);
        // High word of mouseData carries the signed wheel delta, 120 per notch.
        let wheel = ((mouse_struct.mouseData >> 16) & 0xFFFF) as i16 as f64 / 120.0;

        let event = match w_param.0 as u32 {
            WM_MOUSEMOVE => Some(MouseEvent::movement(x, y)),
            WM_LBUTTONDOWN => Some(MouseEvent::click(x, y, MouseButton::Left, true)),
            WM_LBUTTONUP => Some(MouseEvent::click(x, y, MouseButton::Left, false)),
            WM_RBUTTONDOWN => Some(MouseEvent::click(x, y, MouseButton::Right, true)),
            WM_RBUTTONUP => Some(MouseEvent::click(x, y, MouseButton::Right, false)),
            WM_MBUTTONDOWN => Some(MouseEvent::click(x, y, MouseButton::Middle, true)),
            WM_MBUTTONUP => Some(MouseEvent::click(x, y, MouseButton::Middle, false)),
            WM_MOUSEWHEEL => Some(MouseEvent::scroll(x, y, 0.0, wheel)),
            WM_MOUSEHWHEEL => Some(MouseEvent::scroll(x, y, wheel, 0.0)),
            _ => None,
        };

        if let Some(event) = event {
            forward(InputEvent::Mouse(event));
        }
    }

    CallNextHookEx(HHOOK::default(), n_code, w_param, l_param)
}

/// Install the hooks and pump messages until `WM_QUIT`.
fn run_hook_loop(
    sender: Sender<InputEvent>,
    running: Arc<AtomicBool>,
    config: CollectorConfig,
    ready: &ReadySender,
) -> Result<(), CollectorError> {
    EVENT_SENDER.with(|s| {
        *s.borrow_mut() = Some(sender);
    });

    unsafe {
        let mut hooks: Vec<HHOOK> = Vec::new();

        if config.capture_keyboard {
            match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) {
                Ok(hook) => hooks.push(hook),
                Err(_) => return Err(CollectorError::HookInstallationFailed),
            }
        }

        if config.capture_mouse {
            match SetWindowsHookExW(WH_MOUSE_LL, Some(mouse_hook_proc), None, 0) {
                Ok(hook) => hooks.push(hook),
                Err(_) => {
                    for hook in hooks {
                        let _ = UnhookWindowsHookEx(hook);
                    }
                    return Err(CollectorError::HookInstallationFailed);
                }
            }
        }

        let _ = ready.try_send(Ok(()));

        // Hooks run inside GetMessageW; the loop only waits for WM_QUIT.
        let mut msg = MSG::default();
        while running.load(Ordering::SeqCst) {
            if GetMessageW(&mut msg, HWND::default(), 0, 0).0 <= 0 {
                break;
            }
        }

        for hook in hooks {
            let _ = UnhookWindowsHookEx(hook);
        }
    }

    EVENT_SENDER.with(|s| {
        *s.borrow_mut() = None;
    });

    Ok(())
}

/// Check whether low-level hooks can be installed in this session.
pub fn check_permission() -> bool {
    unsafe {
        match SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook_proc), None, 0) {
            Ok(hook) => {
                let _ = UnhookWindowsHookEx(hook);
                true
            }
            Err(_) => false,
        }
    }
}

/// Foreground window probe backed by the Win32 window APIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsForegroundProbe;

impl WindowsForegroundProbe {
    pub fn new() -> Self {
        Self
    }
}

impl WindowProbe for WindowsForegroundProbe {
    fn poll_foreground(&self) -> Option<ForegroundWindow> {
        let hwnd = unsafe { GetForegroundWindow() };
        if hwnd.0.is_null() {
            return None;
        }

        let title = window_text(hwnd);
        let mut pid: u32 = 0;
        unsafe { GetWindowThreadProcessId(hwnd, Some(&mut pid)) };
        let exe = if pid == 0 { None } else { process_image_name(pid) };

        Some(ForegroundWindow {
            handle: hwnd.0 as usize as u64,
            exe,
            title: if title.is_empty() { None } else { Some(title) },
        })
    }
}

fn window_text(hwnd: HWND) -> String {
    unsafe {
        let len = GetWindowTextLengthW(hwnd);
        if len <= 0 {
            return String::new();
        }
        let mut buffer: Vec<u16> = vec![0; (len + 1) as usize];
        let copied = GetWindowTextW(hwnd, &mut buffer);
        if copied <= 0 {
            return String::new();
        }
        String::from_utf16_lossy(&buffer[..copied as usize])
    }
}

/// Executable file name (`chrome.exe`) of a process, if it can be opened.
fn process_image_name(pid: u32) -> Option<String> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
        let mut buffer: [u16; 1024] = [0; 1024];
        let mut size = buffer.len() as u32;
        let result = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut size,
        );
        let _ = CloseHandle(handle);
        result.ok()?;

        let path = String::from_utf16_lossy(&buffer[..size as usize]);
        path.rsplit(['\\', '/']).next().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_identity_mapping() {
        assert_eq!(key_identity(0x20).as_str(), "space");
        assert_eq!(key_identity(0x1B).as_str(), "esc");
        assert_eq!(key_identity(0x26).as_str(), "up");
        assert_eq!(key_identity(0x41).as_str(), "a");
        assert_eq!(key_identity(0x37).as_str(), "7");
        assert_eq!(key_identity(0x70).as_str(), "f1");
        assert_eq!(key_identity(0xFF).as_str(), "vk255");
    }

    #[test]
    fn test_collector_creation() {
        let collector = WindowsCollector::new(CollectorConfig::default());
        assert!(!collector.is_running());
    }
}
