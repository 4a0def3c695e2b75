//! macOS implementation of event collection using a CGEvent tap.
//!
//! Requires Input Monitoring permission. There is no foreground window probe
//! on macOS yet, so window identity is always reported as unknown.

use crate::collector::types::{InputEvent, KeyEvent, KeyIdentity, MouseButton, MouseEvent};
use crate::collector::{spawn_listener, CollectorConfig, CollectorError, EventSource, ReadySender};
use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement, CGEventType,
    CallbackResult, EventField,
};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// The macOS event collector using CGEvent tap.
pub struct MacOSCollector {
    config: CollectorConfig,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl MacOSCollector {
    /// Create a new macOS collector with the given configuration.
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }
}

impl EventSource for MacOSCollector {
    /// Start capturing events in a background thread.
    ///
    /// Blocks until the tap thread reports back. Returns an error if the
    /// collector is already running or the tap or its run loop source cannot
    /// be created (usually a missing Input Monitoring grant).
    fn start(&mut self, sender: Sender<InputEvent>) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        if !check_permission() {
            return Err(CollectorError::PermissionDenied);
        }

        let running = self.running.clone();
        let config = self.config.clone();

        let handle = spawn_listener(&self.running, move |ready| {
            run_event_loop(sender, running, config, ready)
        })?;
        self.thread_handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            // The run loop wakes every 100ms and observes the flag.
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for MacOSCollector {
    fn drop(&mut self) {
        self.stop();
    }
}

thread_local! {
    static EVENT_SENDER: std::cell::RefCell<Option<Sender<InputEvent>>> = const { std::cell::RefCell::new(None) };
}

/// Build a list of event types to capture based on configuration.
fn build_event_types(config: &CollectorConfig) -> Vec<CGEventType> {
    let mut types = Vec::new();

    if config.capture_keyboard {
        types.push(CGEventType::KeyDown);
    }

    if config.capture_mouse {
        types.push(CGEventType::MouseMoved);
        types.push(CGEventType::LeftMouseDown);
        types.push(CGEventType::LeftMouseUp);
        types.push(CGEventType::RightMouseDown);
        types.push(CGEventType::RightMouseUp);
        types.push(CGEventType::LeftMouseDragged);
        types.push(CGEventType::RightMouseDragged);
        types.push(CGEventType::ScrollWheel);
    }

    types
}

fn event_callback(
    _proxy: core_graphics::event::CGEventTapProxy,
    event_type: CGEventType,
    event: &CGEvent,
) -> CallbackResult {
    EVENT_SENDER.with(|sender_cell| {
        if let Some(ref sender) = *sender_cell.borrow() {
            if let Some(input) = process_cg_event(event_type, event) {
                let _ = sender.try_send(input);
            }
        }
    });

    // Listen-only tap: never alter the event.
    CallbackResult::Keep
}

/// Run the Core Graphics event loop until `running` clears.
///
/// Reports on `ready` once the tap is enabled; setup errors are returned
/// before that.
fn run_event_loop(
    sender: Sender<InputEvent>,
    running: Arc<AtomicBool>,
    config: CollectorConfig,
    ready: &ReadySender,
) -> Result<(), CollectorError> {
    let event_types = build_event_types(&config);

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        event_types,
        event_callback,
    )
    .map_err(|_| CollectorError::TapCreationFailed)?;

    let source = tap
        .mach_port()
        .create_runloop_source(0)
        .map_err(|_| CollectorError::RunLoopSourceFailed)?;

    EVENT_SENDER.with(|s| {
        *s.borrow_mut() = Some(sender);
    });

    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }

    tap.enable();
    let _ = ready.try_send(Ok(()));

    while running.load(Ordering::SeqCst) {
        CFRunLoop::run_in_mode(
            unsafe { kCFRunLoopCommonModes },
            std::time::Duration::from_millis(100),
            false,
        );
    }

    EVENT_SENDER.with(|s| {
        *s.borrow_mut() = None;
    });

    Ok(())
}

/// Map a macOS virtual keycode to a normalized key identity.
pub fn key_identity(keycode: i64) -> KeyIdentity {
    let name = match keycode {
        36 => "enter",
        48 => "tab",
        49 => "space",
        51 => "backspace",
        53 => "esc",
        55 | 54 => "cmd",
        56 | 60 => "shift",
        58 | 61 => "alt",
        59 | 62 => "ctrl",
        115 => "home",
        116 => "page_up",
        117 => "delete",
        119 => "end",
        121 => "page_down",
        123 => "left",
        124 => "right",
        125 => "down",
        126 => "up",
        0 => "a",
        11 => "b",
        8 => "c",
        2 => "d",
        14 => "e",
        3 => "f",
        5 => "g",
        4 => "h",
        34 => "i",
        38 => "j",
        40 => "k",
        37 => "l",
        46 => "m",
        45 => "n",
        31 => "o",
        35 => "p",
        12 => "q",
        15 => "r",
        1 => "s",
        17 => "t",
        32 => "u",
        9 => "v",
        13 => "w",
        7 => "x",
        16 => "y",
        6 => "z",
        _ => return KeyIdentity::from_code(keycode as u32),
    };
    KeyIdentity::new(name)
}

fn process_cg_event(event_type: CGEventType, event: &CGEvent) -> Option<InputEvent> {
    use core_graphics::event::CGEventType::*;

    let location = event.location();
    let (x, y) = (location.x as i32, location.y as i32);

    let mouse = match event_type {
        KeyDown => {
            let keycode = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE);
            return Some(InputEvent::Key(KeyEvent::new(key_identity(keycode))));
        }
        MouseMoved | LeftMouseDragged | RightMouseDragged => MouseEvent::movement(x, y),
        LeftMouseDown => MouseEvent::click(x, y, MouseButton::Left, true),
        LeftMouseUp => MouseEvent::click(x, y, MouseButton::Left, false),
        RightMouseDown => MouseEvent::click(x, y, MouseButton::Right, true),
        RightMouseUp => MouseEvent::click(x, y, MouseButton::Right, false),
        ScrollWheel => {
            let dx = event
                .get_double_value_field(EventField::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_2);
            let dy = event
                .get_double_value_field(EventField::SCROLL_WHEEL_EVENT_POINT_DELTA_AXIS_1);
            MouseEvent::scroll(x, y, dx, dy)
        }
        _ => return None,
    };

    Some(InputEvent::Mouse(mouse))
}

/// Check if the application has Input Monitoring permission.
///
/// macOS has no direct query; creating a passive tap fails without the grant.
pub fn check_permission() -> bool {
    CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::KeyDown],
        |_proxy, _type, _event| CallbackResult::Keep,
    )
    .is_ok()
}
