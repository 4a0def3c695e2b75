//! Event sources for the activity agent.
//!
//! Platform listeners push [`InputEvent`]s into a bounded channel that the
//! session controller drains once per poll tick. The foreground window is
//! queried synchronously through a [`WindowProbe`].

pub mod types;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

pub mod noop;

use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

// Re-export commonly used types
pub use types::{
    ForegroundWindow, InputEvent, KeyEvent, KeyIdentity, MouseButton, MouseEvent, MouseEventKind,
};

/// Capacity of the listener → controller channel. A full channel drops events.
pub const EVENT_CHANNEL_CAPACITY: usize = 10_000;

/// Configuration for which event sources to capture.
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub capture_keyboard: bool,
    pub capture_mouse: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            capture_keyboard: true,
            capture_mouse: true,
        }
    }
}

/// Errors that can occur while starting event collection.
#[derive(Debug)]
pub enum CollectorError {
    AlreadyRunning,
    PermissionDenied,
    HookInstallationFailed,
    TapCreationFailed,
    RunLoopSourceFailed,
}

impl std::fmt::Display for CollectorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectorError::AlreadyRunning => write!(f, "Collector is already running"),
            CollectorError::PermissionDenied => write!(f, "Input monitoring permission not granted"),
            CollectorError::HookInstallationFailed => write!(f, "Failed to install input hook"),
            CollectorError::TapCreationFailed => write!(f, "Failed to create CGEvent tap"),
            CollectorError::RunLoopSourceFailed => write!(f, "Failed to create run loop source"),
        }
    }
}

impl std::error::Error for CollectorError {}

/// A keyboard/mouse listener feeding events into the agent.
pub trait EventSource: Send {
    /// Begin delivering events into `sender`. Failure here is fatal to a run.
    fn start(&mut self, sender: Sender<InputEvent>) -> Result<(), CollectorError>;

    /// Stop delivering events. Must be safe to call when not running.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

/// Channel a listener thread uses to report that capture is live.
pub type ReadySender = Sender<Result<(), CollectorError>>;

/// Spawn a listener thread and wait until it reports that capture is live.
///
/// `body` sends `Ok(())` on its ready channel once the OS hooks are in place,
/// then blocks until `running` clears. An error returned before that, or a
/// thread that exits without reporting, is handed back to the caller and
/// `running` is cleared again.
#[cfg_attr(not(any(target_os = "macos", target_os = "windows")), allow(dead_code))]
pub(crate) fn spawn_listener<F>(
    running: &Arc<AtomicBool>,
    body: F,
) -> Result<JoinHandle<()>, CollectorError>
where
    F: FnOnce(&ReadySender) -> Result<(), CollectorError> + Send + 'static,
{
    running.store(true, Ordering::SeqCst);

    let flag = Arc::clone(running);
    let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<(), CollectorError>>(1);
    let handle = thread::spawn(move || {
        if let Err(e) = body(&ready_tx) {
            tracing::error!(error = %e, "listener thread failed");
            let _ = ready_tx.try_send(Err(e));
        }
        flag.store(false, Ordering::SeqCst);
    });

    let failure = match ready_rx.recv() {
        Ok(Ok(())) => return Ok(handle),
        Ok(Err(e)) => e,
        Err(_) => CollectorError::HookInstallationFailed,
    };
    let _ = handle.join();
    running.store(false, Ordering::SeqCst);
    Err(failure)
}

/// Synchronous foreground-window query.
///
/// Returns `None` when nothing can be determined (headless session, denied
/// permission, desktop focused). Implementations must not block for long.
pub trait WindowProbe: Send + Sync {
    fn poll_foreground(&self) -> Option<ForegroundWindow>;
}

#[cfg(target_os = "macos")]
pub use macos::{check_permission, MacOSCollector};

/// Platform-agnostic collector type alias
#[cfg(target_os = "macos")]
pub type Collector = MacOSCollector;

/// macOS has no window probe yet; window identity is reported as unknown.
#[cfg(target_os = "macos")]
pub type ForegroundProbe = noop::NoopWindowProbe;

#[cfg(target_os = "windows")]
pub use self::windows::{check_permission, WindowsCollector, WindowsForegroundProbe};

/// Platform-agnostic collector type alias
#[cfg(target_os = "windows")]
pub type Collector = WindowsCollector;

#[cfg(target_os = "windows")]
pub type ForegroundProbe = WindowsForegroundProbe;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub use noop::check_permission;

/// Platform-agnostic collector type alias
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type Collector = noop::NoopCollector;

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub type ForegroundProbe = noop::NoopWindowProbe;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_listener_reports_ready() {
        let running = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&running);
        let handle = spawn_listener(&running, move |ready| {
            let _ = ready.send(Ok(()));
            while flag.load(Ordering::SeqCst) {
                thread::sleep(std::time::Duration::from_millis(5));
            }
            Ok(())
        })
        .unwrap();

        assert!(running.load(Ordering::SeqCst));
        running.store(false, Ordering::SeqCst);
        handle.join().unwrap();
    }

    #[test]
    fn test_spawn_listener_surfaces_setup_failure() {
        let running = Arc::new(AtomicBool::new(false));
        let err = spawn_listener(&running, |_| Err(CollectorError::TapCreationFailed)).unwrap_err();
        assert!(matches!(err, CollectorError::TapCreationFailed));
        assert!(!running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_spawn_listener_silent_exit_is_a_failure() {
        let running = Arc::new(AtomicBool::new(false));
        let err = spawn_listener(&running, |_| Ok(())).unwrap_err();
        assert!(matches!(err, CollectorError::HookInstallationFailed));
        assert!(!running.load(Ordering::SeqCst));
    }
}
