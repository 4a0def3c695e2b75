//! Noop event source and window probe.
//!
//! Used on platforms without input capture support. Nothing is ever
//! captured there, so a run ends in an idle logout unless stopped first.

use crate::collector::{CollectorConfig, CollectorError, EventSource, ForegroundWindow, InputEvent, WindowProbe};
use crossbeam_channel::Sender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A collector that never emits events.
pub struct NoopCollector {
    _config: CollectorConfig,
    sender: Option<Sender<InputEvent>>,
    running: Arc<AtomicBool>,
}

impl NoopCollector {
    /// Create a new noop collector.
    pub fn new(config: CollectorConfig) -> Self {
        Self {
            _config: config,
            sender: None,
            running: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl EventSource for NoopCollector {
    /// Marks the collector as running and holds the sender so the channel
    /// stays connected.
    fn start(&mut self, sender: Sender<InputEvent>) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        self.sender = Some(sender);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.sender = None;
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// A window probe that never knows the foreground window.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWindowProbe;

impl NoopWindowProbe {
    pub fn new() -> Self {
        Self
    }
}

impl WindowProbe for NoopWindowProbe {
    fn poll_foreground(&self) -> Option<ForegroundWindow> {
        None
    }
}

/// On platforms without a permission gate capture is always "allowed".
#[allow(dead_code)]
pub fn check_permission() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    #[test]
    fn test_noop_lifecycle() {
        let (tx, rx) = bounded(4);
        let mut collector = NoopCollector::new(CollectorConfig::default());
        assert!(!collector.is_running());

        collector.start(tx.clone()).unwrap();
        assert!(collector.is_running());
        assert!(matches!(
            collector.start(tx),
            Err(CollectorError::AlreadyRunning)
        ));

        collector.stop();
        assert!(!collector.is_running());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_noop_probe_is_unknown() {
        assert!(NoopWindowProbe::new().poll_foreground().is_none());
    }
}
