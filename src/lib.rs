//! Activity Agent - endpoint activity monitoring for workforce telemetry.
//!
//! The agent watches keyboard, mouse and foreground-window activity, folds
//! it into per-interval active/idle counters, flags scripted input and
//! reports each interval to a remote collector. When the user goes idle
//! for too long or input looks automated, it locks or ends the session.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        Activity Agent                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  channel  ┌─────────────┐   ┌────────────┐  │
//! │  │  Collector  │──────────▶│ Accumulator │──▶│ Dispatcher │──┼──▶ POST /activity
//! │  │ (OS hooks)  │           │ + Detector  │   │            │  │
//! │  └─────────────┘           └─────────────┘   └────────────┘  │
//! │         ▲                         ▲                │         │
//! │         │                         │                ▼         │
//! │  ┌──────┴─────────────────────────┴────────────────────────┐ │
//! │  │      Session Controller (poll loop, logout, stop)       │ │
//! │  └─────────────────────────────────────────────────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use activity_agent::{
//!     backend::{BackendConfig, BlockingBackendClient},
//!     collector::{Collector, CollectorConfig, ForegroundProbe},
//!     session::{SessionController, SystemSessionControl},
//!     Config,
//! };
//!
//! let config = Config::load().unwrap_or_default();
//! let transport = BlockingBackendClient::new(BackendConfig::from_config(&config))
//!     .expect("Failed to create backend client");
//!
//! let mut controller = SessionController::new(
//!     "EMP-001",
//!     &config,
//!     Box::new(Collector::new(CollectorConfig::default())),
//!     Box::new(ForegroundProbe::new()),
//!     Box::new(transport),
//!     Box::new(SystemSessionControl::new()),
//!     chrono::Utc::now(),
//! );
//! let exit = controller.run().expect("Failed to start monitoring");
//! println!("exited: {exit:?}");
//! ```

pub mod backend;
pub mod collector;
pub mod config;
pub mod core;
pub mod dispatcher;
pub mod session;

// Re-export key types at crate root for convenience
pub use backend::{ActivityPayload, ActivityTransport, BackendError, BlockingBackendClient};
pub use collector::{Collector, CollectorConfig, CollectorError, EventSource, InputEvent, WindowProbe};
pub use config::{Config, ConfigOverrides, DetectorConfig, LogoutAction};
pub use core::{Accumulator, AgentSnapshot, AnomalyDetector, BackendStatus, LogoutReason, RunState};
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use session::{AgentError, ExitReason, SessionController, StopHandle};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notice shown to the monitored user when the agent starts.
pub const MONITORING_NOTICE: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║              ACTIVITY AGENT - MONITORING NOTICE                  ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This workstation reports your activity to your organization.    ║
║                                                                  ║
║  ✓ WHAT IS REPORTED:                                             ║
║    • Active and idle seconds per reporting interval              ║
║    • Counts of key presses, clicks, scrolls and window switches  ║
║    • The name and title of the foreground application            ║
║    • Flags raised for automated or scripted input                ║
║                                                                  ║
║  ✗ WHAT IS NEVER REPORTED:                                       ║
║    • The text you type                                           ║
║    • Screen contents                                             ║
║                                                                  ║
║  Your session is locked after a long idle period or when input   ║
║  looks automated.                                                ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitoring_notice_contents() {
        assert!(MONITORING_NOTICE.contains("MONITORING NOTICE"));
        assert!(MONITORING_NOTICE.contains("NEVER REPORTED"));
        assert!(MONITORING_NOTICE.contains("foreground application"));
    }
}
