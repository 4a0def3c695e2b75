//! Session controller: the agent's single control loop.
//!
//! Input listeners push events into a bounded channel; every poll tick the
//! controller drains it in order, then runs the time-based checks:
//!
//! 1. at most one accounting tick per elapsed second, on a fixed one-second
//!    grid from the start of the run
//! 2. idle logout
//! 3. suspicious-flag count
//! 4. telemetry dispatch when due
//!
//! The loop never unwinds on I/O failure. The only fatal outcomes are a
//! listener that fails to start and a collector that no longer knows the
//! employee.

use crate::backend::{verify_employee, ActivityTransport, BackendError, Registration};
use crate::collector::{CollectorError, EventSource, InputEvent, WindowProbe, EVENT_CHANNEL_CAPACITY};
use crate::config::{Config, ConfigError, LogoutAction};
use crate::core::state::{LogoutReason, RunState};
use crate::core::Accumulator;
use crate::dispatcher::{DispatchOutcome, Dispatcher};
use crate::session::action::SessionControl;
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::{Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Top-level run errors.
#[derive(Debug)]
pub enum AgentError {
    /// Input capture could not be started
    Collector(CollectorError),
    /// The collector does not know this employee
    Unregistered(String),
    /// Employee verification got an unexpected status code
    Rejected(u16),
    /// The collector could not be reached to verify the employee
    Backend(BackendError),
    Config(ConfigError),
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Collector(e) => write!(f, "Input capture failed: {e}"),
            AgentError::Unregistered(id) => write!(f, "Employee '{id}' is not registered"),
            AgentError::Rejected(code) => {
                write!(f, "Employee verification failed with status {code}")
            }
            AgentError::Backend(e) => write!(f, "{e}"),
            AgentError::Config(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Collector(e) => Some(e),
            AgentError::Backend(e) => Some(e),
            AgentError::Config(e) => Some(e),
            AgentError::Unregistered(_) | AgentError::Rejected(_) => None,
        }
    }
}

impl From<CollectorError> for AgentError {
    fn from(e: CollectorError) -> Self {
        AgentError::Collector(e)
    }
}

impl From<BackendError> for AgentError {
    fn from(e: BackendError) -> Self {
        AgentError::Backend(e)
    }
}

impl From<ConfigError> for AgentError {
    fn from(e: ConfigError) -> Self {
        AgentError::Config(e)
    }
}

/// Check the employee against the collector before a run.
///
/// Only a 200 lets the run proceed; everything else is fatal.
pub fn ensure_registered(
    transport: &dyn ActivityTransport,
    employee_id: &str,
) -> Result<(), AgentError> {
    match verify_employee(transport, employee_id)? {
        Registration::Registered => {
            tracing::info!(employee = %employee_id, "employee verified");
            Ok(())
        }
        Registration::Unregistered => Err(AgentError::Unregistered(employee_id.to_string())),
        Registration::Rejected(code) => Err(AgentError::Rejected(code)),
    }
}

/// Why the control loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// External stop request
    Stopped,
    /// The agent forced the session closed
    LoggedOut(LogoutReason),
    /// The collector answered 404 to an activity post
    Unregistered,
}

/// Cloneable handle that asks a running controller to stop.
///
/// The loop notices on its next poll tick and exits without any OS action.
#[derive(Debug, Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        !self.0.load(Ordering::SeqCst)
    }
}

pub struct SessionController {
    accumulator: Arc<Accumulator>,
    dispatcher: Dispatcher,
    source: Box<dyn EventSource>,
    session: Box<dyn SessionControl>,
    sender: Sender<InputEvent>,
    receiver: Receiver<InputEvent>,
    running: Arc<AtomicBool>,

    idle_logout: Duration,
    max_suspicious_flags: u32,
    logout_action: LogoutAction,
    poll_interval: std::time::Duration,

    last_tick_at: DateTime<Utc>,
    exit: Option<ExitReason>,
}

impl SessionController {
    pub fn new(
        employee_id: impl Into<String>,
        config: &Config,
        source: Box<dyn EventSource>,
        probe: Box<dyn WindowProbe>,
        transport: Box<dyn ActivityTransport>,
        session: Box<dyn SessionControl>,
        now: DateTime<Utc>,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY);
        Self {
            accumulator: Arc::new(Accumulator::new(employee_id, config, probe, now)),
            dispatcher: Dispatcher::new(transport, config.send_interval()),
            source,
            session,
            sender,
            receiver,
            running: Arc::new(AtomicBool::new(true)),
            idle_logout: config.idle_logout(),
            max_suspicious_flags: config.max_suspicious_flags,
            logout_action: config.logout_action,
            poll_interval: config.poll_interval(),
            last_tick_at: now,
            exit: None,
        }
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(Arc::clone(&self.running))
    }

    pub fn accumulator(&self) -> Arc<Accumulator> {
        Arc::clone(&self.accumulator)
    }

    pub fn run_state(&self) -> RunState {
        self.accumulator.with_state(|s| s.run_state)
    }

    /// Start the input listeners and enter `Running`.
    ///
    /// A listener failure moves the run straight to `Stopped`.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), AgentError> {
        if let Err(e) = self.source.start(self.sender.clone()) {
            tracing::error!(error = %e, "failed to start input listeners");
            self.running.store(false, Ordering::SeqCst);
            self.accumulator.with_state(|s| s.transition(RunState::Stopped));
            return Err(AgentError::Collector(e));
        }

        self.last_tick_at = now;
        let employee = self.accumulator.with_state(|s| {
            s.transition(RunState::Running);
            s.employee_id.clone()
        });
        tracing::info!(%employee, "monitoring started");
        Ok(())
    }

    /// One poll tick. Returns the exit reason once the run is over.
    pub fn step(&mut self, now: DateTime<Utc>) -> Option<ExitReason> {
        if let Some(exit) = self.exit {
            return Some(exit);
        }

        if !self.running.load(Ordering::SeqCst) {
            tracing::info!("stop requested");
            self.source.stop();
            self.accumulator.with_state(|s| s.transition(RunState::Stopped));
            return Some(self.finish(ExitReason::Stopped));
        }

        while let Ok(event) = self.receiver.try_recv() {
            if let Some(reason) = self.accumulator.apply(&event) {
                return Some(self.logout(reason, now));
            }
        }

        if now - self.last_tick_at >= Duration::seconds(1) {
            self.last_tick_at = next_tick(self.last_tick_at, now);
            self.accumulator.tick_second(self.last_tick_at);
        }

        let (idle_for, suspicious) = self
            .accumulator
            .with_state(|s| (now - s.last_activity_at, s.totals.suspicious));

        if idle_for >= self.idle_logout {
            tracing::warn!(idle_seconds = idle_for.num_seconds(), "idle limit reached");
            return Some(self.logout(LogoutReason::IdleTimeout, now));
        }

        if suspicious > self.max_suspicious_flags {
            tracing::warn!(suspicious, limit = self.max_suspicious_flags, "too many suspicious flags");
            return Some(self.logout(LogoutReason::TooManySuspiciousFlags, now));
        }

        // Sends run on the tick clock so every interval holds whole ticks.
        let clock = self.last_tick_at;
        if self.dispatcher.is_due(&self.accumulator, clock)
            && self.dispatcher.send(&self.accumulator, clock) == DispatchOutcome::Unregistered
        {
            tracing::warn!("employee deregistered, stopping agent");
            self.running.store(false, Ordering::SeqCst);
            self.source.stop();
            self.accumulator.with_state(|s| s.transition(RunState::Stopped));
            return Some(self.finish(ExitReason::Unregistered));
        }

        None
    }

    /// Start, then poll until the run ends.
    pub fn run(&mut self) -> Result<ExitReason, AgentError> {
        self.start(Utc::now())?;
        loop {
            if let Some(exit) = self.step(Utc::now()) {
                return Ok(exit);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    /// Force the session closed.
    ///
    /// Sends a final best-effort update, performs the configured OS action
    /// and ends in `Stopped`. Action failures are logged, never returned.
    pub fn logout(&mut self, reason: LogoutReason, now: DateTime<Utc>) -> ExitReason {
        tracing::warn!(%reason, action = %self.logout_action, "triggering logout");
        self.running.store(false, Ordering::SeqCst);
        self.accumulator.with_state(|s| {
            s.transition(RunState::LoggingOut);
            s.logout_reason = Some(reason);
        });
        self.source.stop();

        let outcome = self.dispatcher.send(&self.accumulator, now);
        if outcome != DispatchOutcome::Accepted {
            tracing::warn!(?outcome, "final send during logout failed");
        }

        if let Err(e) = self.session.perform(self.logout_action) {
            tracing::error!(error = %e, "session action failed");
        }

        self.accumulator.with_state(|s| s.transition(RunState::Stopped));
        self.finish(ExitReason::LoggedOut(reason))
    }

    fn finish(&mut self, exit: ExitReason) -> ExitReason {
        self.exit = Some(exit);
        exit
    }
}

/// Advance the tick clock by one second, or jump to `now` when the loop has
/// fallen more than a second behind (a suspended machine, a stalled send).
fn next_tick(last: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let next = last + Duration::seconds(1);
    if now - next >= Duration::seconds(1) {
        now
    } else {
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_tick_keeps_phase() {
        let t0 = Utc::now();
        // Late polls do not shift the grid.
        assert_eq!(
            next_tick(t0, t0 + Duration::milliseconds(1_090)),
            t0 + Duration::seconds(1)
        );
        assert_eq!(
            next_tick(t0, t0 + Duration::milliseconds(1_999)),
            t0 + Duration::seconds(1)
        );
        // Far behind: resynchronize instead of replaying missed seconds.
        let late = t0 + Duration::seconds(45);
        assert_eq!(next_tick(t0, late), late);
    }

    #[test]
    fn test_stop_handle() {
        let handle = StopHandle(Arc::new(AtomicBool::new(true)));
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }

    #[test]
    fn test_agent_error_display() {
        let err = AgentError::Unregistered("EMP-7".to_string());
        assert_eq!(err.to_string(), "Employee 'EMP-7' is not registered");
        let err: AgentError = BackendError::Timeout.into();
        assert!(matches!(err, AgentError::Backend(BackendError::Timeout)));
    }
}
