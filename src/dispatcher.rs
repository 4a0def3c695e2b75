//! Telemetry dispatcher.
//!
//! Turns the current interval into an [`ActivityPayload`], resets the
//! interval, posts the payload and folds the collector's answer back into
//! the agent state. The payload is built and the interval reset in one
//! critical section; the POST itself runs with the lock released.

use crate::backend::{ActivityPayload, ActivityTransport};
use crate::core::history::classify_activity;
use crate::core::state::BackendStatus;
use crate::core::Accumulator;
use chrono::{DateTime, Duration, Utc};

/// Wire format of `ActivityPayload::timestamp`: UTC, no zone suffix.
const PAYLOAD_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// How the collector answered one send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// 200
    Accepted,
    /// 404: the employee no longer exists; the run must stop
    Unregistered,
    /// Any other status; the run continues
    Rejected(u16),
    /// Transport failure or timeout; the interval is dropped
    Unreachable,
}

impl DispatchOutcome {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => DispatchOutcome::Accepted,
            404 => DispatchOutcome::Unregistered,
            other => DispatchOutcome::Rejected(other),
        }
    }

    pub fn backend_status(self) -> BackendStatus {
        match self {
            DispatchOutcome::Accepted => BackendStatus::Connected,
            DispatchOutcome::Unregistered => BackendStatus::Unregistered,
            DispatchOutcome::Rejected(code) => BackendStatus::Error(code),
            DispatchOutcome::Unreachable => BackendStatus::Unreachable,
        }
    }
}

pub struct Dispatcher {
    transport: Box<dyn ActivityTransport>,
    send_interval: Duration,
}

impl Dispatcher {
    pub fn new(transport: Box<dyn ActivityTransport>, send_interval: Duration) -> Self {
        Self {
            transport,
            send_interval,
        }
    }

    pub fn transport(&self) -> &dyn ActivityTransport {
        self.transport.as_ref()
    }

    /// A send is due when none has happened yet or the interval has elapsed.
    pub fn is_due(&self, accumulator: &Accumulator, now: DateTime<Utc>) -> bool {
        accumulator.with_state(|state| match state.last_send_at {
            None => true,
            Some(last) => now - last >= self.send_interval,
        })
    }

    /// Materialize the interval and reset it.
    ///
    /// This is the only place interval counters return to zero. Session
    /// totals are read but never reset.
    pub fn build_payload(&self, accumulator: &Accumulator, now: DateTime<Utc>) -> ActivityPayload {
        accumulator.with_state(|state| {
            let payload = ActivityPayload {
                employee_id: state.employee_id.clone(),
                timestamp: now.naive_utc().format(PAYLOAD_TIMESTAMP_FORMAT).to_string(),
                active_seconds: state.interval.active_seconds,
                idle_seconds: state.interval.idle_seconds,
                suspicious: state.interval.suspicious > 0,
                active_app_exe: state.current_app.exe.clone(),
                active_app_title: state.current_app.title.clone(),
                current_app_started_at: state
                    .current_app
                    .exe
                    .is_some()
                    .then_some(state.current_app_since),
                current_activity: classify_activity(&state.history, state.last_activity_at, now),
                app_usage: state.app_usage(now),
                keypresses: state.interval.keypresses,
                mouse_clicks: state.interval.mouse_clicks,
                mouse_moves: state.interval.mouse_moves,
                scrolls: state.interval.scrolls,
                window_changes: state.interval.window_changes,
                suspicious_events: state
                    .suspicious_events
                    .iter()
                    .map(|e| e.reason.clone())
                    .collect(),
                total_active_seconds: state.totals.active_seconds,
                total_idle_seconds: state.totals.idle_seconds,
                total_keypresses: state.totals.keypresses,
                total_mouse_events: state.totals.mouse_events(),
                total_window_changes: state.totals.window_changes,
            };

            state.reset_interval(now);
            state.last_send_at = Some(now);
            state.last_send_label = now.format("%H:%M:%S").to_string();
            payload
        })
    }

    /// Build, post and record the outcome in `backend_status`.
    ///
    /// Never fails: transport errors become [`DispatchOutcome::Unreachable`].
    /// Acting on [`DispatchOutcome::Unregistered`] is the caller's job.
    pub fn send(&self, accumulator: &Accumulator, now: DateTime<Utc>) -> DispatchOutcome {
        let payload = self.build_payload(accumulator, now);

        let outcome = match self.transport.post_activity(&payload) {
            Ok(status) => DispatchOutcome::from_status(status),
            Err(e) => {
                tracing::warn!(error = %e, "activity send failed");
                DispatchOutcome::Unreachable
            }
        };

        match outcome {
            DispatchOutcome::Accepted => {
                let seconds = self.send_interval.num_seconds().max(0) as u64;
                tracing::info!(
                    employee = %payload.employee_id,
                    active = payload.active_seconds,
                    idle = payload.idle_seconds,
                    suspicious = payload.suspicious,
                    "sent: {}",
                    payload.describe(seconds)
                );
            }
            DispatchOutcome::Unregistered => {
                tracing::warn!(employee = %payload.employee_id, "collector reports employee not registered");
            }
            DispatchOutcome::Rejected(code) => {
                tracing::warn!(status = code, "collector rejected activity");
            }
            DispatchOutcome::Unreachable => {}
        }

        accumulator.with_state(|state| state.backend_status = outcome.backend_status());
        outcome
    }
}
