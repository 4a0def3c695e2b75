//! Shared agent state.
//!
//! A single [`AgentState`] lives behind the accumulator's lock. Interval
//! counters are zeroed on every telemetry send; session totals only grow.

use crate::collector::KeyIdentity;
use crate::core::history::{
    classify_activity, ActivityKind, ActivityRecord, CurrentActivity, RingBuffer, HISTORY_CAPACITY,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle of the agent run.
///
/// `Starting → Running → LoggingOut → Stopped`, with `Running → Stopped`
/// for an external stop or deregistration and `Starting → Stopped` when
/// the listeners fail to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    LoggingOut,
    Stopped,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Stopped)
                | (Running, LoggingOut)
                | (Running, Stopped)
                | (LoggingOut, Stopped)
        )
    }
}

/// Why the agent forced the user's session closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutReason {
    IdleTimeout,
    FakeActivity,
    TooManySuspiciousFlags,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::IdleTimeout => "idle_timeout",
            LogoutReason::FakeActivity => "fake_activity",
            LogoutReason::TooManySuspiciousFlags => "too_many_suspicious_flags",
        }
    }
}

impl std::fmt::Display for LogoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity with the collector as of the last send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "code")]
pub enum BackendStatus {
    Unchecked,
    Connected,
    Unregistered,
    Error(u16),
    Unreachable,
}

impl std::fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendStatus::Unchecked => write!(f, "Not checked"),
            BackendStatus::Connected => write!(f, "Connected"),
            BackendStatus::Unregistered => write!(f, "Employee not registered"),
            BackendStatus::Error(code) => write!(f, "Error: {code}"),
            BackendStatus::Unreachable => write!(f, "Failed: cannot reach backend"),
        }
    }
}

/// Last observed foreground application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppIdentity {
    pub exe: Option<String>,
    pub title: Option<String>,
}

/// Time spent in one foreground application during a reporting interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppUsage {
    pub app_exe: Option<String>,
    pub app_title: Option<String>,
    pub duration_seconds: f64,
    /// When the app lost the foreground; `None` while it still has it
    pub ended_at: Option<DateTime<Utc>>,
}

/// Shorter foreground spans are not worth reporting.
const MIN_APP_SPAN_SECONDS: f64 = 1.0;

/// Consecutive identical key presses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStreak {
    pub key: Option<KeyIdentity>,
    pub count: u32,
}

impl KeyStreak {
    /// Extend the streak with `key`, or restart it at 1 for a different key.
    pub fn record(&mut self, key: &KeyIdentity) -> u32 {
        if self.key.as_ref() == Some(key) {
            self.count += 1;
        } else {
            self.key = Some(key.clone());
            self.count = 1;
        }
        self.count
    }
}

/// Counters scoped to the current reporting interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalCounters {
    pub active_seconds: u64,
    pub idle_seconds: u64,
    pub keypresses: u64,
    pub mouse_clicks: u64,
    pub mouse_moves: u64,
    pub scrolls: u64,
    pub window_changes: u64,
    pub suspicious: u32,
}

/// Counters accumulated over the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub active_seconds: u64,
    pub idle_seconds: u64,
    pub keypresses: u64,
    pub mouse_clicks: u64,
    pub mouse_moves: u64,
    pub scrolls: u64,
    pub window_changes: u64,
    pub suspicious: u32,
}

impl SessionTotals {
    pub fn mouse_events(&self) -> u64 {
        self.mouse_clicks + self.mouse_moves + self.scrolls
    }
}

/// A suspicious flag raised during the current interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspiciousEvent {
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// All mutable agent state. Only ever touched under the accumulator lock.
#[derive(Debug)]
pub struct AgentState {
    pub employee_id: String,
    pub run_state: RunState,
    pub logout_reason: Option<LogoutReason>,
    pub started_at: DateTime<Utc>,

    pub interval: IntervalCounters,
    pub interval_started_at: DateTime<Utc>,
    pub totals: SessionTotals,
    pub suspicious_events: Vec<SuspiciousEvent>,

    pub last_activity_at: DateTime<Utc>,
    pub last_mouse_at: DateTime<Utc>,
    pub last_window_change_at: DateTime<Utc>,
    pub last_window_handle: Option<u64>,
    pub current_app: AppIdentity,
    pub current_app_since: DateTime<Utc>,
    /// Apps that lost the foreground during the current interval
    pub finished_apps: Vec<AppUsage>,

    pub key_streak: KeyStreak,
    pub key_timestamps: VecDeque<DateTime<Utc>>,

    pub last_send_at: Option<DateTime<Utc>>,
    pub last_send_label: String,
    pub backend_status: BackendStatus,

    pub history: RingBuffer<ActivityRecord>,
}

impl AgentState {
    pub fn new(employee_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            employee_id: employee_id.into(),
            run_state: RunState::Starting,
            logout_reason: None,
            started_at: now,
            interval: IntervalCounters::default(),
            interval_started_at: now,
            totals: SessionTotals::default(),
            suspicious_events: Vec::new(),
            last_activity_at: now,
            last_mouse_at: now,
            last_window_change_at: now,
            last_window_handle: None,
            current_app: AppIdentity::default(),
            current_app_since: now,
            finished_apps: Vec::new(),
            key_streak: KeyStreak::default(),
            key_timestamps: VecDeque::new(),
            last_send_at: None,
            last_send_label: "Never".to_string(),
            backend_status: BackendStatus::Unchecked,
            history: RingBuffer::new(HISTORY_CAPACITY),
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&mut self, next: RunState) -> bool {
        if self.run_state.can_transition_to(next) {
            self.run_state = next;
            true
        } else {
            false
        }
    }

    /// Raise a suspicious flag on both the interval and the session.
    pub fn flag_suspicious(&mut self, now: DateTime<Utc>, reason: String) {
        self.interval.suspicious += 1;
        self.totals.suspicious += 1;
        self.record(now, ActivityKind::Suspicious, reason.clone());
        self.suspicious_events.push(SuspiciousEvent {
            timestamp: now,
            reason,
        });
    }

    pub fn record(&mut self, now: DateTime<Utc>, kind: ActivityKind, detail: String) {
        let app = self.current_app.exe.clone();
        self.history.push(ActivityRecord {
            timestamp: now,
            kind,
            detail,
            app,
        });
    }

    /// Bring `app` to the foreground, closing the span of the previous one.
    pub fn switch_app(&mut self, app: AppIdentity, now: DateTime<Utc>) {
        if self.current_app.exe.is_some() {
            let duration = seconds_between(self.current_app_since.max(self.interval_started_at), now);
            if duration >= MIN_APP_SPAN_SECONDS {
                self.finished_apps.push(AppUsage {
                    app_exe: self.current_app.exe.clone(),
                    app_title: self.current_app.title.clone(),
                    duration_seconds: duration,
                    ended_at: Some(now),
                });
            }
        }
        self.current_app = app;
        self.current_app_since = now;
    }

    /// Per-app foreground time in the current interval, the app still in
    /// front first.
    pub fn app_usage(&self, now: DateTime<Utc>) -> Vec<AppUsage> {
        let mut usage = Vec::with_capacity(self.finished_apps.len() + 1);
        if self.current_app.exe.is_some() {
            let since = self.current_app_since.max(self.interval_started_at);
            usage.push(AppUsage {
                app_exe: self.current_app.exe.clone(),
                app_title: self.current_app.title.clone(),
                duration_seconds: seconds_between(since, now).max(0.0),
                ended_at: None,
            });
        }
        usage.extend(self.finished_apps.iter().cloned());
        usage
    }

    /// Zero everything scoped to the reporting interval.
    pub fn reset_interval(&mut self, now: DateTime<Utc>) {
        self.interval = IntervalCounters::default();
        self.interval_started_at = now;
        self.suspicious_events.clear();
        self.finished_apps.clear();
        self.key_streak = KeyStreak::default();
    }

    /// Human-readable status line for displays.
    pub fn status_text(&self) -> String {
        match (self.run_state, self.logout_reason) {
            (RunState::LoggingOut, Some(reason)) => format!("Logging out: {reason}"),
            (RunState::Stopped, Some(reason)) => format!("Logged out: {reason}"),
            _ => self.backend_status.to_string(),
        }
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> AgentSnapshot {
        AgentSnapshot {
            employee_id: self.employee_id.clone(),
            run_state: self.run_state,
            logout_reason: self.logout_reason,
            status_text: self.status_text(),
            backend_status: self.backend_status,
            interval: self.interval,
            totals: self.totals,
            current_app: self.current_app.clone(),
            current_activity: classify_activity(&self.history, self.last_activity_at, now),
            last_activity_at: self.last_activity_at,
            last_send_at: self.last_send_at,
            last_send_label: self.last_send_label.clone(),
            session_seconds: (now - self.started_at).num_seconds().max(0) as u64,
            recent_activity: self.history.to_vec(),
        }
    }
}

/// Read-only copy of the agent state for status displays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub employee_id: String,
    pub run_state: RunState,
    pub logout_reason: Option<LogoutReason>,
    pub status_text: String,
    pub backend_status: BackendStatus,
    pub interval: IntervalCounters,
    pub totals: SessionTotals,
    pub current_app: AppIdentity,
    pub current_activity: CurrentActivity,
    pub last_activity_at: DateTime<Utc>,
    pub last_send_at: Option<DateTime<Utc>>,
    pub last_send_label: String,
    pub session_seconds: u64,
    pub recent_activity: Vec<ActivityRecord>,
}

/// Seconds from `earlier` to `later` with sub-millisecond precision.
pub fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    let delta = later - earlier;
    match delta.num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => delta.num_seconds() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_run_state_transitions() {
        assert!(RunState::Starting.can_transition_to(RunState::Running));
        assert!(RunState::Running.can_transition_to(RunState::LoggingOut));
        assert!(RunState::Running.can_transition_to(RunState::Stopped));
        assert!(RunState::LoggingOut.can_transition_to(RunState::Stopped));

        assert!(!RunState::Running.can_transition_to(RunState::Starting));
        assert!(!RunState::Stopped.can_transition_to(RunState::Running));
        assert!(!RunState::LoggingOut.can_transition_to(RunState::Running));
        assert!(!RunState::Starting.can_transition_to(RunState::LoggingOut));
    }

    #[test]
    fn test_key_streak() {
        let mut streak = KeyStreak::default();
        let space = KeyIdentity::new("space");
        let a = KeyIdentity::new("a");
        assert_eq!(streak.record(&space), 1);
        assert_eq!(streak.record(&space), 2);
        assert_eq!(streak.record(&a), 1);
        assert_eq!(streak.record(&space), 1);
    }

    #[test]
    fn test_flag_and_reset() {
        let now = Utc::now();
        let mut state = AgentState::new("EMP-1", now);
        state.flag_suspicious(now, "test".to_string());
        state.interval.keypresses = 4;
        assert_eq!(state.interval.suspicious, 1);
        assert_eq!(state.totals.suspicious, 1);

        state.reset_interval(now);
        assert_eq!(state.interval, IntervalCounters::default());
        assert!(state.suspicious_events.is_empty());
        assert_eq!(state.totals.suspicious, 1);
    }

    #[test]
    fn test_app_usage_spans() {
        let t0 = Utc::now();
        let mut state = AgentState::new("EMP-1", t0);
        let app = |exe: &str| AppIdentity {
            exe: Some(exe.to_string()),
            title: Some(format!("{exe} window")),
        };

        state.switch_app(app("code.exe"), t0);
        state.switch_app(app("chrome.exe"), t0 + Duration::seconds(12));
        // Under a second in front: not reported.
        state.switch_app(app("slack.exe"), t0 + Duration::milliseconds(12_500));

        let usage = state.app_usage(t0 + Duration::seconds(20));
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].app_exe.as_deref(), Some("slack.exe"));
        assert!((usage[0].duration_seconds - 7.5).abs() < 1e-9);
        assert_eq!(usage[0].ended_at, None);
        assert_eq!(usage[1].app_exe.as_deref(), Some("code.exe"));
        assert!((usage[1].duration_seconds - 12.0).abs() < 1e-9);
        assert_eq!(usage[1].ended_at, Some(t0 + Duration::seconds(12)));

        // A new interval only counts foreground time since its start.
        state.reset_interval(t0 + Duration::seconds(20));
        let usage = state.app_usage(t0 + Duration::seconds(25));
        assert_eq!(usage.len(), 1);
        assert!((usage[0].duration_seconds - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_text() {
        let now = Utc::now();
        let mut state = AgentState::new("EMP-1", now);
        assert_eq!(state.status_text(), "Not checked");
        state.backend_status = BackendStatus::Error(503);
        assert_eq!(state.status_text(), "Error: 503");

        state.transition(RunState::Running);
        state.transition(RunState::LoggingOut);
        state.logout_reason = Some(LogoutReason::IdleTimeout);
        assert_eq!(state.status_text(), "Logging out: idle_timeout");
    }

    #[test]
    fn test_seconds_between() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::milliseconds(1500);
        assert!((seconds_between(t0, t1) - 1.5).abs() < 1e-9);
    }
}
