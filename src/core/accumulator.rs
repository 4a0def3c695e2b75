//! Interval accumulator.
//!
//! Owns the agent state lock. Input handlers and the once-per-second tick
//! mutate counters here; the dispatcher and status displays read through
//! [`Accumulator::with_state`] and [`Accumulator::snapshot`].

use crate::collector::{InputEvent, KeyIdentity, MouseButton, MouseEventKind, WindowProbe};
use crate::config::Config;
use crate::core::detector::AnomalyDetector;
use crate::core::history::ActivityKind;
use crate::core::state::{AgentSnapshot, AgentState, AppIdentity, LogoutReason};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Mutex, MutexGuard};

/// Every n-th mouse move is written to the activity history.
const MOVE_HISTORY_STRIDE: u64 = 10;

/// Counters and detectors for one agent run.
pub struct Accumulator {
    state: Mutex<AgentState>,
    idle_threshold: Duration,
    suspicious_key_threshold: u32,
    detector: AnomalyDetector,
    probe: Box<dyn WindowProbe>,
}

impl Accumulator {
    pub fn new(
        employee_id: impl Into<String>,
        config: &Config,
        probe: Box<dyn WindowProbe>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            state: Mutex::new(AgentState::new(employee_id, now)),
            idle_threshold: config.idle_threshold(),
            suspicious_key_threshold: config.suspicious_key_threshold,
            detector: AnomalyDetector::new(config.detector.clone()),
            probe,
        }
    }

    /// Acquire the state lock. A poisoned lock is recovered: the counters
    /// stay usable even if a reader panicked mid-snapshot.
    fn lock(&self) -> MutexGuard<'_, AgentState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` inside the state critical section.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut AgentState) -> R) -> R {
        let mut state = self.lock();
        f(&mut state)
    }

    pub fn detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    /// Apply one input event. Returns a logout reason if the event tripped
    /// the fake-activity check.
    pub fn apply(&self, event: &InputEvent) -> Option<LogoutReason> {
        match event {
            InputEvent::Key(key) => self.on_key(key.timestamp, &key.key),
            InputEvent::Mouse(mouse) => {
                match mouse.kind {
                    MouseEventKind::Move => self.on_mouse_move(mouse.timestamp, mouse.x, mouse.y),
                    MouseEventKind::Click { button, pressed } => {
                        self.on_mouse_click(mouse.timestamp, mouse.x, mouse.y, button, pressed)
                    }
                    MouseEventKind::Scroll { dx, dy } => {
                        self.on_mouse_scroll(mouse.timestamp, mouse.x, mouse.y, dx, dy)
                    }
                }
                None
            }
        }
    }

    /// Record a key press.
    ///
    /// Updates the identical-key streak (with the coarse streak backstop),
    /// the trailing timestamp window, then runs the fake-activity check.
    pub fn on_key(&self, now: DateTime<Utc>, key: &KeyIdentity) -> Option<LogoutReason> {
        let mut state = self.lock();
        state.last_activity_at = now;
        state.interval.keypresses += 1;
        state.totals.keypresses += 1;
        state.record(now, ActivityKind::Keypress, format!("Pressed key: {key}"));

        let streak = state.key_streak.record(key);
        if streak > self.suspicious_key_threshold {
            tracing::warn!(key = %key, streak, "identical key streak over threshold");
            state.flag_suspicious(now, format!("Repeated key '{key}' {streak} times"));
            state.key_streak.count = 0;
        }

        let cutoff = now - self.detector.key_window();
        state.key_timestamps.push_back(now);
        while state.key_timestamps.front().is_some_and(|t| *t < cutoff) {
            state.key_timestamps.pop_front();
        }

        let finding = self.detector.check_fake_activity(&state, now, key)?;
        tracing::warn!(
            key = %finding.key,
            streak = finding.streak,
            mean = finding.mean_interval,
            stddev = finding.jitter,
            "fake activity detected: uniform key spam, no mouse, no window change"
        );
        state.flag_suspicious(now, finding.describe());
        Some(LogoutReason::FakeActivity)
    }

    pub fn on_mouse_move(&self, now: DateTime<Utc>, x: i32, y: i32) {
        let mut state = self.lock();
        touch_mouse(&mut state, now);
        state.interval.mouse_moves += 1;
        state.totals.mouse_moves += 1;
        if state.interval.mouse_moves % MOVE_HISTORY_STRIDE == 0 {
            state.record(now, ActivityKind::MouseMove, format!("Mouse moved to ({x}, {y})"));
        }
    }

    /// Record a button event. Only presses count as clicks; releases still
    /// count as activity.
    pub fn on_mouse_click(
        &self,
        now: DateTime<Utc>,
        x: i32,
        y: i32,
        button: MouseButton,
        pressed: bool,
    ) {
        let mut state = self.lock();
        touch_mouse(&mut state, now);
        if pressed {
            state.interval.mouse_clicks += 1;
            state.totals.mouse_clicks += 1;
            state.record(
                now,
                ActivityKind::MouseClick,
                format!("Mouse {button} pressed at ({x}, {y})"),
            );
        }
    }

    pub fn on_mouse_scroll(&self, now: DateTime<Utc>, x: i32, y: i32, dx: f64, dy: f64) {
        let mut state = self.lock();
        touch_mouse(&mut state, now);
        state.interval.scrolls += 1;
        state.totals.scrolls += 1;
        let direction = if dy < 0.0 { "down" } else { "up" };
        state.record(
            now,
            ActivityKind::Scroll,
            format!("Scrolled {direction} ({} units) at ({x}, {y})", dy.abs().max(dx.abs())),
        );
    }

    /// Account one second as active or idle and poll the foreground window.
    ///
    /// The window query runs before the lock is taken. A second is skipped
    /// rather than counted when the interval has not yet lasted that long,
    /// so `active + idle` never exceeds elapsed time since the last reset.
    pub fn tick_second(&self, now: DateTime<Utc>) {
        let window = self.probe.poll_foreground();

        let mut state = self.lock();
        let counted = state.interval.active_seconds + state.interval.idle_seconds;
        let elapsed = (now - state.interval_started_at).num_seconds().max(0) as u64;
        if counted < elapsed {
            let idle_gap = now - state.last_activity_at;
            if idle_gap <= self.idle_threshold {
                state.interval.active_seconds += 1;
                state.totals.active_seconds += 1;
            } else {
                state.interval.idle_seconds += 1;
                state.totals.idle_seconds += 1;
            }
        }

        let Some(window) = window else {
            return;
        };
        if state.last_window_handle == Some(window.handle) {
            return;
        }

        state.last_window_handle = Some(window.handle);
        state.last_window_change_at = now;
        state.interval.window_changes += 1;
        state.totals.window_changes += 1;

        let app = AppIdentity {
            exe: window.exe,
            title: window.title,
        };
        if app != state.current_app {
            tracing::debug!(exe = ?app.exe, "foreground application changed");
            let detail = format!(
                "Switched to {}",
                app.exe.as_deref().unwrap_or("Unknown app")
            );
            state.switch_app(app, now);
            state.record(now, ActivityKind::WindowSwitch, detail);
        }
    }

    /// Consistent read-only copy for status displays.
    pub fn snapshot(&self, now: DateTime<Utc>) -> AgentSnapshot {
        self.lock().snapshot(now)
    }
}

fn touch_mouse(state: &mut AgentState, now: DateTime<Utc>) {
    state.last_activity_at = now;
    state.last_mouse_at = now;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::noop::NoopWindowProbe;
    use crate::collector::ForegroundWindow;
    use std::sync::Arc;

    struct ScriptedProbe(Mutex<Vec<Option<ForegroundWindow>>>);

    impl WindowProbe for ScriptedProbe {
        fn poll_foreground(&self) -> Option<ForegroundWindow> {
            let mut script = self.0.lock().unwrap();
            if script.is_empty() {
                None
            } else {
                script.remove(0)
            }
        }
    }

    fn window(handle: u64, exe: &str) -> Option<ForegroundWindow> {
        Some(ForegroundWindow {
            handle,
            exe: Some(exe.to_string()),
            title: Some(format!("{exe} window")),
        })
    }

    fn accumulator(start: DateTime<Utc>) -> Accumulator {
        Accumulator::new("EMP-1", &Config::default(), Box::new(NoopWindowProbe), start)
    }

    #[test]
    fn test_key_counters_and_streak() {
        let start = Utc::now();
        let acc = accumulator(start);
        for i in 0..3 {
            acc.on_key(start + Duration::seconds(i), &KeyIdentity::new("a"));
        }
        acc.on_key(start + Duration::seconds(3), &KeyIdentity::new("b"));

        acc.with_state(|s| {
            assert_eq!(s.interval.keypresses, 4);
            assert_eq!(s.totals.keypresses, 4);
            assert_eq!(s.key_streak.count, 1);
            assert_eq!(s.key_streak.key, Some(KeyIdentity::new("b")));
            assert_eq!(s.last_activity_at, start + Duration::seconds(3));
        });
    }

    #[test]
    fn test_key_window_is_pruned() {
        let start = Utc::now();
        let acc = accumulator(start);
        acc.on_key(start, &KeyIdentity::new("a"));
        acc.on_key(start + Duration::seconds(30), &KeyIdentity::new("a"));
        acc.on_key(start + Duration::seconds(61), &KeyIdentity::new("a"));

        acc.with_state(|s| {
            assert_eq!(s.key_timestamps.len(), 2);
            let latest = *s.key_timestamps.back().unwrap();
            assert!(s
                .key_timestamps
                .iter()
                .all(|t| latest - *t <= Duration::seconds(60)));
        });
    }

    #[test]
    fn test_streak_backstop_flags_any_key() {
        let start = Utc::now();
        let mut config = Config::default();
        config.suspicious_key_threshold = 5;
        let acc = Accumulator::new("EMP-1", &config, Box::new(NoopWindowProbe), start);

        for i in 0..6 {
            let verdict = acc.on_key(start + Duration::seconds(i), &KeyIdentity::new("x"));
            assert!(verdict.is_none());
        }
        acc.with_state(|s| {
            assert_eq!(s.interval.suspicious, 1);
            assert_eq!(s.totals.suspicious, 1);
            assert_eq!(s.key_streak.count, 0);
            assert_eq!(s.suspicious_events.len(), 1);
        });
    }

    #[test]
    fn test_mouse_events_reset_mouse_timer() {
        let start = Utc::now();
        let acc = accumulator(start);
        let t = start + Duration::seconds(7);
        acc.on_mouse_move(t, 1, 2);
        acc.on_mouse_click(t, 1, 2, MouseButton::Left, true);
        acc.on_mouse_click(t, 1, 2, MouseButton::Left, false);
        acc.on_mouse_scroll(t, 1, 2, 0.0, -1.0);

        acc.with_state(|s| {
            assert_eq!(s.last_mouse_at, t);
            assert_eq!(s.last_activity_at, t);
            assert_eq!(s.interval.mouse_moves, 1);
            assert_eq!(s.interval.mouse_clicks, 1);
            assert_eq!(s.interval.scrolls, 1);
            assert_eq!(s.totals.mouse_events(), 3);
        });
    }

    #[test]
    fn test_idle_threshold_boundary_is_inclusive() {
        let start = Utc::now();
        let acc = accumulator(start);
        // Gap of exactly 300s counts as active, 301s as idle.
        acc.tick_second(start + Duration::seconds(300));
        acc.with_state(|s| {
            assert_eq!(s.interval.active_seconds, 1);
            assert_eq!(s.interval.idle_seconds, 0);
        });
        acc.tick_second(start + Duration::seconds(301));
        acc.with_state(|s| {
            assert_eq!(s.interval.active_seconds, 1);
            assert_eq!(s.interval.idle_seconds, 1);
            assert_eq!(s.totals.idle_seconds, 1);
        });
    }

    #[test]
    fn test_tick_never_outpaces_wall_clock() {
        let start = Utc::now();
        let acc = accumulator(start);
        // Ticks arriving faster than once per second are not all counted.
        for i in 0..10 {
            acc.tick_second(start + Duration::milliseconds(250 * i));
        }
        acc.with_state(|s| {
            let counted = s.interval.active_seconds + s.interval.idle_seconds;
            assert!(counted <= 2);
        });
    }

    #[test]
    fn test_window_change_detection() {
        let start = Utc::now();
        let probe = ScriptedProbe(Mutex::new(vec![
            window(1, "code.exe"),
            window(1, "code.exe"),
            None,
            window(2, "chrome.exe"),
        ]));
        let acc = Accumulator::new("EMP-1", &Config::default(), Box::new(probe), start);

        for i in 1..=4 {
            acc.tick_second(start + Duration::seconds(i));
        }

        acc.with_state(|s| {
            assert_eq!(s.interval.window_changes, 2);
            assert_eq!(s.current_app.exe.as_deref(), Some("chrome.exe"));
            assert_eq!(s.last_window_handle, Some(2));
            assert_eq!(s.last_window_change_at, start + Duration::seconds(4));
            assert_eq!(s.interval.active_seconds, 4);

            // code.exe was in front from the first tick to the switch.
            assert_eq!(s.finished_apps.len(), 1);
            assert_eq!(s.finished_apps[0].app_exe.as_deref(), Some("code.exe"));
            assert!((s.finished_apps[0].duration_seconds - 3.0).abs() < 1e-9);
            assert_eq!(s.current_app_since, start + Duration::seconds(4));
        });
    }

    #[test]
    fn test_unknown_window_never_crashes() {
        let start = Utc::now();
        let acc = accumulator(start);
        acc.tick_second(start + Duration::seconds(1));
        let snapshot = acc.snapshot(start + Duration::seconds(1));
        assert_eq!(snapshot.current_app, AppIdentity::default());
        assert_eq!(snapshot.interval.window_changes, 0);
    }

    #[test]
    fn test_concurrent_input_and_ticks() {
        let start = Utc::now();
        let acc = Arc::new(accumulator(start));

        let writers: Vec<_> = (0..2)
            .map(|n| {
                let acc = Arc::clone(&acc);
                std::thread::spawn(move || {
                    for i in 0..500 {
                        let t = start + Duration::milliseconds(i * 10);
                        if n == 0 {
                            acc.on_key(t, &KeyIdentity::new("a"));
                        } else {
                            acc.on_mouse_move(t, i as i32, 0);
                        }
                    }
                })
            })
            .collect();

        for second in 1..=5 {
            acc.tick_second(start + Duration::seconds(second));
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let snapshot = acc.snapshot(start + Duration::seconds(5));
        assert!(snapshot.interval.active_seconds + snapshot.interval.idle_seconds <= 5);
        assert_eq!(snapshot.totals.keypresses, 500);
        assert_eq!(snapshot.totals.mouse_moves, 500);
    }
}
