//! Statistical fake-activity detection.
//!
//! Scripted input on low-entropy keys (space, arrows, escape) tends to arrive
//! at a fixed cadence with almost no jitter, while nothing else happens on
//! the machine. The check fires only when all of these line up:
//!
//! 1. the key is in the configured simple-key set
//! 2. the identical-key streak exceeds `min_streak`
//! 3. no mouse event and no window change for the quiet periods
//! 4. at least `min_samples` key timestamps in the trailing window
//! 5. inter-key deltas have `stddev < max_jitter` and `mean > min_mean`
//!
//! Human auto-repeat also has near-zero jitter but a much smaller mean, which
//! is what condition 5's lower bound on the mean excludes.

use crate::collector::KeyIdentity;
use crate::config::{DetectorConfig, MAX_PERIOD_SECONDS};
use crate::core::state::{seconds_between, AgentState};
use chrono::{DateTime, Utc};
use statrs::statistics::Statistics;
use std::collections::HashSet;

/// Evidence behind a fake-activity verdict.
#[derive(Debug, Clone, PartialEq)]
pub struct FakeActivity {
    pub key: KeyIdentity,
    pub streak: u32,
    pub samples: usize,
    pub mean_interval: f64,
    pub jitter: f64,
}

impl FakeActivity {
    pub fn describe(&self) -> String {
        format!(
            "Uniform key spam detected (key: {}, streak: {}, mean {:.3}s, stddev {:.4}s)",
            self.key, self.streak, self.mean_interval, self.jitter
        )
    }
}

/// Fake-activity detector with its tuning.
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    simple_keys: HashSet<KeyIdentity>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let simple_keys = config
            .simple_keys
            .iter()
            .map(|k| KeyIdentity::new(k.as_str()))
            .collect();
        Self {
            config,
            simple_keys,
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Length of the trailing key-timestamp window the accumulator keeps.
    ///
    /// Out-of-range settings are clamped; `NaN` becomes an empty window.
    pub fn key_window(&self) -> chrono::Duration {
        let seconds = self
            .config
            .key_window_seconds
            .clamp(0.0, MAX_PERIOD_SECONDS as f64);
        chrono::Duration::milliseconds((seconds * 1000.0) as i64)
    }

    pub fn is_simple_key(&self, key: &KeyIdentity) -> bool {
        self.simple_keys.contains(key)
    }

    /// Evaluate the policy against the state as of a key press at `now`.
    ///
    /// Read-only: flagging and the logout are the caller's business.
    pub fn check_fake_activity(
        &self,
        state: &AgentState,
        now: DateTime<Utc>,
        key: &KeyIdentity,
    ) -> Option<FakeActivity> {
        if !self.is_simple_key(key) {
            return None;
        }

        if state.key_streak.key.as_ref() != Some(key)
            || state.key_streak.count <= self.config.min_streak
        {
            return None;
        }

        let no_mouse_for = seconds_between(state.last_mouse_at, now);
        let no_window_for = seconds_between(state.last_window_change_at, now);
        if no_mouse_for < self.config.mouse_quiet_seconds
            || no_window_for < self.config.window_quiet_seconds
        {
            return None;
        }

        let samples = state.key_timestamps.len();
        if samples < self.config.min_samples || samples < 2 {
            return None;
        }

        let deltas: Vec<f64> = state
            .key_timestamps
            .iter()
            .zip(state.key_timestamps.iter().skip(1))
            .map(|(a, b)| seconds_between(*a, *b))
            .collect();
        let mean = deltas.iter().mean();
        let jitter = deltas.iter().population_std_dev();

        if jitter < self.config.max_jitter_seconds && mean > self.config.min_mean_interval_seconds {
            Some(FakeActivity {
                key: key.clone(),
                streak: state.key_streak.count,
                samples,
                mean_interval: mean,
                jitter,
            })
        } else {
            None
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}
