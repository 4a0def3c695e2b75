//! Configuration for the activity agent.
//!
//! Settings live in a flat JSON document. Every key has a default, so a
//! partial file only overrides what it names; CLI flags are merged on top
//! through [`ConfigOverrides`].

use chrono::Duration;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// Base URL used when neither the file nor the CLI names one.
pub const DEFAULT_BACKEND_BASE_URL: &str = "http://127.0.0.1:8000";

/// Upper bound for every period setting: thirty days.
pub const MAX_PERIOD_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Collector base URL, without a trailing slash
    pub backend_base_url: String,

    /// Legacy full activity endpoint (`…/activity`), read for compatibility
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_url: Option<String>,

    /// Seconds between telemetry sends
    pub send_interval_seconds: u64,

    /// Inactivity gap up to which a second still counts as active
    pub idle_threshold_seconds: u64,

    /// Inactivity gap that forces a logout
    pub idle_logout_seconds: u64,

    /// Identical-key streak length that raises a suspicious flag
    pub suspicious_key_threshold: u32,

    /// Session suspicious flags tolerated before a forced logout
    pub max_suspicious_flags: u32,

    /// OS action taken on a forced logout
    pub logout_action: LogoutAction,

    /// Timeout for each collector request
    pub request_timeout_seconds: u64,

    /// Controller poll cadence in milliseconds
    pub poll_interval_ms: u64,

    /// Fake-activity detector tuning
    pub detector: DetectorConfig,

    /// Remembered employee identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub employee_id: Option<String>,

    /// Whether `employee_id` should be reused on the next start
    pub remember_me: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_base_url: DEFAULT_BACKEND_BASE_URL.to_string(),
            backend_url: None,
            send_interval_seconds: 60,
            idle_threshold_seconds: 300,
            idle_logout_seconds: 300,
            suspicious_key_threshold: 500,
            max_suspicious_flags: 3,
            logout_action: LogoutAction::Lock,
            request_timeout_seconds: 10,
            poll_interval_ms: 100,
            detector: DetectorConfig::default(),
            employee_id: None,
            remember_me: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json(&content)
    }

    /// Parse a configuration document and normalize the backend URL.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: serde_json::Value =
            serde_json::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let has_base = raw.get("backend_base_url").is_some();

        let mut config: Config =
            serde_json::from_value(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if !has_base {
            if let Some(legacy) = config.backend_url.clone() {
                let base = legacy.trim_end_matches('/');
                config.backend_base_url = base.strip_suffix("/activity").unwrap_or(base).to_string();
            }
        }
        config.backend_base_url = config.backend_base_url.trim_end_matches('/').to_string();

        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("activity-agent")
            .join("config.json")
    }

    /// Apply caller-supplied overrides on top of this configuration.
    pub fn merge(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(url) = overrides.backend_base_url {
            self.backend_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(v) = overrides.send_interval_seconds {
            self.send_interval_seconds = v;
        }
        if let Some(v) = overrides.idle_threshold_seconds {
            self.idle_threshold_seconds = v;
        }
        if let Some(v) = overrides.idle_logout_seconds {
            self.idle_logout_seconds = v;
        }
        if let Some(v) = overrides.suspicious_key_threshold {
            self.suspicious_key_threshold = v;
        }
        if let Some(v) = overrides.logout_action {
            self.logout_action = v;
        }
        self
    }

    /// Reject settings the run loop cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.backend_base_url.starts_with("http://")
            || self.backend_base_url.starts_with("https://"))
        {
            return Err(ConfigError::Invalid(format!(
                "backend_base_url must be an http(s) URL, got '{}'",
                self.backend_base_url
            )));
        }
        for (name, value) in [
            ("send_interval_seconds", self.send_interval_seconds),
            ("idle_threshold_seconds", self.idle_threshold_seconds),
            ("idle_logout_seconds", self.idle_logout_seconds),
            ("request_timeout_seconds", self.request_timeout_seconds),
        ] {
            if value == 0 || value > MAX_PERIOD_SECONDS {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 1 and {MAX_PERIOD_SECONDS}, got {value}"
                )));
            }
        }
        if self.poll_interval_ms == 0 || self.poll_interval_ms > 1_000 {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms must be between 1 and 1000, got {}",
                self.poll_interval_ms
            )));
        }
        self.detector.validate()
    }

    pub fn send_interval(&self) -> Duration {
        whole_seconds(self.send_interval_seconds)
    }

    pub fn idle_threshold(&self) -> Duration {
        whole_seconds(self.idle_threshold_seconds)
    }

    pub fn idle_logout(&self) -> Duration {
        whole_seconds(self.idle_logout_seconds)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_seconds.min(MAX_PERIOD_SECONDS))
    }
}

/// Saturates at [`MAX_PERIOD_SECONDS`] so an unvalidated value can neither
/// wrap negative nor overflow chrono's range.
fn whole_seconds(seconds: u64) -> Duration {
    Duration::seconds(seconds.min(MAX_PERIOD_SECONDS) as i64)
}

/// Optional values layered over a loaded [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub backend_base_url: Option<String>,
    pub send_interval_seconds: Option<u64>,
    pub idle_threshold_seconds: Option<u64>,
    pub idle_logout_seconds: Option<u64>,
    pub suspicious_key_threshold: Option<u32>,
    pub logout_action: Option<LogoutAction>,
}

/// OS session action performed on a forced logout.
///
/// An unknown name in the config file falls back to [`LogoutAction::Lock`]
/// with a warning; the CLI flag stays strict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogoutAction {
    /// Lock the workstation
    #[default]
    Lock,
    /// Disconnect the remote session
    Disconnect,
    /// Log the user off
    Logoff,
}

impl std::fmt::Display for LogoutAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogoutAction::Lock => "lock",
            LogoutAction::Disconnect => "disconnect",
            LogoutAction::Logoff => "logoff",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for LogoutAction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "lock" => Ok(LogoutAction::Lock),
            "disconnect" => Ok(LogoutAction::Disconnect),
            "logoff" => Ok(LogoutAction::Logoff),
            other => Err(ConfigError::Invalid(format!(
                "unknown logout action '{other}' (expected lock, disconnect or logoff)"
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for LogoutAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(name.parse().unwrap_or_else(|e: ConfigError| {
            tracing::warn!(error = %e, "falling back to lock");
            LogoutAction::Lock
        }))
    }
}

/// Thresholds for the statistical fake-activity check.
///
/// The defaults were tuned empirically; all of them can be overridden from
/// the `detector` section of the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Keys cheap enough to script that the check considers them at all
    pub simple_keys: Vec<String>,
    /// The identical-key streak must exceed this
    pub min_streak: u32,
    /// Required quiet time since the last mouse event
    pub mouse_quiet_seconds: f64,
    /// Required quiet time since the last window change
    pub window_quiet_seconds: f64,
    /// Minimum key timestamps in the trailing window
    pub min_samples: usize,
    /// Inter-key standard deviation below which timing looks scripted
    pub max_jitter_seconds: f64,
    /// Mean inter-key interval above which presses are not auto-repeat
    pub min_mean_interval_seconds: f64,
    /// Length of the trailing key timestamp window
    pub key_window_seconds: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            simple_keys: ["space", "esc", "up", "down", "left", "right"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_streak: 50,
            mouse_quiet_seconds: 15.0,
            window_quiet_seconds: 15.0,
            min_samples: 10,
            max_jitter_seconds: 0.02,
            min_mean_interval_seconds: 0.05,
            key_window_seconds: 60.0,
        }
    }
}

impl DetectorConfig {
    /// Every duration must be a finite, non-negative number of seconds, and
    /// the key window must be long enough to hold samples.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("mouse_quiet_seconds", self.mouse_quiet_seconds),
            ("window_quiet_seconds", self.window_quiet_seconds),
            ("max_jitter_seconds", self.max_jitter_seconds),
            ("min_mean_interval_seconds", self.min_mean_interval_seconds),
            ("key_window_seconds", self.key_window_seconds),
        ] {
            if !value.is_finite() || value < 0.0 || value > MAX_PERIOD_SECONDS as f64 {
                return Err(ConfigError::Invalid(format!(
                    "detector.{name} must be between 0 and {MAX_PERIOD_SECONDS}, got {value}"
                )));
            }
        }
        if self.key_window_seconds == 0.0 {
            return Err(ConfigError::Invalid(
                "detector.key_window_seconds must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
