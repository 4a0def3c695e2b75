//! HTTP client for the activity collector.
//!
//! The collector exposes two endpoints the agent relies on:
//! - `GET {base}/employees/{id}`: 200 if the employee exists, 404 otherwise
//! - `POST {base}/activity`: 200 accepted, 404 employee not registered
//!
//! Status codes are returned to the caller rather than turned into errors;
//! only transport failures are [`BackendError`]s.

use crate::core::{AppUsage, CurrentActivity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Collector endpoint configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Base URL, e.g. `https://collector.example.com`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl BackendConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(config.backend_base_url.clone(), config.request_timeout())
    }

    /// Activity ingest endpoint.
    pub fn activity_url(&self) -> String {
        format!("{}/activity", self.base_url)
    }

    /// Employee existence check endpoint. The id is percent-encoded as a
    /// single path segment.
    pub fn employee_url(&self, employee_id: &str) -> Result<reqwest::Url, BackendError> {
        let mut url = reqwest::Url::parse(&self.base_url).map_err(|e| {
            BackendError::Config(format!("invalid base URL '{}': {e}", self.base_url))
        })?;
        url.path_segments_mut()
            .map_err(|_| BackendError::Config(format!("'{}' cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["employees", employee_id]);
        Ok(url)
    }
}

/// Backend client error types.
#[derive(Debug)]
pub enum BackendError {
    /// Client could not be constructed
    Config(String),
    /// Connection refused, DNS failure, broken connection
    Network(String),
    /// The request did not complete within the timeout
    Timeout,
    /// The payload could not be encoded
    Serialization(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Config(msg) => write!(f, "Backend config error: {msg}"),
            BackendError::Network(msg) => write!(f, "Backend network error: {msg}"),
            BackendError::Timeout => write!(f, "Backend request timed out"),
            BackendError::Serialization(msg) => write!(f, "Backend serialization error: {msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            BackendError::Timeout
        } else if e.is_builder() || e.is_body() {
            BackendError::Serialization(e.to_string())
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

/// Interval summary posted to `/activity`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityPayload {
    pub employee_id: String,
    /// UTC, ISO-8601 without a zone suffix
    pub timestamp: String,
    pub active_seconds: u64,
    pub idle_seconds: u64,
    pub suspicious: bool,
    pub active_app_exe: Option<String>,
    pub active_app_title: Option<String>,
    /// When the active app came to the foreground
    pub current_app_started_at: Option<DateTime<Utc>>,
    pub current_activity: CurrentActivity,
    /// Foreground time per app this interval, the active app first
    pub app_usage: Vec<AppUsage>,

    pub keypresses: u64,
    pub mouse_clicks: u64,
    pub mouse_moves: u64,
    pub scrolls: u64,
    pub window_changes: u64,
    pub suspicious_events: Vec<String>,

    pub total_active_seconds: u64,
    pub total_idle_seconds: u64,
    pub total_keypresses: u64,
    pub total_mouse_events: u64,
    pub total_window_changes: u64,
}

impl ActivityPayload {
    /// One-line summary, e.g. `12 keys 3 clicks on chrome (active)`.
    pub fn describe(&self, send_interval_seconds: u64) -> String {
        let mut parts = Vec::new();

        if self.keypresses > 0 {
            parts.push(format!("{} keys", self.keypresses));
        }
        if self.mouse_clicks > 0 {
            parts.push(format!("{} clicks", self.mouse_clicks));
        }
        if self.scrolls > 0 {
            parts.push(format!("{} scrolls", self.scrolls));
        }
        if let Some(exe) = &self.active_app_exe {
            let name = exe.split('.').next().unwrap_or(exe);
            parts.push(format!("on {name}"));
        }

        // Bands are fractions of the interval: most of it, half, any.
        let interval = send_interval_seconds.max(1);
        let label = if self.active_seconds * 8 >= interval * 7 {
            "(very active)"
        } else if self.active_seconds * 2 >= interval {
            "(active)"
        } else if self.active_seconds > 0 {
            "(some activity)"
        } else {
            "(idle)"
        };
        parts.push(label.to_string());

        parts.join(" ")
    }
}

/// Result of checking an employee id against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Registered,
    Unregistered,
    /// Any other status code
    Rejected(u16),
}

impl Registration {
    pub fn from_status(status: u16) -> Self {
        match status {
            200 => Registration::Registered,
            404 => Registration::Unregistered,
            other => Registration::Rejected(other),
        }
    }
}

/// The collector as seen by the dispatcher. Substituted by fakes in tests.
pub trait ActivityTransport: Send + Sync {
    /// POST the payload; returns the HTTP status code.
    fn post_activity(&self, payload: &ActivityPayload) -> Result<u16, BackendError>;

    /// GET the employee record; returns the HTTP status code.
    fn fetch_employee(&self, employee_id: &str) -> Result<u16, BackendError>;
}

/// Verify that `employee_id` exists on the collector.
pub fn verify_employee(
    transport: &dyn ActivityTransport,
    employee_id: &str,
) -> Result<Registration, BackendError> {
    let status = transport.fetch_employee(employee_id)?;
    Ok(Registration::from_status(status))
}

/// Async collector client.
pub struct BackendClient {
    config: BackendConfig,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(format!("activity-agent/{} ({host})", crate::VERSION))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub async fn post_activity(&self, payload: &ActivityPayload) -> Result<u16, BackendError> {
        let response = self
            .client
            .post(self.config.activity_url())
            .json(payload)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    pub async fn fetch_employee(&self, employee_id: &str) -> Result<u16, BackendError> {
        let response = self
            .client
            .get(self.config.employee_url(employee_id)?)
            .send()
            .await?;
        Ok(response.status().as_u16())
    }
}

/// Blocking collector client for the synchronous control loop.
pub struct BlockingBackendClient {
    inner: BackendClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingBackendClient {
    /// Must not be called from inside another tokio runtime.
    pub fn new(config: BackendConfig) -> Result<Self, BackendError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| BackendError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: BackendClient::new(config)?,
            runtime,
        })
    }

    pub fn config(&self) -> &BackendConfig {
        self.inner.config()
    }
}

impl ActivityTransport for BlockingBackendClient {
    fn post_activity(&self, payload: &ActivityPayload) -> Result<u16, BackendError> {
        self.runtime.block_on(self.inner.post_activity(payload))
    }

    fn fetch_employee(&self, employee_id: &str) -> Result<u16, BackendError> {
        self.runtime.block_on(self.inner.fetch_employee(employee_id))
    }
}
