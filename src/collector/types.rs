//! Input event types delivered by the platform event sources.
//!
//! Keys are carried as a normalized identity (`space`, `up`, `a`, ...) so the
//! anomaly detector can reason about streaks of identical presses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized identity of a pressed key.
///
/// Named keys use lowercase names (`space`, `esc`, `enter`, `up`), printable
/// keys use the character itself (`a`, `7`). Unknown keys fall back to
/// `vk<code>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyIdentity(String);

impl KeyIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }

    /// Identity for a key the platform layer could not name.
    pub fn from_code(code: u32) -> Self {
        Self(format!("vk{code}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for KeyIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A key-down event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEvent {
    pub timestamp: DateTime<Utc>,
    pub key: KeyIdentity,
}

impl KeyEvent {
    pub fn new(key: impl Into<KeyIdentity>) -> Self {
        Self::at(Utc::now(), key)
    }

    pub fn at(timestamp: DateTime<Utc>, key: impl Into<KeyIdentity>) -> Self {
        Self {
            timestamp,
            key: key.into(),
        }
    }
}

/// Mouse button classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Other,
}

impl fmt::Display for MouseButton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
            MouseButton::Other => "other",
        };
        f.write_str(name)
    }
}

/// A mouse event with screen coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MouseEvent {
    pub timestamp: DateTime<Utc>,
    pub x: i32,
    pub y: i32,
    pub kind: MouseEventKind,
}

/// What happened at the mouse.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MouseEventKind {
    Move,
    Click { button: MouseButton, pressed: bool },
    Scroll { dx: f64, dy: f64 },
}

impl MouseEvent {
    pub fn movement(x: i32, y: i32) -> Self {
        Self::at(Utc::now(), x, y, MouseEventKind::Move)
    }

    pub fn click(x: i32, y: i32, button: MouseButton, pressed: bool) -> Self {
        Self::at(Utc::now(), x, y, MouseEventKind::Click { button, pressed })
    }

    pub fn scroll(x: i32, y: i32, dx: f64, dy: f64) -> Self {
        Self::at(Utc::now(), x, y, MouseEventKind::Scroll { dx, dy })
    }

    pub fn at(timestamp: DateTime<Utc>, x: i32, y: i32, kind: MouseEventKind) -> Self {
        Self { timestamp, x, y, kind }
    }
}

/// Unified event type carried over the collector channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InputEvent {
    Key(KeyEvent),
    Mouse(MouseEvent),
}

impl InputEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            InputEvent::Key(e) => e.timestamp,
            InputEvent::Mouse(e) => e.timestamp,
        }
    }
}

/// Identity of the foreground window as reported by a [`WindowProbe`].
///
/// [`WindowProbe`]: crate::collector::WindowProbe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForegroundWindow {
    /// Opaque platform handle, compared for change detection only
    pub handle: u64,
    /// Executable name of the owning process, if it could be resolved
    pub exe: Option<String>,
    /// Window title, if any
    pub title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_identity_is_lowercased() {
        assert_eq!(KeyIdentity::new("Space").as_str(), "space");
        assert_eq!(KeyIdentity::from_code(255).as_str(), "vk255");
    }

    #[test]
    fn test_event_timestamp() {
        let ts = Utc::now();
        let event = InputEvent::Mouse(MouseEvent::at(ts, 10, 20, MouseEventKind::Move));
        assert_eq!(event.timestamp(), ts);
    }

    #[test]
    fn test_mouse_button_display() {
        assert_eq!(MouseButton::Left.to_string(), "left");
        assert_eq!(MouseButton::Middle.to_string(), "middle");
    }
}
