//! OS session actions performed on a forced logout.

use crate::config::LogoutAction;

/// Session action errors.
#[derive(Debug)]
pub enum SessionActionError {
    /// The action has no implementation on this platform
    Unsupported(LogoutAction),
    /// An external command ran but reported failure
    CommandFailed(String),
    /// A system call failed
    Os(String),
}

impl std::fmt::Display for SessionActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionActionError::Unsupported(action) => {
                write!(f, "Session action '{action}' is not supported on this platform")
            }
            SessionActionError::CommandFailed(msg) => write!(f, "Session command failed: {msg}"),
            SessionActionError::Os(msg) => write!(f, "Session system call failed: {msg}"),
        }
    }
}

impl std::error::Error for SessionActionError {}

/// Capability to end or lock the interactive session.
pub trait SessionControl: Send {
    fn perform(&mut self, action: LogoutAction) -> Result<(), SessionActionError>;
}

/// Records requested actions without touching the session.
///
/// Used for `--dry-run` and in tests.
#[derive(Debug, Default)]
pub struct NoopSessionControl {
    performed: Vec<LogoutAction>,
}

impl NoopSessionControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn performed(&self) -> &[LogoutAction] {
        &self.performed
    }
}

impl SessionControl for NoopSessionControl {
    fn perform(&mut self, action: LogoutAction) -> Result<(), SessionActionError> {
        tracing::info!(%action, "dry run: session action skipped");
        self.performed.push(action);
        Ok(())
    }
}

/// The platform's real session control.
#[derive(Debug, Default)]
pub struct SystemSessionControl;

impl SystemSessionControl {
    pub fn new() -> Self {
        Self
    }
}

impl SessionControl for SystemSessionControl {
    fn perform(&mut self, action: LogoutAction) -> Result<(), SessionActionError> {
        tracing::info!(%action, "performing session action");
        platform::perform(action)
    }
}

#[allow(dead_code)]
fn run_command(program: &str, args: &[&str]) -> Result<(), SessionActionError> {
    let status = std::process::Command::new(program)
        .args(args)
        .status()
        .map_err(|e| SessionActionError::CommandFailed(format!("{program}: {e}")))?;
    if status.success() {
        Ok(())
    } else {
        Err(SessionActionError::CommandFailed(format!(
            "{program} exited with {status}"
        )))
    }
}

#[cfg(target_os = "windows")]
mod platform {
    use super::{run_command, SessionActionError};
    use crate::config::LogoutAction;
    use windows::Win32::System::Shutdown::{
        ExitWindowsEx, LockWorkStation, EWX_LOGOFF, SHTDN_REASON_MAJOR_OTHER,
    };

    pub fn perform(action: LogoutAction) -> Result<(), SessionActionError> {
        match action {
            LogoutAction::Lock => unsafe { LockWorkStation() }
                .map_err(|e| SessionActionError::Os(format!("LockWorkStation: {e}"))),
            LogoutAction::Disconnect => run_command("tsdiscon", &[]),
            LogoutAction::Logoff => unsafe { ExitWindowsEx(EWX_LOGOFF, SHTDN_REASON_MAJOR_OTHER) }
                .map_err(|e| SessionActionError::Os(format!("ExitWindowsEx: {e}"))),
        }
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::{run_command, SessionActionError};
    use crate::config::LogoutAction;

    pub fn perform(action: LogoutAction) -> Result<(), SessionActionError> {
        match action {
            LogoutAction::Lock => run_command("pmset", &["displaysleepnow"]),
            LogoutAction::Logoff => run_command(
                "osascript",
                &["-e", "tell application \"System Events\" to log out"],
            ),
            LogoutAction::Disconnect => Err(SessionActionError::Unsupported(action)),
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use super::{run_command, SessionActionError};
    use crate::config::LogoutAction;

    pub fn perform(action: LogoutAction) -> Result<(), SessionActionError> {
        match action {
            LogoutAction::Lock => run_command("loginctl", &["lock-session"]),
            LogoutAction::Logoff => {
                let session = std::env::var("XDG_SESSION_ID").map_err(|_| {
                    SessionActionError::CommandFailed("XDG_SESSION_ID is not set".to_string())
                })?;
                run_command("loginctl", &["terminate-session", &session])
            }
            LogoutAction::Disconnect => Err(SessionActionError::Unsupported(action)),
        }
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
mod platform {
    use super::SessionActionError;
    use crate::config::LogoutAction;

    pub fn perform(action: LogoutAction) -> Result<(), SessionActionError> {
        Err(SessionActionError::Unsupported(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noop_records_actions() {
        let mut control = NoopSessionControl::new();
        control.perform(LogoutAction::Lock).unwrap();
        control.perform(LogoutAction::Logoff).unwrap();
        assert_eq!(
            control.performed(),
            &[LogoutAction::Lock, LogoutAction::Logoff]
        );
    }

    #[test]
    fn test_error_display() {
        let err = SessionActionError::Unsupported(LogoutAction::Disconnect);
        assert!(err.to_string().contains("disconnect"));
    }

    #[test]
    fn test_missing_command_is_an_error() {
        let err = run_command("activity-agent-no-such-binary", &[]).unwrap_err();
        assert!(matches!(err, SessionActionError::CommandFailed(_)));
    }
}
