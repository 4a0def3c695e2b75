//! Session lifecycle: the control loop and the OS actions it can take.

pub mod action;
pub mod controller;

pub use action::{NoopSessionControl, SessionActionError, SessionControl, SystemSessionControl};
pub use controller::{ensure_registered, AgentError, ExitReason, SessionController, StopHandle};
