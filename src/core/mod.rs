//! Core functionality for the activity agent.
//!
//! This module contains:
//! - Shared agent state and its lifecycle
//! - The interval accumulator fed by input events and the per-second tick
//! - The statistical fake-activity detector
//! - A bounded activity history for status displays

pub mod accumulator;
pub mod detector;
pub mod history;
pub mod state;

// Re-export commonly used types
pub use accumulator::Accumulator;
pub use detector::{AnomalyDetector, FakeActivity};
pub use history::{ActivityKind, ActivityRecord, CurrentActivity, RingBuffer};
pub use state::{
    AgentSnapshot, AgentState, AppIdentity, AppUsage, BackendStatus, IntervalCounters, KeyStreak,
    LogoutReason, RunState, SessionTotals,
};
