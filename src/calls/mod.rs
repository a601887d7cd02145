//! Call Sessions
//!
//! Per-call state, the transition table, the session registry, and the state
//! machine that applies gateway events to sessions.

pub mod machine;
pub mod registry;
pub mod session;
pub mod state;

pub use machine::*;
pub use registry::*;
pub use session::*;
pub use state::*;

use thiserror::Error;

/// Call session errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call not found: {0}")]
    CallNotFound(CallId),

    #[error("Call already tracked: {0}")]
    AlreadyTracked(CallId),

    #[error("Invalid transition for call {call_id}: {from:?} on {event}")]
    InvalidTransition {
        call_id: CallId,
        from: CallState,
        event: &'static str,
    },

    #[error("Call {0} was not accepted before it became ready")]
    NotAccepted(CallId),

    #[error("Call already accepted: {0}")]
    AlreadyAccepted(CallId),

    #[error("Gateway command failed: {0}")]
    Command(String),
}

/// Result type for call operations
pub type Result<T> = std::result::Result<T, CallError>;
