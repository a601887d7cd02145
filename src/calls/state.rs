//! Call Transition Table
//!
//! Pure mapping from (state, event) to the next state. The registry applies
//! it under its lock; nothing else decides where a call goes next.

use super::{CallError, CallId, CallState, DiscardReason, Result};

/// Input to the transition table
///
/// `Incoming` is absent: it creates a session rather than moving one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallEvent {
    /// Gateway reported key exchange in progress
    KeyExchange,
    /// Gateway reported the call connected
    Ready,
    /// Connected duration passed the configured maximum
    MaxDurationExceeded,
    /// Caller said goodbye
    HangUp,
    /// No ready event arrived within the grace period after acceptance
    ReadyTimeout,
    /// Gateway discarded the call (or we gave up waiting for it to)
    Discarded(DiscardReason),
}

impl CallEvent {
    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::KeyExchange => "key_exchange",
            CallEvent::Ready => "ready",
            CallEvent::MaxDurationExceeded => "max_duration_exceeded",
            CallEvent::HangUp => "hang_up",
            CallEvent::ReadyTimeout => "ready_timeout",
            CallEvent::Discarded(_) => "discarded",
        }
    }
}

/// Compute the state reached from `from` on `event`
pub fn next_state(call_id: CallId, from: CallState, event: CallEvent) -> Result<CallState> {
    use CallState::*;

    let to = match (from, event) {
        (Ended, _) => None,
        (_, CallEvent::Discarded(_)) => Some(Ended),
        (Pending | KeyExchange, CallEvent::KeyExchange) => Some(KeyExchange),
        (Pending | KeyExchange, CallEvent::Ready) => Some(Ready),
        (Pending | KeyExchange, CallEvent::ReadyTimeout) => Some(Ending),
        (Ready, CallEvent::MaxDurationExceeded | CallEvent::HangUp) => Some(Ending),
        _ => None,
    };

    to.ok_or(CallError::InvalidTransition {
        call_id,
        from,
        event: event.name(),
    })
}
