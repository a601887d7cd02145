//! Call Session Record
//!
//! The per-call record kept by the session registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Call identifier assigned by the signaling gateway
pub type CallId = i64;

/// Peer (remote party) identifier
pub type PeerId = i64;

/// Call direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// Remote party called us
    Incoming,
    /// We placed the call
    Outgoing,
}

/// Lifecycle state of a call
///
/// Declared in lifecycle order; `rank` only ever grows for a given call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    /// Ringing, not yet accepted
    Pending,
    /// Key material is being exchanged
    KeyExchange,
    /// Media connected, conversation running
    Ready,
    /// End command issued, waiting for the gateway to discard the call
    Ending,
    /// Terminal
    Ended,
}

impl CallState {
    /// Position in the lifecycle
    pub fn rank(self) -> u8 {
        match self {
            CallState::Pending => 0,
            CallState::KeyExchange => 1,
            CallState::Ready => 2,
            CallState::Ending => 3,
            CallState::Ended => 4,
        }
    }

    /// Whether the call has not connected yet
    pub fn is_connecting(self) -> bool {
        matches!(self, CallState::Pending | CallState::KeyExchange)
    }
}

/// Why a call was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// No reason given
    Empty,
    /// Caller gave up before we answered
    Missed,
    /// Call was declined
    Declined,
    /// Connection dropped
    Disconnected,
    /// One side hung up
    HungUp,
    /// Transport reported an error
    Error,
    /// Ready confirmation or end confirmation never arrived
    Timeout,
}

/// A tracked call
#[derive(Debug, Clone, Serialize)]
pub struct CallSession {
    /// Gateway call ID
    pub call_id: CallId,
    /// Remote party
    pub peer_id: Option<PeerId>,
    /// Current lifecycle state
    pub state: CallState,
    /// Call direction
    pub direction: CallDirection,
    /// When the call was first seen
    pub created_at: DateTime<Utc>,
    /// When the accept command was issued
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the call became ready
    pub connected_at: Option<DateTime<Utc>>,
    /// When the call ended
    pub ended_at: Option<DateTime<Utc>>,
    /// Completed listen/speak cycles
    pub turn_count: u32,
    /// Consecutive listens without an utterance
    pub silence_strikes: u32,
    /// Why the call was discarded
    pub discard_reason: Option<DiscardReason>,
    /// Cancels every task that belongs to this call
    #[serde(skip)]
    pub cancel_token: CancellationToken,
    #[serde(skip)]
    pub(crate) connected_clock: Option<Instant>,
}

impl CallSession {
    /// Create a session in the `Pending` state
    pub fn new(call_id: CallId, direction: CallDirection, peer_id: Option<PeerId>) -> Self {
        Self {
            call_id,
            peer_id,
            state: CallState::Pending,
            direction,
            created_at: Utc::now(),
            accepted_at: None,
            connected_at: None,
            ended_at: None,
            turn_count: 0,
            silence_strikes: 0,
            discard_reason: None,
            cancel_token: CancellationToken::new(),
            connected_clock: None,
        }
    }

    /// Time since the call became ready, if it has
    pub fn connected_elapsed(&self) -> Option<Duration> {
        self.connected_clock.map(|started| started.elapsed())
    }

    /// Whether an incoming call still needs an accept before it may become ready
    pub fn awaiting_accept(&self) -> bool {
        self.direction == CallDirection::Incoming && self.accepted_at.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_pending() {
        let session = CallSession::new(42, CallDirection::Incoming, Some(7));
        assert_eq!(session.call_id, 42);
        assert_eq!(session.peer_id, Some(7));
        assert_eq!(session.state, CallState::Pending);
        assert_eq!(session.turn_count, 0);
        assert_eq!(session.silence_strikes, 0);
        assert!(session.connected_at.is_none());
        assert!(session.connected_elapsed().is_none());
        assert!(!session.cancel_token.is_cancelled());
    }

    #[test]
    fn test_awaiting_accept_only_for_incoming() {
        let mut incoming = CallSession::new(1, CallDirection::Incoming, None);
        assert!(incoming.awaiting_accept());
        incoming.accepted_at = Some(Utc::now());
        assert!(!incoming.awaiting_accept());

        let outgoing = CallSession::new(2, CallDirection::Outgoing, None);
        assert!(!outgoing.awaiting_accept());
    }

    #[test]
    fn test_state_rank_follows_lifecycle() {
        let order = [
            CallState::Pending,
            CallState::KeyExchange,
            CallState::Ready,
            CallState::Ending,
            CallState::Ended,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].rank() < pair[1].rank());
        }
        assert!(CallState::Pending.is_connecting());
        assert!(CallState::KeyExchange.is_connecting());
        assert!(!CallState::Ready.is_connecting());
    }

    #[test]
    fn test_session_serializes_without_token() {
        let session = CallSession::new(5, CallDirection::Outgoing, None);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["state"], "pending");
        assert_eq!(json["direction"], "outgoing");
        assert!(json.get("cancel_token").is_none());
    }
}
