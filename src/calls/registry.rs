//! Session Registry
//!
//! Single source of truth for tracked calls. Every operation runs under one
//! lock, so two events for the same call can never interleave.

use super::state::{next_state, CallEvent};
use super::{CallDirection, CallError, CallId, CallSession, CallState, PeerId, Result};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Result of an applied transition
#[derive(Debug, Clone)]
pub struct Transition {
    /// State before the event
    pub from: CallState,
    /// State after the event
    pub to: CallState,
    /// Snapshot of the session after the event (the evicted record for `Ended`)
    pub session: CallSession,
}

/// Outcome of a listen that produced no utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SilenceStrike {
    /// Strike count after this listen
    pub strikes: u32,
    /// The threshold was exceeded; the caller should be prompted
    pub prompt: bool,
}

/// Concurrent map of call ID to session
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<CallId, CallSession>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a call in the `Pending` state
    pub fn create(
        &self,
        call_id: CallId,
        direction: CallDirection,
        peer_id: Option<PeerId>,
    ) -> Result<CallSession> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&call_id) {
            return Err(CallError::AlreadyTracked(call_id));
        }
        let session = CallSession::new(call_id, direction, peer_id);
        sessions.insert(call_id, session.clone());
        Ok(session)
    }

    /// Get a snapshot of a call
    pub fn get(&self, call_id: CallId) -> Option<CallSession> {
        self.sessions.lock().get(&call_id).cloned()
    }

    /// Apply an event to a call
    ///
    /// Reaching `Ended` cancels the call's token and evicts it in the same
    /// critical section.
    pub fn transition(&self, call_id: CallId, event: CallEvent) -> Result<Transition> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&call_id)
            .ok_or(CallError::CallNotFound(call_id))?;

        let from = session.state;
        let to = next_state(call_id, from, event)?;

        if to == CallState::Ready && session.awaiting_accept() {
            return Err(CallError::NotAccepted(call_id));
        }

        session.state = to;
        match (to, event) {
            (CallState::Ready, _) => {
                session.connected_at = Some(Utc::now());
                session.connected_clock = Some(Instant::now());
            }
            (CallState::Ended, CallEvent::Discarded(reason)) => {
                session.ended_at = Some(Utc::now());
                session.discard_reason = Some(reason);
                session.cancel_token.cancel();
            }
            _ => {}
        }

        let snapshot = session.clone();
        if to == CallState::Ended {
            sessions.remove(&call_id);
        }

        Ok(Transition {
            from,
            to,
            session: snapshot,
        })
    }

    /// Stop tracking a call, cancelling its tasks
    pub fn remove(&self, call_id: CallId) -> Option<CallSession> {
        let removed = self.sessions.lock().remove(&call_id);
        if let Some(session) = &removed {
            session.cancel_token.cancel();
        }
        removed
    }

    /// Record that the accept command is being issued; fails if it already was
    pub fn mark_accepted(&self, call_id: CallId) -> Result<CallSession> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(&call_id)
            .ok_or(CallError::CallNotFound(call_id))?;
        if !session.state.is_connecting() {
            return Err(CallError::InvalidTransition {
                call_id,
                from: session.state,
                event: "accept",
            });
        }
        if session.accepted_at.is_some() {
            return Err(CallError::AlreadyAccepted(call_id));
        }
        session.accepted_at = Some(Utc::now());
        Ok(session.clone())
    }

    /// Count a listen that produced no utterance
    ///
    /// When the count exceeds `threshold` it resets to zero and the strike
    /// asks for a prompt.
    pub fn record_silence(&self, call_id: CallId, threshold: u32) -> Option<SilenceStrike> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&call_id)?;
        session.silence_strikes += 1;
        let prompt = session.silence_strikes > threshold;
        if prompt {
            session.silence_strikes = 0;
        }
        Some(SilenceStrike {
            strikes: session.silence_strikes,
            prompt,
        })
    }

    /// Reset the silence counter after a recognised utterance
    pub fn record_utterance(&self, call_id: CallId) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get_mut(&call_id) {
            Some(session) => {
                session.silence_strikes = 0;
                true
            }
            None => false,
        }
    }

    /// Count a completed listen/speak cycle, returning the new total
    pub fn complete_turn(&self, call_id: CallId) -> Option<u32> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(&call_id)?;
        session.turn_count += 1;
        Some(session.turn_count)
    }

    /// Time since the call became ready
    pub fn connected_elapsed(&self, call_id: CallId) -> Option<Duration> {
        self.sessions
            .lock()
            .get(&call_id)
            .and_then(CallSession::connected_elapsed)
    }

    /// Snapshot of every tracked call
    pub fn list(&self) -> Vec<CallSession> {
        self.sessions.lock().values().cloned().collect()
    }

    /// Number of tracked calls
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no calls are tracked
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
