//! Call State Machine
//!
//! Applies gateway events and internal events to sessions through the
//! registry, and owns every per-call task: the auto-accept timer, the ready
//! and end watchdogs, and the conversation loop.

use super::{
    CallDirection, CallError, CallEvent, CallId, CallState, DiscardReason, PeerId, Result,
    SessionRegistry,
};
use crate::config::{CallConfig, ConversationConfig};
use crate::conversation::{Capabilities, ConversationLoop, LoopOutcome};
use crate::gateway::GatewayEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Drives call sessions from gateway events
#[derive(Clone)]
pub struct CallStateMachine {
    registry: SessionRegistry,
    caps: Capabilities,
    calls: CallConfig,
    conversation: Arc<ConversationConfig>,
    tasks: TaskTracker,
}

impl CallStateMachine {
    pub fn new(
        registry: SessionRegistry,
        caps: Capabilities,
        calls: CallConfig,
        conversation: ConversationConfig,
    ) -> Self {
        Self {
            registry,
            caps,
            calls,
            conversation: Arc::new(conversation),
            tasks: TaskTracker::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Consume events until the channel closes or `shutdown` fires, then end
    /// every tracked call and wait for its tasks
    pub async fn run(
        &self,
        mut events: mpsc::Receiver<GatewayEvent>,
        shutdown: CancellationToken,
    ) {
        info!(auto_answer = self.calls.auto_answer, "call state machine started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("gateway event stream closed");
                        break;
                    }
                },
            }
        }
        self.shutdown().await;
    }

    /// Apply one gateway event
    ///
    /// Never blocks: call-control commands and conversations run on tracked
    /// tasks.
    pub fn handle_event(&self, event: GatewayEvent) {
        match event {
            GatewayEvent::Incoming {
                call_id,
                direction,
                peer_id,
            } => self.on_incoming(call_id, direction, peer_id),
            GatewayEvent::KeyExchange { call_id } => {
                if let Some(t) = self.apply(call_id, CallEvent::KeyExchange) {
                    debug!(call_id, from = ?t.from, "key exchange");
                }
            }
            GatewayEvent::Ready { call_id } => self.on_ready(call_id),
            GatewayEvent::Discarded { call_id, reason } => self.on_discarded(call_id, reason),
            GatewayEvent::SignalingData { call_id, data } => {
                if self.registry.get(call_id).is_some() {
                    debug!(call_id, bytes = data.len(), "signaling data received");
                } else {
                    debug!(call_id, "signaling data for unknown call ignored");
                }
            }
        }
    }

    fn on_incoming(&self, call_id: CallId, direction: CallDirection, peer_id: Option<PeerId>) {
        let session = match self.registry.create(call_id, direction, peer_id) {
            Ok(session) => session,
            Err(e) => {
                debug!(call_id, error = %e, "duplicate incoming event ignored");
                return;
            }
        };
        info!(call_id, ?direction, ?peer_id, "call pending");

        if direction != CallDirection::Incoming || !self.calls.auto_answer {
            return;
        }

        let machine = self.clone();
        let token = session.cancel_token;
        let delay = self.calls.answer_delay();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = machine.accept(call_id).await {
                        warn!(call_id, error = %e, "auto-accept failed");
                    }
                }
            }
        });
    }

    fn on_ready(&self, call_id: CallId) {
        let Some(t) = self.apply(call_id, CallEvent::Ready) else {
            return;
        };
        info!(call_id, from = ?t.from, "call ready");

        let conversation = ConversationLoop::new(
            call_id,
            t.session.peer_id,
            self.registry.clone(),
            self.caps.clone(),
            self.conversation.as_ref().clone(),
            self.calls.max_call_duration(),
            t.session.cancel_token.clone(),
        );
        let machine = self.clone();
        self.tasks.spawn(async move {
            let outcome = conversation.run().await;
            machine.finish_conversation(call_id, outcome).await;
        });
    }

    fn on_discarded(&self, call_id: CallId, reason: DiscardReason) {
        if let Some(t) = self.apply(call_id, CallEvent::Discarded(reason)) {
            info!(
                call_id,
                from = ?t.from,
                ?reason,
                turns = t.session.turn_count,
                "call ended"
            );
            self.caps.gateway.release(call_id);
        }
    }

    /// Transition through the registry, logging rejected events
    fn apply(&self, call_id: CallId, event: CallEvent) -> Option<super::Transition> {
        match self.registry.transition(call_id, event) {
            Ok(t) => Some(t),
            Err(CallError::CallNotFound(_)) => {
                debug!(call_id, event = event.name(), "event for unknown call ignored");
                None
            }
            Err(CallError::NotAccepted(_)) => {
                warn!(call_id, "ready event for a call that was never accepted, ignored");
                None
            }
            Err(e) => {
                warn!(call_id, error = %e, "event rejected");
                None
            }
        }
    }

    /// Accept a pending incoming call
    ///
    /// Fire-and-forget: the ready event confirms success. If it does not
    /// arrive within the ready grace period the call is ended as `Timeout`.
    pub async fn accept(&self, call_id: CallId) -> Result<()> {
        let session = self.registry.mark_accepted(call_id)?;
        info!(call_id, "accepting call");
        self.spawn_ready_watchdog(call_id, session.cancel_token);

        self.caps
            .gateway
            .accept(call_id)
            .await
            .map_err(|e| CallError::Command(e.to_string()))
    }

    fn spawn_ready_watchdog(&self, call_id: CallId, token: CancellationToken) {
        let machine = self.clone();
        let grace = self.calls.ready_timeout();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => machine.on_ready_timeout(call_id).await,
            }
        });
    }

    async fn on_ready_timeout(&self, call_id: CallId) {
        let still_connecting = self
            .registry
            .get(call_id)
            .is_some_and(|s| s.state.is_connecting());
        if !still_connecting {
            return;
        }
        if self.apply(call_id, CallEvent::ReadyTimeout).is_none() {
            return;
        }
        warn!(call_id, "no ready event after accept, ending call");
        if let Err(e) = self.caps.gateway.end(call_id, 0).await {
            warn!(call_id, error = %e, "end command failed");
        }
        self.on_discarded(call_id, DiscardReason::Timeout);
    }

    async fn finish_conversation(&self, call_id: CallId, outcome: LoopOutcome) {
        let event = match outcome {
            LoopOutcome::Farewell => CallEvent::HangUp,
            LoopOutcome::MaxDuration { .. } => CallEvent::MaxDurationExceeded,
            LoopOutcome::Cancelled | LoopOutcome::SessionGone => return,
        };
        self.end_call(call_id, event).await;
    }

    /// Move a ready call to `Ending` and send the end command
    async fn end_call(&self, call_id: CallId, event: CallEvent) {
        let elapsed = self
            .registry
            .connected_elapsed(call_id)
            .unwrap_or_default();
        let Some(t) = self.apply(call_id, event) else {
            return;
        };
        info!(
            call_id,
            reason = event.name(),
            elapsed_secs = elapsed.as_secs(),
            "ending call"
        );

        if let Err(e) = self.caps.gateway.end(call_id, elapsed.as_secs()).await {
            error!(call_id, error = %e, "end command failed");
        }
        self.spawn_end_watchdog(call_id, t.session.cancel_token);
    }

    /// Evict an `Ending` call the gateway never confirms
    fn spawn_end_watchdog(&self, call_id: CallId, token: CancellationToken) {
        let machine = self.clone();
        let grace = self.calls.ready_timeout();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    let unconfirmed = machine
                        .registry
                        .get(call_id)
                        .is_some_and(|s| s.state == CallState::Ending);
                    if unconfirmed {
                        warn!(call_id, "end never confirmed, evicting call");
                        machine.on_discarded(call_id, DiscardReason::Timeout);
                    }
                }
            }
        });
    }

    /// End every tracked call and wait for all call tasks to finish
    pub async fn shutdown(&self) {
        let sessions = self.registry.list();
        if !sessions.is_empty() {
            info!(calls = sessions.len(), "shutting down, ending tracked calls");
        }
        for session in sessions {
            let call_id = session.call_id;
            if session.state != CallState::Ending {
                let elapsed = session.connected_elapsed().unwrap_or(Duration::ZERO);
                if let Err(e) = self.caps.gateway.end(call_id, elapsed.as_secs()).await {
                    warn!(call_id, error = %e, "end command failed during shutdown");
                }
            }
            self.registry.remove(call_id);
            self.caps.gateway.release(call_id);
        }

        self.tasks.close();
        self.tasks.wait().await;
        info!("call state machine stopped");
    }

    /// Number of call tasks still running
    pub fn active_tasks(&self) -> usize {
        self.tasks.len()
    }
}
