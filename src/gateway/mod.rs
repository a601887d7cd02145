//! Signaling Gateway
//!
//! The boundary to the messaging platform's call transport. Platform updates
//! are decoded once into [`GatewayEvent`]; call control goes out through the
//! [`SignalingGateway`] trait.

pub mod stdio;

pub use stdio::*;

use crate::calls::{CallDirection, CallId, DiscardReason, PeerId};
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use thiserror::Error;

/// Gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    #[error("Gateway closed")]
    Closed,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// A call lifecycle event from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// A call appeared
    Incoming {
        call_id: CallId,
        direction: CallDirection,
        peer_id: Option<PeerId>,
    },
    /// Key exchange started or progressed
    KeyExchange { call_id: CallId },
    /// Media is connected
    Ready { call_id: CallId },
    /// The call is gone
    Discarded {
        call_id: CallId,
        reason: DiscardReason,
    },
    /// Opaque signaling payload from the peer
    SignalingData { call_id: CallId, data: Bytes },
}

impl GatewayEvent {
    /// Call the event belongs to
    pub fn call_id(&self) -> CallId {
        match self {
            GatewayEvent::Incoming { call_id, .. }
            | GatewayEvent::KeyExchange { call_id }
            | GatewayEvent::Ready { call_id }
            | GatewayEvent::Discarded { call_id, .. }
            | GatewayEvent::SignalingData { call_id, .. } => *call_id,
        }
    }
}

/// Call-control surface of the platform transport
#[async_trait]
pub trait SignalingGateway: Send + Sync {
    /// Accept an incoming call. Success is confirmed later by a ready event.
    async fn accept(&self, call_id: CallId) -> Result<()>;

    /// End a call, reporting its connected duration
    async fn end(&self, call_id: CallId, duration_seconds: u64) -> Result<()>;

    /// Relay signaling data to the peer
    async fn send_signaling_data(&self, call_id: CallId, data: &[u8]) -> Result<()>;

    /// Play PCM audio to the caller, returning once playback is handed off
    async fn emit_audio(&self, call_id: CallId, pcm: Bytes) -> Result<()>;

    /// Wait up to `timeout` for the caller's next utterance worth of PCM.
    ///
    /// `Ok(None)` means nothing was heard.
    async fn capture_audio(&self, call_id: CallId, timeout: Duration) -> Result<Option<Bytes>>;

    /// Drop any per-call transport state after the call is gone
    fn release(&self, _call_id: CallId) {}
}
