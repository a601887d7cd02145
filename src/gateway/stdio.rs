//! JSON-lines Gateway Bridge
//!
//! Talks to a companion process that owns the platform client and the call
//! media. Updates arrive one JSON object per line, tagged by `@type`; call
//! control goes back out the same way. Captured caller audio arrives as
//! `updateCallAudio` lines and is queued per call until the conversation
//! loop pulls it.

use super::{GatewayError, GatewayEvent, Result, SignalingGateway};
use crate::calls::{CallDirection, CallId, DiscardReason, PeerId};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Oldest chunks are dropped past this many queued per call
const MAX_QUEUED_CHUNKS: usize = 32;

#[derive(Debug, Deserialize)]
#[serde(tag = "@type")]
enum Update {
    #[serde(rename = "updateCall")]
    Call { call: WireCall },
    #[serde(rename = "updateNewCallSignalingData")]
    SignalingData { call_id: CallId, data: String },
    #[serde(rename = "updateCallAudio")]
    Audio { call_id: CallId, data: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct WireCall {
    id: CallId,
    #[serde(default)]
    user_id: Option<PeerId>,
    #[serde(default)]
    is_outgoing: bool,
    state: WireCallState,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "@type")]
enum WireCallState {
    #[serde(rename = "callStatePending")]
    Pending,
    #[serde(rename = "callStateExchangingKeys")]
    ExchangingKeys,
    #[serde(rename = "callStateReady")]
    Ready,
    #[serde(rename = "callStateHangingUp")]
    HangingUp,
    #[serde(rename = "callStateDiscarded")]
    Discarded {
        #[serde(default)]
        reason: Option<WireDiscardReason>,
    },
    #[serde(rename = "callStateError")]
    Error,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "@type")]
enum WireDiscardReason {
    #[serde(rename = "callDiscardReasonEmpty")]
    Empty,
    #[serde(rename = "callDiscardReasonMissed")]
    Missed,
    #[serde(rename = "callDiscardReasonDeclined")]
    Declined,
    #[serde(rename = "callDiscardReasonDisconnected")]
    Disconnected,
    #[serde(rename = "callDiscardReasonHungUp")]
    HungUp,
    #[serde(other)]
    Unknown,
}

impl From<Option<WireDiscardReason>> for DiscardReason {
    fn from(reason: Option<WireDiscardReason>) -> Self {
        match reason {
            Some(WireDiscardReason::Missed) => DiscardReason::Missed,
            Some(WireDiscardReason::Declined) => DiscardReason::Declined,
            Some(WireDiscardReason::Disconnected) => DiscardReason::Disconnected,
            Some(WireDiscardReason::HungUp) => DiscardReason::HungUp,
            Some(WireDiscardReason::Empty | WireDiscardReason::Unknown) | None => {
                DiscardReason::Empty
            }
        }
    }
}

/// A decoded inbound line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Call lifecycle or signaling event for the state machine
    Event(GatewayEvent),
    /// Captured caller audio
    Audio { call_id: CallId, pcm: Bytes },
}

fn decode_base64(data: &str) -> Result<Bytes> {
    BASE64
        .decode(data)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Decode(format!("invalid base64: {e}")))
}

/// Decode one line. `Ok(None)` means the update is not relevant to calls.
pub fn decode_update(line: &str) -> Result<Option<Inbound>> {
    let update: Update = serde_json::from_str(line)?;
    let inbound = match update {
        Update::Call { call } => {
            let call_id = call.id;
            let event = match call.state {
                WireCallState::Pending => GatewayEvent::Incoming {
                    call_id,
                    direction: if call.is_outgoing {
                        CallDirection::Outgoing
                    } else {
                        CallDirection::Incoming
                    },
                    peer_id: call.user_id,
                },
                WireCallState::ExchangingKeys => GatewayEvent::KeyExchange { call_id },
                WireCallState::Ready => GatewayEvent::Ready { call_id },
                WireCallState::Discarded { reason } => GatewayEvent::Discarded {
                    call_id,
                    reason: reason.into(),
                },
                WireCallState::Error => GatewayEvent::Discarded {
                    call_id,
                    reason: DiscardReason::Error,
                },
                WireCallState::HangingUp | WireCallState::Unknown => return Ok(None),
            };
            Inbound::Event(event)
        }
        Update::SignalingData { call_id, data } => Inbound::Event(GatewayEvent::SignalingData {
            call_id,
            data: decode_base64(&data)?,
        }),
        Update::Audio { call_id, data } => Inbound::Audio {
            call_id,
            pcm: decode_base64(&data)?,
        },
        Update::Other => return Ok(None),
    };
    Ok(Some(inbound))
}

/// Transport settings sent with `acceptCall`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "@type", rename = "callProtocol")]
pub struct CallProtocol {
    pub udp_p2p: bool,
    pub udp_reflector: bool,
    pub min_layer: i32,
    pub max_layer: i32,
    pub library_versions: Vec<String>,
}

impl Default for CallProtocol {
    fn default() -> Self {
        Self {
            udp_p2p: true,
            udp_reflector: true,
            min_layer: 65,
            max_layer: 92,
            library_versions: vec!["4.0.0".to_string()],
        }
    }
}

/// Outbound call-control command
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "@type")]
pub enum GatewayCommand {
    #[serde(rename = "acceptCall")]
    AcceptCall {
        call_id: CallId,
        protocol: CallProtocol,
    },
    #[serde(rename = "discardCall")]
    DiscardCall {
        call_id: CallId,
        is_disconnected: bool,
        duration: u64,
        is_video: bool,
        connection_id: i64,
    },
    #[serde(rename = "sendCallSignalingData")]
    SendCallSignalingData { call_id: CallId, data: String },
    #[serde(rename = "playCallAudio")]
    PlayCallAudio { call_id: CallId, data: String },
}

impl GatewayCommand {
    pub fn accept(call_id: CallId) -> Self {
        GatewayCommand::AcceptCall {
            call_id,
            protocol: CallProtocol::default(),
        }
    }

    pub fn discard(call_id: CallId, duration: u64) -> Self {
        GatewayCommand::DiscardCall {
            call_id,
            is_disconnected: false,
            duration,
            is_video: false,
            connection_id: 0,
        }
    }

    pub fn signaling_data(call_id: CallId, data: &[u8]) -> Self {
        GatewayCommand::SendCallSignalingData {
            call_id,
            data: BASE64.encode(data),
        }
    }

    pub fn play_audio(call_id: CallId, pcm: &[u8]) -> Self {
        GatewayCommand::PlayCallAudio {
            call_id,
            data: BASE64.encode(pcm),
        }
    }

    /// Newline-terminated JSON
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}

#[derive(Default)]
struct AudioQueue {
    chunks: Mutex<VecDeque<Bytes>>,
    ready: Notify,
}

impl AudioQueue {
    fn push(&self, pcm: Bytes) {
        {
            let mut chunks = self.chunks.lock();
            if chunks.len() >= MAX_QUEUED_CHUNKS {
                chunks.pop_front();
            }
            chunks.push_back(pcm);
        }
        self.ready.notify_one();
    }

    async fn pop(&self, timeout: Duration) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(chunk) = self.chunks.lock().pop_front() {
                return Some(chunk);
            }
            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }
}

/// Gateway speaking JSON lines over a byte stream
pub struct StdioGateway<W> {
    writer: tokio::sync::Mutex<W>,
    audio: Mutex<HashMap<CallId, Arc<AudioQueue>>>,
}

impl StdioGateway<tokio::io::Stdout> {
    /// Gateway writing commands to this process's stdout
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> StdioGateway<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            audio: Mutex::new(HashMap::new()),
        }
    }

    async fn send(&self, command: GatewayCommand) -> Result<()> {
        let line = command.to_line()?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Open the audio queue for a call announced by the platform
    fn track(&self, call_id: CallId) -> Arc<AudioQueue> {
        self.audio.lock().entry(call_id).or_default().clone()
    }

    fn queue(&self, call_id: CallId) -> Option<Arc<AudioQueue>> {
        self.audio.lock().get(&call_id).cloned()
    }

    /// Number of calls holding an audio queue
    pub fn tracked_calls(&self) -> usize {
        self.audio.lock().len()
    }

    /// Read updates until EOF, forwarding call events to `events` and queueing
    /// captured audio
    ///
    /// A call gets an audio queue when its incoming update is seen. Audio for
    /// any other call id is dropped. Malformed lines are logged and skipped.
    pub async fn pump<R>(&self, reader: R, events: mpsc::Sender<GatewayEvent>) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match decode_update(&line) {
                Ok(Some(Inbound::Event(event))) => {
                    if let GatewayEvent::Incoming { call_id, .. } = event {
                        self.track(call_id);
                    }
                    if events.send(event).await.is_err() {
                        return Err(GatewayError::Closed);
                    }
                }
                Ok(Some(Inbound::Audio { call_id, pcm })) => match self.queue(call_id) {
                    Some(queue) => {
                        debug!(call_id, bytes = pcm.len(), "caller audio queued");
                        queue.push(pcm);
                    }
                    None => debug!(call_id, bytes = pcm.len(), "audio for untracked call dropped"),
                },
                Ok(None) => {}
                Err(e) => warn!(error = %e, "skipping malformed gateway line"),
            }
        }
        debug!("gateway input closed");
        Ok(())
    }
}

#[async_trait]
impl<W> SignalingGateway for StdioGateway<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn accept(&self, call_id: CallId) -> Result<()> {
        self.send(GatewayCommand::accept(call_id)).await
    }

    async fn end(&self, call_id: CallId, duration_seconds: u64) -> Result<()> {
        self.send(GatewayCommand::discard(call_id, duration_seconds))
            .await
    }

    async fn send_signaling_data(&self, call_id: CallId, data: &[u8]) -> Result<()> {
        self.send(GatewayCommand::signaling_data(call_id, data))
            .await
    }

    async fn emit_audio(&self, call_id: CallId, pcm: Bytes) -> Result<()> {
        self.send(GatewayCommand::play_audio(call_id, &pcm)).await
    }

    async fn capture_audio(&self, call_id: CallId, timeout: Duration) -> Result<Option<Bytes>> {
        match self.queue(call_id) {
            Some(queue) => Ok(queue.pop(timeout).await),
            None => {
                // Released or never announced: nothing will ever arrive.
                tokio::time::sleep(timeout).await;
                Ok(None)
            }
        }
    }

    fn release(&self, call_id: CallId) {
        self.audio.lock().remove(&call_id);
    }
}
