//! Conversation Loop
//!
//! One task per ready call. Each turn captures the caller, transcribes,
//! generates a reply and speaks it. Every blocking step races the call's
//! cancellation token and a hard timeout, and a turn's history and facts are
//! committed only once its audio has been handed off (or skipped).

use super::context::{ConversationContext, HistoryEntry};
use super::extract::{extract_facts, is_farewell, sanitize_utterance};
use super::transcript::{Transcript, TranscriptSink};
use crate::ai::ResponseCapability;
use crate::calls::{CallId, PeerId, SessionRegistry};
use crate::config::ConversationConfig;
use crate::gateway::SignalingGateway;
use crate::speech::{is_silence, SpeechCapability};
use chrono::Utc;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause after a failed capture or transcription before listening again
const ERROR_BACKOFF: Duration = Duration::from_millis(500);

/// External collaborators a conversation talks to
#[derive(Clone)]
pub struct Capabilities {
    pub gateway: Arc<dyn SignalingGateway>,
    pub speech: Arc<dyn SpeechCapability>,
    pub responder: Arc<dyn ResponseCapability>,
    pub transcripts: Option<Arc<dyn TranscriptSink>>,
}

/// Why a conversation loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The call's token was cancelled (call discarded or shutdown)
    Cancelled,
    /// The caller said goodbye and the farewell was spoken
    Farewell,
    /// The connected duration reached the configured maximum
    MaxDuration { elapsed: Duration },
    /// The session disappeared from the registry
    SessionGone,
}

impl LoopOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopOutcome::Cancelled => "cancelled",
            LoopOutcome::Farewell => "farewell",
            LoopOutcome::MaxDuration { .. } => "max_duration",
            LoopOutcome::SessionGone => "session_gone",
        }
    }
}

#[derive(Debug)]
struct Cancelled;

#[derive(Debug, Error)]
enum StepError {
    #[error("cancelled")]
    Cancelled,
    #[error("timed out")]
    TimedOut,
    #[error("{0}")]
    Failed(String),
}

#[derive(Debug)]
enum Heard {
    Utterance(String),
    Silence,
    Failed,
}

/// Conversation task for one call
pub struct ConversationLoop {
    call_id: CallId,
    peer_id: Option<PeerId>,
    registry: SessionRegistry,
    caps: Capabilities,
    config: ConversationConfig,
    max_duration: Duration,
    cancel: CancellationToken,
}

impl ConversationLoop {
    pub fn new(
        call_id: CallId,
        peer_id: Option<PeerId>,
        registry: SessionRegistry,
        caps: Capabilities,
        config: ConversationConfig,
        max_duration: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            call_id,
            peer_id,
            registry,
            caps,
            config,
            max_duration,
            cancel,
        }
    }

    /// Run until farewell, maximum duration, or cancellation, then flush the
    /// transcript
    pub async fn run(self) -> LoopOutcome {
        let started_at = Utc::now();
        let mut context = ConversationContext::new(self.config.history_window);
        let mut entries = Vec::new();
        let mut turns = 0u32;

        info!(call_id = self.call_id, "conversation started");
        let outcome = self.converse(&mut context, &mut entries, &mut turns).await;
        info!(
            call_id = self.call_id,
            turns,
            outcome = outcome.as_str(),
            "conversation ended"
        );

        if let Some(sink) = &self.caps.transcripts {
            let transcript = Transcript {
                call_id: self.call_id,
                peer_id: self.peer_id,
                started_at,
                ended_at: Utc::now(),
                turn_count: turns,
                outcome: outcome.as_str().to_string(),
                entries,
                facts: context.facts().clone(),
            };
            if let Err(e) = sink.flush(&transcript).await {
                warn!(call_id = self.call_id, error = %e, "failed to save transcript");
            }
        }

        outcome
    }

    async fn converse(
        &self,
        context: &mut ConversationContext,
        entries: &mut Vec<HistoryEntry>,
        turns: &mut u32,
    ) -> LoopOutcome {
        let mut greet = true;

        loop {
            if self.cancel.is_cancelled() {
                return LoopOutcome::Cancelled;
            }

            if greet {
                greet = false;
                if self.speak(&self.config.greeting).await.is_err() {
                    return LoopOutcome::Cancelled;
                }
            }

            let heard = match self.listen().await {
                Ok(heard) => heard,
                Err(Cancelled) => return LoopOutcome::Cancelled,
            };

            match heard {
                Heard::Silence => {
                    let Some(strike) = self
                        .registry
                        .record_silence(self.call_id, self.config.silence_strike_threshold)
                    else {
                        return LoopOutcome::SessionGone;
                    };
                    debug!(call_id = self.call_id, strikes = strike.strikes, "no speech");
                    if strike.prompt {
                        info!(call_id = self.call_id, "prompting silent caller");
                        if self.speak(&self.config.still_there_prompt).await.is_err() {
                            return LoopOutcome::Cancelled;
                        }
                        greet = self.config.regreet_after_prompt;
                    }
                }
                Heard::Failed => {
                    if self.pause(ERROR_BACKOFF).await.is_err() {
                        return LoopOutcome::Cancelled;
                    }
                }
                Heard::Utterance(text) => {
                    if !self.registry.record_utterance(self.call_id) {
                        return LoopOutcome::SessionGone;
                    }
                    match self.take_turn(&text, context, entries).await {
                        Err(Cancelled) => return LoopOutcome::Cancelled,
                        Ok(farewell) => {
                            let Some(turn) = self.registry.complete_turn(self.call_id) else {
                                return LoopOutcome::SessionGone;
                            };
                            *turns = turn;
                            debug!(call_id = self.call_id, turn, "turn complete");
                            if farewell {
                                return LoopOutcome::Farewell;
                            }
                        }
                    }
                }
            }

            match self.registry.connected_elapsed(self.call_id) {
                None => return LoopOutcome::SessionGone,
                Some(elapsed) if elapsed >= self.max_duration => {
                    info!(
                        call_id = self.call_id,
                        elapsed_secs = elapsed.as_secs(),
                        "maximum call duration reached"
                    );
                    return LoopOutcome::MaxDuration { elapsed };
                }
                Some(_) => {}
            }
        }
    }

    /// Respond to one utterance. Returns whether the caller said goodbye.
    async fn take_turn(
        &self,
        text: &str,
        context: &mut ConversationContext,
        entries: &mut Vec<HistoryEntry>,
    ) -> Result<bool, Cancelled> {
        let user_entry = HistoryEntry::user(text);
        let facts = extract_facts(text);

        let farewell = is_farewell(text);
        let reply = if farewell {
            info!(call_id = self.call_id, "caller said goodbye");
            self.config.farewell.clone()
        } else {
            let mut staged = context.clone();
            staged.apply(&facts);
            let generated = self.step(
                "generate",
                self.config.generate_timeout(),
                self.caps.responder.generate(text, &staged),
            );
            match generated.await {
                Ok(reply) if !reply.trim().is_empty() => reply.trim().to_string(),
                Ok(_) => self.config.apology.clone(),
                Err(StepError::Cancelled) => return Err(Cancelled),
                Err(e) => {
                    warn!(call_id = self.call_id, error = %e, "reply generation failed");
                    self.config.apology.clone()
                }
            }
        };

        self.speak(&reply).await?;

        let assistant_entry = HistoryEntry::assistant(reply);
        context.apply(&facts);
        context.push(user_entry.clone());
        context.push(assistant_entry.clone());
        entries.push(user_entry);
        entries.push(assistant_entry);
        Ok(farewell)
    }

    async fn listen(&self) -> Result<Heard, Cancelled> {
        let timeout = self.config.capture_timeout();
        let captured = self.step(
            "capture",
            timeout,
            self.caps.gateway.capture_audio(self.call_id, timeout),
        );
        let pcm = match captured.await {
            Ok(Some(pcm)) if !pcm.is_empty() => pcm,
            Ok(_) | Err(StepError::TimedOut) => return Ok(Heard::Silence),
            Err(StepError::Cancelled) => return Err(Cancelled),
            Err(e) => {
                warn!(call_id = self.call_id, error = %e, "audio capture failed");
                return Ok(Heard::Failed);
            }
        };
        if is_silence(&pcm, self.config.silence_rms_threshold) {
            debug!(call_id = self.call_id, bytes = pcm.len(), "captured audio below energy gate");
            return Ok(Heard::Silence);
        }

        let transcribed = self.step(
            "transcribe",
            self.config.transcribe_timeout(),
            self.caps.speech.transcribe(&pcm),
        );
        match transcribed.await {
            Ok(Some(raw)) => {
                let text = sanitize_utterance(&raw, self.config.max_utterance_chars);
                if text.is_empty() {
                    Ok(Heard::Silence)
                } else {
                    debug!(call_id = self.call_id, chars = text.len(), "heard caller");
                    Ok(Heard::Utterance(text))
                }
            }
            Ok(None) => Ok(Heard::Silence),
            Err(StepError::Cancelled) => Err(Cancelled),
            Err(e) => {
                warn!(call_id = self.call_id, error = %e, "transcription failed");
                Ok(Heard::Failed)
            }
        }
    }

    /// Synthesize and play `text`. Failures skip playback; only cancellation
    /// is reported.
    async fn speak(&self, text: &str) -> Result<(), Cancelled> {
        let synthesized = self.step(
            "synthesize",
            self.config.synthesize_timeout(),
            self.caps.speech.synthesize(text),
        );
        let pcm = match synthesized.await {
            Ok(pcm) => pcm,
            Err(StepError::Cancelled) => return Err(Cancelled),
            Err(e) => {
                warn!(call_id = self.call_id, error = %e, "synthesis failed, skipping playback");
                return Ok(());
            }
        };

        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let played = self.step(
            "playback",
            self.config.playback_timeout(),
            self.caps.gateway.emit_audio(self.call_id, pcm),
        );
        match played.await {
            Ok(()) => Ok(()),
            Err(StepError::Cancelled) => Err(Cancelled),
            Err(e) => {
                warn!(call_id = self.call_id, error = %e, "playback failed");
                Ok(())
            }
        }
    }

    async fn pause(&self, duration: Duration) -> Result<(), Cancelled> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(Cancelled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Race `fut` against cancellation and a hard deadline
    async fn step<T, E, F>(
        &self,
        name: &'static str,
        limit: Duration,
        fut: F,
    ) -> Result<T, StepError>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(StepError::Cancelled),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(StepError::Failed(format!("{name}: {e}"))),
                Err(_) => {
                    debug!(call_id = self.call_id, step = name, "step timed out");
                    Err(StepError::TimedOut)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::{AiError, FallbackResponder};
    use crate::calls::{CallDirection, CallEvent};
    use crate::conversation::{TranscriptError, USER_NAME};
    use crate::gateway::{GatewayError, Result as GatewayResult};
    use crate::speech::{Result as SpeechResult, SpeechError};
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    enum Capture {
        Audio(Bytes),
        Nothing,
        Fail,
    }

    /// Plays back a script of captures; audio bytes are the utterance text
    #[derive(Default)]
    struct ScriptedGateway {
        captures: Mutex<VecDeque<Capture>>,
        emitted: Mutex<Vec<String>>,
    }

    impl ScriptedGateway {
        fn new(script: &[Option<&'static str>]) -> Arc<Self> {
            Self::with_captures(
                script
                    .iter()
                    .map(|line| match line {
                        Some(text) => Capture::Audio(Bytes::from_static(text.as_bytes())),
                        None => Capture::Nothing,
                    })
                    .collect(),
            )
        }

        fn with_captures(captures: Vec<Capture>) -> Arc<Self> {
            Arc::new(Self {
                captures: Mutex::new(captures.into()),
                emitted: Mutex::new(Vec::new()),
            })
        }

        fn emitted(&self) -> Vec<String> {
            self.emitted.lock().clone()
        }
    }

    #[async_trait]
    impl SignalingGateway for ScriptedGateway {
        async fn accept(&self, _call_id: CallId) -> GatewayResult<()> {
            Ok(())
        }

        async fn end(&self, _call_id: CallId, _duration_seconds: u64) -> GatewayResult<()> {
            Ok(())
        }

        async fn send_signaling_data(&self, _call_id: CallId, _data: &[u8]) -> GatewayResult<()> {
            Ok(())
        }

        async fn emit_audio(&self, _call_id: CallId, pcm: Bytes) -> GatewayResult<()> {
            self.emitted
                .lock()
                .push(String::from_utf8_lossy(&pcm).into_owned());
            Ok(())
        }

        async fn capture_audio(
            &self,
            _call_id: CallId,
            timeout: Duration,
        ) -> GatewayResult<Option<Bytes>> {
            let next = self.captures.lock().pop_front();
            match next {
                Some(Capture::Audio(pcm)) => Ok(Some(pcm)),
                Some(Capture::Nothing) => Ok(None),
                Some(Capture::Fail) => Err(GatewayError::CaptureFailed("device lost".into())),
                None => {
                    tokio::time::sleep(timeout).await;
                    Ok(None)
                }
            }
        }
    }

    /// Text in, text out. Selected inputs can be made to never finish.
    #[derive(Default)]
    struct EchoSpeech {
        fail_synthesis: bool,
        stall_transcribe_on: Option<&'static str>,
        stall_synthesis_on: Option<&'static str>,
        transcribed: AtomicUsize,
    }

    #[async_trait]
    impl SpeechCapability for EchoSpeech {
        async fn transcribe(&self, pcm: &[u8]) -> SpeechResult<Option<String>> {
            self.transcribed.fetch_add(1, Ordering::SeqCst);
            let text = String::from_utf8_lossy(pcm).into_owned();
            if self.stall_transcribe_on == Some(text.as_str()) {
                std::future::pending::<()>().await;
            }
            Ok(Some(text))
        }

        async fn synthesize(&self, text: &str) -> SpeechResult<Bytes> {
            if self.fail_synthesis {
                return Err(SpeechError::ProviderError("tts down".to_string()));
            }
            if self.stall_synthesis_on == Some(text) {
                std::future::pending::<()>().await;
            }
            Ok(Bytes::from(text.to_string()))
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    struct BrokenResponder;

    #[async_trait]
    impl ResponseCapability for BrokenResponder {
        async fn generate(
            &self,
            _utterance: &str,
            _context: &ConversationContext,
        ) -> crate::ai::Result<String> {
            Err(AiError::ApiError("500".to_string()))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    /// Never answers
    struct StalledResponder;

    #[async_trait]
    impl ResponseCapability for StalledResponder {
        async fn generate(
            &self,
            _utterance: &str,
            _context: &ConversationContext,
        ) -> crate::ai::Result<String> {
            std::future::pending().await
        }

        fn name(&self) -> &str {
            "stalled"
        }
    }

    #[derive(Default)]
    struct MemorySink {
        saved: Mutex<Vec<Transcript>>,
    }

    #[async_trait]
    impl TranscriptSink for MemorySink {
        async fn flush(&self, transcript: &Transcript) -> Result<(), TranscriptError> {
            self.saved.lock().push(transcript.clone());
            Ok(())
        }
    }

    struct Harness {
        registry: SessionRegistry,
        gateway: Arc<ScriptedGateway>,
        speech: Arc<EchoSpeech>,
        sink: Arc<MemorySink>,
        cancel: CancellationToken,
        conversation: ConversationLoop,
    }

    fn harness(
        script: &[Option<&'static str>],
        responder: Arc<dyn ResponseCapability>,
        fail_synthesis: bool,
        max_duration: Duration,
    ) -> Harness {
        let speech = EchoSpeech {
            fail_synthesis,
            ..EchoSpeech::default()
        };
        build(ScriptedGateway::new(script), speech, responder, max_duration)
    }

    fn build(
        gateway: Arc<ScriptedGateway>,
        speech: EchoSpeech,
        responder: Arc<dyn ResponseCapability>,
        max_duration: Duration,
    ) -> Harness {
        let registry = SessionRegistry::new();
        let session = registry.create(7, CallDirection::Outgoing, Some(70)).unwrap();
        registry.transition(7, CallEvent::Ready).unwrap();

        let speech = Arc::new(speech);
        let sink = Arc::new(MemorySink::default());
        let caps = Capabilities {
            gateway: gateway.clone(),
            speech: speech.clone(),
            responder,
            transcripts: Some(sink.clone()),
        };
        let config = ConversationConfig {
            greeting: "greeting".to_string(),
            farewell: "farewell".to_string(),
            apology: "apology".to_string(),
            ..ConversationConfig::default()
        };
        let conversation = ConversationLoop::new(
            7,
            Some(70),
            registry.clone(),
            caps,
            config,
            max_duration,
            session.cancel_token.clone(),
        );
        Harness {
            registry,
            gateway,
            speech,
            sink,
            cancel: session.cancel_token,
            conversation,
        }
    }

    const LONG: Duration = Duration::from_secs(3600);

    fn pcm(samples: &[i16]) -> Bytes {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_introduction_then_goodbye() {
        let h = harness(
            &[Some("My name is Sam"), Some("bye")],
            Arc::new(FallbackResponder::new()),
            false,
            LONG,
        );

        let outcome = h.conversation.run().await;
        assert_eq!(outcome, LoopOutcome::Farewell);
        assert_eq!(
            h.gateway.emitted(),
            vec![
                "greeting",
                "Nice to meet you, Sam! How can I help you today?",
                "farewell"
            ]
        );
        assert_eq!(h.registry.get(7).unwrap().turn_count, 2);

        let saved = h.sink.saved.lock();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].facts[USER_NAME], "sam");
        assert_eq!(saved[0].entries.len(), 4);
        assert_eq!(saved[0].outcome, "farewell");
        assert_eq!(saved[0].turn_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_prompts_once_after_threshold() {
        let h = harness(
            &[None, None, None, None, Some("goodbye")],
            Arc::new(FallbackResponder::new()),
            false,
            LONG,
        );

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert_eq!(
            h.gateway.emitted(),
            vec!["greeting", "Are you still there?", "farewell"]
        );
        assert_eq!(h.registry.get(7).unwrap().silence_strikes, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quiet_audio_counts_as_silence_without_transcribing() {
        let quiet = pcm(&[40, -35, 50, -60].repeat(80));
        let mut captures: Vec<Capture> = (0..4).map(|_| Capture::Audio(quiet.clone())).collect();
        captures.push(Capture::Audio(Bytes::from_static(b"bye")));
        let h = build(
            ScriptedGateway::with_captures(captures),
            EchoSpeech::default(),
            Arc::new(FallbackResponder::new()),
            LONG,
        );

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert_eq!(
            h.gateway.emitted(),
            vec!["greeting", "Are you still there?", "farewell"]
        );
        assert_eq!(h.speech.transcribed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_errors_are_retried_without_strikes() {
        let mut captures: Vec<Capture> = (0..4).map(|_| Capture::Fail).collect();
        captures.push(Capture::Audio(Bytes::from_static(b"what is the weather")));
        captures.push(Capture::Audio(Bytes::from_static(b"bye")));
        let h = build(
            ScriptedGateway::with_captures(captures),
            EchoSpeech::default(),
            Arc::new(BrokenResponder),
            LONG,
        );

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert_eq!(h.gateway.emitted(), vec!["greeting", "apology", "farewell"]);
        let session = h.registry.get(7).unwrap();
        assert_eq!(session.silence_strikes, 0);
        assert_eq!(session.turn_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_responder_failure_speaks_apology() {
        let h = harness(
            &[Some("what is the weather"), Some("bye")],
            Arc::new(BrokenResponder),
            false,
            LONG,
        );

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert_eq!(h.gateway.emitted(), vec!["greeting", "apology", "farewell"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_responder_times_out_to_apology() {
        let h = harness(
            &[Some("what is the weather"), Some("bye")],
            Arc::new(StalledResponder),
            false,
            LONG,
        );
        let started = Instant::now();

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert!(started.elapsed() >= ConversationConfig::default().generate_timeout());
        assert_eq!(h.gateway.emitted(), vec!["greeting", "apology", "farewell"]);
        assert_eq!(h.registry.get(7).unwrap().turn_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_transcription_is_a_failed_listen() {
        let speech = EchoSpeech {
            stall_transcribe_on: Some("mumble"),
            ..EchoSpeech::default()
        };
        let h = build(
            ScriptedGateway::new(&[Some("mumble"), Some("bye")]),
            speech,
            Arc::new(FallbackResponder::new()),
            LONG,
        );
        let started = Instant::now();

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert!(started.elapsed() >= ConversationConfig::default().transcribe_timeout());
        assert_eq!(h.gateway.emitted(), vec!["greeting", "farewell"]);
        let session = h.registry.get(7).unwrap();
        assert_eq!(session.silence_strikes, 0);
        assert_eq!(session.turn_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_generation_commits_nothing() {
        let h = harness(
            &[Some("what is the weather")],
            Arc::new(StalledResponder),
            false,
            LONG,
        );
        let task = tokio::spawn(h.conversation.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        h.cancel.cancel();
        assert_eq!(task.await.unwrap(), LoopOutcome::Cancelled);

        assert_eq!(h.gateway.emitted(), vec!["greeting"]);
        assert_eq!(h.registry.get(7).unwrap().turn_count, 0);
        let saved = h.sink.saved.lock();
        assert!(saved[0].entries.is_empty());
        assert!(saved[0].facts.is_empty());
        assert_eq!(saved[0].turn_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_synthesis_emits_nothing_more() {
        let speech = EchoSpeech {
            stall_synthesis_on: Some("apology"),
            ..EchoSpeech::default()
        };
        let h = build(
            ScriptedGateway::new(&[Some("what is the weather")]),
            speech,
            Arc::new(BrokenResponder),
            LONG,
        );
        let task = tokio::spawn(h.conversation.run());

        tokio::time::sleep(Duration::from_secs(5)).await;
        h.cancel.cancel();
        assert_eq!(task.await.unwrap(), LoopOutcome::Cancelled);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.gateway.emitted(), vec!["greeting"]);
        assert_eq!(h.registry.get(7).unwrap().turn_count, 0);
        assert!(h.sink.saved.lock()[0].entries.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_synthesis_failure_skips_playback_but_commits_turn() {
        let h = harness(
            &[Some("hello"), Some("bye")],
            Arc::new(FallbackResponder::new()),
            true,
            LONG,
        );

        assert_eq!(h.conversation.run().await, LoopOutcome::Farewell);
        assert!(h.gateway.emitted().is_empty());
        assert_eq!(h.registry.get(7).unwrap().turn_count, 2);
        assert_eq!(h.sink.saved.lock()[0].entries.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_caller_hits_max_duration() {
        let h = harness(
            &[],
            Arc::new(FallbackResponder::new()),
            false,
            Duration::from_secs(30),
        );

        let outcome = h.conversation.run().await;
        match outcome {
            LoopOutcome::MaxDuration { elapsed } => assert!(elapsed >= Duration::from_secs(30)),
            other => panic!("expected MaxDuration, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start_emits_nothing() {
        let h = harness(&[Some("hello")], Arc::new(FallbackResponder::new()), false, LONG);
        h.cancel.cancel();

        assert_eq!(h.conversation.run().await, LoopOutcome::Cancelled);
        assert!(h.gateway.emitted().is_empty());
        let saved = h.sink.saved.lock();
        assert!(saved[0].entries.is_empty());
        assert_eq!(saved[0].outcome, "cancelled");
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_session_cancels_loop() {
        let h = harness(&[None], Arc::new(FallbackResponder::new()), false, LONG);
        h.registry.remove(7);
        assert!(h.cancel.is_cancelled());
        assert_eq!(h.conversation.run().await, LoopOutcome::Cancelled);
    }
}
