//! Application Runtime
//!
//! Builds the capabilities from configuration, wires them to the stdio
//! gateway and the call state machine, and runs until stdin closes or
//! Ctrl-C is pressed.

use crate::ai::{AiError, FallbackResponder, OpenAiResponder, ResponseCapability};
use crate::calls::{CallStateMachine, SessionRegistry};
use crate::config::{AppConfig, ConfigError};
use crate::conversation::{Capabilities, JsonTranscriptSink, TranscriptSink};
use crate::gateway::{GatewayError, SignalingGateway, StdioGateway};
use crate::speech::{OpenAiSpeech, SpeechCapability, SpeechError};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Buffered gateway events before the reader waits on the state machine
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Startup and runtime errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Speech capability unavailable: {0}")]
    MissingSpeech(String),

    #[error("Speech setup failed: {0}")]
    Speech(#[from] SpeechError),

    #[error("Responder setup failed: {0}")]
    Responder(#[from] AiError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

/// Speech, responder and transcript sink built from configuration
pub struct Backends {
    pub speech: Arc<dyn SpeechCapability>,
    pub responder: Arc<dyn ResponseCapability>,
    pub transcripts: Option<Arc<dyn TranscriptSink>>,
}

/// Build the backends, failing fast when speech cannot work
///
/// Speech is mandatory. The hosted endpoint needs a key; a self-hosted
/// base URL may run without one. Without a chat key the keyword responder
/// answers.
pub fn build_backends(config: &AppConfig) -> Result<Backends, AppError> {
    let speech_key_missing = config.speech.api_key.as_deref().is_none_or(str::is_empty);
    let hosted = url::Url::parse(&config.speech.base_url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.ends_with("openai.com")))
        .unwrap_or(false);
    if speech_key_missing && hosted {
        return Err(AppError::MissingSpeech(
            "set OPENAI_API_KEY or point speech.baseUrl at a local server".to_string(),
        ));
    }
    let speech: Arc<dyn SpeechCapability> = Arc::new(OpenAiSpeech::new(&config.speech)?);

    let responder: Arc<dyn ResponseCapability> = if config.responder.has_api_key() {
        Arc::new(OpenAiResponder::new(&config.responder)?)
    } else {
        warn!("no chat API key configured, using keyword responder");
        Arc::new(FallbackResponder::new())
    };

    let transcripts: Option<Arc<dyn TranscriptSink>> = if config.transcripts.enabled {
        Some(Arc::new(JsonTranscriptSink::new(&config.transcripts.dir)))
    } else {
        None
    };

    info!(
        speech = speech.name(),
        responder = responder.name(),
        transcripts = config.transcripts.enabled,
        "backends ready"
    );
    Ok(Backends {
        speech,
        responder,
        transcripts,
    })
}

/// Answer calls over stdin/stdout until input ends or Ctrl-C
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let backends = build_backends(&config)?;
    let gateway = Arc::new(StdioGateway::stdout());

    let caps = Capabilities {
        gateway: gateway.clone() as Arc<dyn SignalingGateway>,
        speech: backends.speech,
        responder: backends.responder,
        transcripts: backends.transcripts,
    };
    let machine = CallStateMachine::new(
        SessionRegistry::new(),
        caps,
        config.calls.clone(),
        config.conversation.clone(),
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("interrupt received, shutting down"),
                Err(e) => error!(error = %e, "failed to listen for interrupt"),
            }
            shutdown.cancel();
        });
    }

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let reader = {
        let gateway = gateway.clone();
        tokio::spawn(async move { gateway.pump(BufReader::new(tokio::io::stdin()), tx).await })
    };

    info!("waiting for calls");
    machine.run(rx, shutdown).await;

    reader.abort();
    match reader.await {
        Ok(Err(GatewayError::Closed)) | Ok(Ok(())) | Err(_) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
    }
}
