//! Speech Capability
//!
//! Speech-to-text and text-to-speech behind one narrow interface.

pub mod audio;
pub mod openai;

pub use audio::*;
pub use openai::*;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Speech errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Input too large: {0} bytes")]
    InputTooLarge(usize),
}

/// Result type for speech operations
pub type Result<T> = std::result::Result<T, SpeechError>;

/// Transcription and synthesis
#[async_trait]
pub trait SpeechCapability: Send + Sync {
    /// Transcribe PCM audio. `Ok(None)` means no speech was recognised.
    async fn transcribe(&self, pcm: &[u8]) -> Result<Option<String>>;

    /// Synthesize PCM audio for `text`
    async fn synthesize(&self, text: &str) -> Result<Bytes>;

    /// Provider name
    fn name(&self) -> &str;
}
