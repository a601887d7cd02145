//! OpenAI-compatible Speech Provider
//!
//! Transcription via `/audio/transcriptions` and synthesis via
//! `/audio/speech`. Works against any server exposing the same endpoints
//! (local whisper/TTS servers included).

use super::{Result, SpeechCapability, SpeechError};
use crate::config::SpeechConfig;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

/// Maximum audio accepted for one transcription (10 MiB)
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum text accepted for one synthesis (64 KiB)
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible speech provider
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    stt_model: String,
    tts_model: String,
    voice: String,
    language: Option<String>,
    sample_rate: u32,
}

impl OpenAiSpeech {
    /// Create a provider from configuration
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(SpeechError::ConfigError(
                "speech base URL is required".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|k| !k.is_empty()),
            stt_model: config.stt_model.clone(),
            tts_model: config.tts_model.clone(),
            voice: config.voice.clone(),
            language: config.language.clone(),
            sample_rate: config.sample_rate,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SpeechError::ProviderError(format!(
        "{} failed with {}: {}",
        what, status, body
    )))
}

#[async_trait]
impl SpeechCapability for OpenAiSpeech {
    async fn transcribe(&self, pcm: &[u8]) -> Result<Option<String>> {
        if pcm.is_empty() {
            return Ok(None);
        }
        if pcm.len() > MAX_STT_INPUT_BYTES {
            return Err(SpeechError::InputTooLarge(pcm.len()));
        }

        let file = Part::bytes(pcm_to_wav(pcm, self.sample_rate))
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = Form::new()
            .text("model", self.stt_model.clone())
            .text("response_format", "json")
            .part("file", file);
        if let Some(language) = &self.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .post("/audio/transcriptions")
            .multipart(form)
            .send()
            .await?;
        let body: TranscriptionResponse = check_status(response, "transcription")
            .await?
            .json()
            .await?;

        let text = body.text.trim();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text.to_string()))
        }
    }

    async fn synthesize(&self, text: &str) -> Result<Bytes> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(SpeechError::InputTooLarge(text.len()));
        }

        let response = self
            .post("/audio/speech")
            .json(&serde_json::json!({
                "model": self.tts_model,
                "input": text,
                "voice": self.voice,
                "response_format": "pcm",
            }))
            .send()
            .await?;

        Ok(check_status(response, "synthesis").await?.bytes().await?)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Wrap 16-bit mono little-endian PCM in a WAV container
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes());
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}
