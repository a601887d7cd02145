//! Configuration
//!
//! Typed configuration loaded from a json5 file, with environment overrides
//! applied on top. Every section has defaults, so an absent file or an empty
//! object is a valid configuration.

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "CALLKEEPER_CONFIG_PATH";

const DEFAULT_GREETING: &str = "Hello! This is an automated assistant. How can I help you today?";
const DEFAULT_STILL_THERE_PROMPT: &str = "Are you still there?";
const DEFAULT_FAREWELL: &str = "Thank you for calling. Goodbye!";
const DEFAULT_APOLOGY: &str = "I'm sorry, I had trouble with that. Could you say it again?";
const DEFAULT_SYSTEM_PROMPT: &str = "You are a friendly voice assistant answering a phone call. \
Keep every reply to one or two short spoken sentences. Do not use markdown, lists or emoji.";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub calls: CallConfig,
    pub conversation: ConversationConfig,
    pub speech: SpeechConfig,
    pub responder: ResponderConfig,
    pub transcripts: TranscriptConfig,
    pub logging: LoggingConfig,
}

/// Call handling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallConfig {
    /// Accept incoming calls without waiting for the host
    pub auto_answer: bool,
    /// Delay between a call appearing and the accept command
    pub answer_delay_seconds: u64,
    /// Grace period for the gateway to confirm an accept or an end
    pub ready_timeout_seconds: u64,
    /// Maximum connected duration before the call is ended
    pub max_call_duration_seconds: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            auto_answer: true,
            answer_delay_seconds: 2,
            ready_timeout_seconds: 30,
            max_call_duration_seconds: 300,
        }
    }
}

impl CallConfig {
    pub fn answer_delay(&self) -> Duration {
        Duration::from_secs(self.answer_delay_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_seconds)
    }

    pub fn max_call_duration(&self) -> Duration {
        Duration::from_secs(self.max_call_duration_seconds)
    }
}

/// Conversation loop behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversationConfig {
    /// Silent listens tolerated before the caller is prompted
    pub silence_strike_threshold: u32,
    /// History entries kept for the responder
    pub history_window: usize,
    pub capture_timeout_seconds: u64,
    pub transcribe_timeout_seconds: u64,
    pub generate_timeout_seconds: u64,
    pub synthesize_timeout_seconds: u64,
    pub playback_timeout_seconds: u64,
    /// Longer utterances are truncated
    pub max_utterance_chars: usize,
    /// Captured audio quieter than this RMS (fraction of full scale) is
    /// treated as silence without transcribing; `0` disables the gate
    pub silence_rms_threshold: f32,
    pub greeting: String,
    pub still_there_prompt: String,
    pub farewell: String,
    /// Spoken when the responder fails or times out
    pub apology: String,
    /// Repeat the greeting after each "still there" prompt
    pub regreet_after_prompt: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            silence_strike_threshold: 3,
            history_window: crate::conversation::DEFAULT_HISTORY_WINDOW,
            capture_timeout_seconds: 15,
            transcribe_timeout_seconds: 30,
            generate_timeout_seconds: 30,
            synthesize_timeout_seconds: 30,
            playback_timeout_seconds: 30,
            max_utterance_chars: crate::conversation::DEFAULT_MAX_UTTERANCE_CHARS,
            silence_rms_threshold: crate::speech::DEFAULT_SILENCE_RMS,
            greeting: DEFAULT_GREETING.to_string(),
            still_there_prompt: DEFAULT_STILL_THERE_PROMPT.to_string(),
            farewell: DEFAULT_FAREWELL.to_string(),
            apology: DEFAULT_APOLOGY.to_string(),
            regreet_after_prompt: false,
        }
    }
}

impl ConversationConfig {
    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_seconds)
    }

    pub fn transcribe_timeout(&self) -> Duration {
        Duration::from_secs(self.transcribe_timeout_seconds)
    }

    pub fn generate_timeout(&self) -> Duration {
        Duration::from_secs(self.generate_timeout_seconds)
    }

    pub fn synthesize_timeout(&self) -> Duration {
        Duration::from_secs(self.synthesize_timeout_seconds)
    }

    pub fn playback_timeout(&self) -> Duration {
        Duration::from_secs(self.playback_timeout_seconds)
    }
}

/// Speech-to-text and text-to-speech endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechConfig {
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub stt_model: String,
    pub tts_model: String,
    pub voice: String,
    /// ISO-639-1 hint for transcription
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Sample rate of the 16-bit mono PCM exchanged with the gateway
    pub sample_rate: u32,
    pub http_timeout_seconds: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            language: None,
            sample_rate: 24_000,
            http_timeout_seconds: 60,
        }
    }
}

/// Chat completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponderConfig {
    pub base_url: String,
    /// Without a key the keyword responder is used
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: String,
    pub http_timeout_seconds: u64,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            organization: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 150,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            http_timeout_seconds: 30,
        }
    }
}

impl ResponderConfig {
    /// Whether a chat API key is present
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }
}

/// Transcript persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TranscriptConfig {
    pub enabled: bool,
    pub dir: PathBuf,
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: default_transcript_dir(),
        }
    }
}

/// `<data dir>/callkeeper/conversations`
pub fn default_transcript_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("callkeeper")
        .join("conversations")
}

/// Resolve the config file path
///
/// `$CALLKEEPER_CONFIG_PATH` wins; otherwise `<config dir>/callkeeper/config.json5`.
pub fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join("callkeeper")
        .join("config.json5")
}

/// Parse a config file; a missing file yields defaults
pub fn load_config_from(path: &Path) -> Result<AppConfig, ConfigError> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(AppConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if raw.trim().is_empty() {
        return Ok(AppConfig::default());
    }

    json5::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load the config file, apply process environment overrides, validate
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let mut config = load_config_from(&get_config_path())?;
    config.apply_env_overrides(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

fn parse_bool_env(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { name, value }),
    }
}

fn check_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| ConfigError::Invalid(format!("{field} is not a valid URL: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{field} must use http or https, got {other}"
        ))),
    }
}

impl AppConfig {
    /// Apply environment overrides through `lookup`
    ///
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("AUTO_ANSWER_CALLS") {
            self.calls.auto_answer = parse_bool_env("AUTO_ANSWER_CALLS", v)?;
        }
        if let Some(v) = get("MAX_CALL_DURATION") {
            self.calls.max_call_duration_seconds = parse_env("MAX_CALL_DURATION", v)?;
        }
        if let Some(v) = get("ANSWER_DELAY_SECONDS") {
            self.calls.answer_delay_seconds = parse_env("ANSWER_DELAY_SECONDS", v)?;
        }
        if let Some(v) = get("SILENCE_STRIKE_THRESHOLD") {
            self.conversation.silence_strike_threshold = parse_env("SILENCE_STRIKE_THRESHOLD", v)?;
        }
        if let Some(v) = get("HISTORY_WINDOW") {
            self.conversation.history_window = parse_env("HISTORY_WINDOW", v)?;
        }
        if let Some(key) = get("OPENAI_API_KEY") {
            self.speech.api_key = Some(key.clone());
            self.responder.api_key = Some(key);
        }
        if let Some(url) = get("OPENAI_BASE_URL") {
            self.speech.base_url = url.clone();
            self.responder.base_url = url;
        }
        if let Some(level) = get("CALLKEEPER_LOG_LEVEL") {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("calls.readyTimeoutSeconds", self.calls.ready_timeout_seconds),
            (
                "calls.maxCallDurationSeconds",
                self.calls.max_call_duration_seconds,
            ),
            (
                "conversation.captureTimeoutSeconds",
                self.conversation.capture_timeout_seconds,
            ),
            (
                "conversation.transcribeTimeoutSeconds",
                self.conversation.transcribe_timeout_seconds,
            ),
            (
                "conversation.generateTimeoutSeconds",
                self.conversation.generate_timeout_seconds,
            ),
            (
                "conversation.synthesizeTimeoutSeconds",
                self.conversation.synthesize_timeout_seconds,
            ),
            (
                "conversation.playbackTimeoutSeconds",
                self.conversation.playback_timeout_seconds,
            ),
            (
                "speech.httpTimeoutSeconds",
                self.speech.http_timeout_seconds,
            ),
            (
                "responder.httpTimeoutSeconds",
                self.responder.http_timeout_seconds,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{field} must be greater than 0")));
            }
        }

        if self.conversation.history_window == 0 {
            return Err(ConfigError::Invalid(
                "conversation.historyWindow must be greater than 0".to_string(),
            ));
        }
        if self.conversation.max_utterance_chars == 0 {
            return Err(ConfigError::Invalid(
                "conversation.maxUtteranceChars must be greater than 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.conversation.silence_rms_threshold) {
            return Err(ConfigError::Invalid(
                "conversation.silenceRmsThreshold must be at least 0 and below 1".to_string(),
            ));
        }
        if self.speech.sample_rate == 0 {
            return Err(ConfigError::Invalid(
                "speech.sampleRate must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.responder.temperature) {
            return Err(ConfigError::Invalid(
                "responder.temperature must be between 0 and 2".to_string(),
            ));
        }

        check_url("speech.baseUrl", &self.speech.base_url)?;
        check_url("responder.baseUrl", &self.responder.base_url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert!(config.calls.auto_answer);
        assert_eq!(config.calls.answer_delay(), Duration::from_secs(2));
        assert_eq!(config.calls.ready_timeout(), Duration::from_secs(30));
        assert_eq!(config.calls.max_call_duration(), Duration::from_secs(300));
        assert_eq!(config.conversation.silence_strike_threshold, 3);
        assert_eq!(config.conversation.history_window, 10);
        assert_eq!(config.conversation.capture_timeout(), Duration::from_secs(15));
        assert_eq!(config.conversation.still_there_prompt, "Are you still there?");
        assert!(!config.conversation.regreet_after_prompt);
        assert!(!config.responder.has_api_key());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_config_from(&tmp.path().join("absent.json5")).unwrap();
        assert_eq!(config.calls.max_call_duration_seconds, 300);
    }

    #[test]
    fn test_load_json5_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json5");
        std::fs::write(
            &path,
            r#"{
                // trailing commas and comments are fine
                calls: { autoAnswer: false, maxCallDurationSeconds: 120, },
                conversation: { greeting: "Hi there", regreetAfterPrompt: true },
                responder: { model: "gpt-4o" },
            }"#,
        )
        .unwrap();

        let config = load_config_from(&path).unwrap();
        assert!(!config.calls.auto_answer);
        assert_eq!(config.calls.max_call_duration_seconds, 120);
        assert_eq!(config.calls.answer_delay_seconds, 2);
        assert_eq!(config.conversation.greeting, "Hi there");
        assert!(config.conversation.regreet_after_prompt);
        assert_eq!(config.responder.model, "gpt-4o");
        assert_eq!(config.speech.voice, "alloy");
    }

    #[test]
    fn test_load_rejects_malformed_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json5");
        std::fs::write(&path, "{ calls: ").unwrap();
        assert!(matches!(
            load_config_from(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[
                ("AUTO_ANSWER_CALLS", "false"),
                ("MAX_CALL_DURATION", "60"),
                ("ANSWER_DELAY_SECONDS", "0"),
                ("SILENCE_STRIKE_THRESHOLD", "5"),
                ("HISTORY_WINDOW", "4"),
                ("OPENAI_API_KEY", "sk-env"),
                ("OPENAI_BASE_URL", "http://localhost:8000/v1"),
                ("CALLKEEPER_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert!(!config.calls.auto_answer);
        assert_eq!(config.calls.max_call_duration_seconds, 60);
        assert_eq!(config.calls.answer_delay_seconds, 0);
        assert_eq!(config.conversation.silence_strike_threshold, 5);
        assert_eq!(config.conversation.history_window, 4);
        assert_eq!(config.speech.api_key.as_deref(), Some("sk-env"));
        assert!(config.responder.has_api_key());
        assert_eq!(config.responder.base_url, "http://localhost:8000/v1");
        assert_eq!(config.logging.level, "debug");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(env(&[("MAX_CALL_DURATION", "forever")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "MAX_CALL_DURATION",
                ..
            }
        ));

        let err = config
            .apply_env_overrides(env(&[("AUTO_ANSWER_CALLS", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_empty_env_values_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_env_overrides(env(&[("OPENAI_API_KEY", ""), ("MAX_CALL_DURATION", " ")]))
            .unwrap();
        assert!(config.speech.api_key.is_none());
        assert_eq!(config.calls.max_call_duration_seconds, 300);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = AppConfig::default();
        config.calls.max_call_duration_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.conversation.history_window = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.conversation.capture_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_silence_gate_range() {
        let mut config = AppConfig::default();
        config.conversation.silence_rms_threshold = 0.0;
        assert!(config.validate().is_ok());

        config.conversation.silence_rms_threshold = 1.5;
        assert!(config.validate().is_err());

        config.conversation.silence_rms_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_urls() {
        let mut config = AppConfig::default();
        config.speech.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.responder.base_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(AppConfig::default()).unwrap();
        assert_eq!(json["calls"]["maxCallDurationSeconds"], 300);
        assert_eq!(json["conversation"]["stillTherePrompt"], "Are you still there?");
        assert!(json["responder"].get("apiKey").is_none());
    }
}
