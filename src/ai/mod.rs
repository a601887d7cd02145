//! Reply Generation
//!
//! The response capability that turns a caller utterance plus conversation
//! context into the assistant's next line.

pub mod providers;

pub use providers::*;

use crate::conversation::ConversationContext;
use async_trait::async_trait;

/// Errors that can occur when generating a reply
#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("Chat request failed: {0}")]
    ApiError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Rate limit exceeded. Retry after: {retry_after}s")]
    RateLimitExceeded { retry_after: u64 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Empty response")]
    EmptyResponse,
}

/// Result type for AI operations
pub type Result<T> = std::result::Result<T, AiError>;

/// Produces the assistant's reply for one turn
#[async_trait]
pub trait ResponseCapability: Send + Sync {
    /// Generate a reply to `utterance`.
    ///
    /// `context` holds the committed history (not including `utterance`) and
    /// the facts known so far, with this turn's facts already applied.
    async fn generate(&self, utterance: &str, context: &ConversationContext) -> Result<String>;

    /// Provider name
    fn name(&self) -> &str;
}
