//! OpenAI Responder
//!
//! Chat-completions backed replies for any OpenAI-compatible endpoint.

use crate::ai::{AiError, ResponseCapability, Result};
use crate::config::ResponderConfig;
use crate::conversation::{ConversationContext, Role};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat responder
pub struct OpenAiResponder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: String,
}

impl OpenAiResponder {
    /// Create a responder; requires an API key
    pub fn new(config: &ResponderConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AiError::AuthenticationError("API key required".to_string()))?;

        let headers = super::build_headers(api_key, config.organization.as_deref())?;
        let client = super::build_client(config.http_timeout_seconds, headers)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            system_prompt: config.system_prompt.clone(),
        })
    }

    /// Model used for completions
    pub fn model(&self) -> &str {
        &self.model
    }
}

/// Chat messages for one turn: system prompt with facts, history, utterance
pub fn build_messages(
    system_prompt: &str,
    utterance: &str,
    context: &ConversationContext,
) -> Vec<Value> {
    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(json!({
        "role": "system",
        "content": format!("{}{}", system_prompt, context.format_facts()),
    }));
    for entry in context.history() {
        let role = match entry.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(json!({ "role": role, "content": entry.text }));
    }
    messages.push(json!({ "role": "user", "content": utterance }));
    messages
}

#[async_trait]
impl ResponseCapability for OpenAiResponder {
    async fn generate(&self, utterance: &str, context: &ConversationContext) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": build_messages(&self.system_prompt, utterance, context),
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body)
            .send()
            .await?;
        let completion: ChatCompletion = super::handle_api_error(response).await?.json().await?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or(AiError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
