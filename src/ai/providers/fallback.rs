//! Keyword Responder
//!
//! Canned replies used when no chat model is configured. Deterministic: the
//! default reply rotates with the length of the history.

use crate::ai::{ResponseCapability, Result};
use crate::conversation::{detect_intent, ConversationContext, Intent, USER_NAME};
use async_trait::async_trait;

const DEFAULT_REPLIES: &[&str] = &[
    "I understand. How can I help you with that?",
    "Tell me more about that.",
    "I see. What would you like to know?",
];

/// Offline responder
#[derive(Debug, Clone, Default)]
pub struct FallbackResponder;

impl FallbackResponder {
    pub fn new() -> Self {
        Self
    }

    fn reply(&self, utterance: &str, context: &ConversationContext) -> String {
        let lower = utterance.to_lowercase();
        let name = context.fact(USER_NAME).map(capitalize);

        if lower.contains("my name is") {
            if let Some(name) = &name {
                return format!("Nice to meet you, {name}! How can I help you today?");
            }
        }

        if lower.contains("how are you") {
            return "I'm doing well, thanks for asking! How can I help?".to_string();
        }

        match detect_intent(&lower) {
            Some(Intent::Greeting) => match name {
                Some(name) => format!("Hello again, {name}! What can I do for you?"),
                None => "Hello! How can I help you today?".to_string(),
            },
            Some(Intent::Help) => {
                "I can answer questions, take a message, or just chat. What do you need?"
                    .to_string()
            }
            _ => DEFAULT_REPLIES[context.len() % DEFAULT_REPLIES.len()].to_string(),
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl ResponseCapability for FallbackResponder {
    async fn generate(&self, utterance: &str, context: &ConversationContext) -> Result<String> {
        Ok(self.reply(utterance, context))
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
