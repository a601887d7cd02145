//! Conversation Context
//!
//! Rolling history and extracted facts for one call. Owned by the call's
//! conversation task; never shared.

use super::extract::FactUpdate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Default number of history entries kept
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Who said something
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One line of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Bounded history plus facts
#[derive(Debug, Clone)]
pub struct ConversationContext {
    history: VecDeque<HistoryEntry>,
    facts: BTreeMap<String, String>,
    window: usize,
}

impl ConversationContext {
    /// Create a context keeping at most `window` entries
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            history: VecDeque::with_capacity(window),
            facts: BTreeMap::new(),
            window,
        }
    }

    /// Append an entry, silently dropping the oldest past the window
    pub fn push(&mut self, entry: HistoryEntry) {
        self.history.push_back(entry);
        while self.history.len() > self.window {
            self.history.pop_front();
        }
    }

    /// Apply facts extracted from a user utterance
    pub fn apply(&mut self, update: &FactUpdate) {
        for (key, value) in update.iter() {
            self.facts.insert(key.to_string(), value.to_string());
        }
    }

    /// History, oldest first
    pub fn history(&self) -> impl DoubleEndedIterator<Item = &HistoryEntry> + ExactSizeIterator {
        self.history.iter()
    }

    /// Number of entries held
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether nothing has been said yet
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Configured window size
    pub fn window(&self) -> usize {
        self.window
    }

    /// Extracted facts
    pub fn facts(&self) -> &BTreeMap<String, String> {
        &self.facts
    }

    /// A single fact
    pub fn fact(&self, key: &str) -> Option<&str> {
        self.facts.get(key).map(String::as_str)
    }

    /// Render facts for inclusion in a system prompt
    pub fn format_facts(&self) -> String {
        if self.facts.is_empty() {
            return String::new();
        }

        let mut output = String::from("\n\n## Caller\n\n");
        for (key, value) in &self.facts {
            output.push_str(&format!("- **{key}**: {value}\n"));
        }
        output
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}
