//! Utterance Analysis
//!
//! Pure helpers applied to each caller utterance: input sanitising, fact
//! extraction for the responder, and the farewell check that ends a call.

use regex::Regex;
use std::sync::LazyLock;

/// Fact key for the caller's name
pub const USER_NAME: &str = "user_name";

/// Fact key for the most recent intent
pub const LAST_INTENT: &str = "last_intent";

/// Default cap on utterance length, in characters
pub const DEFAULT_MAX_UTTERANCE_CHARS: usize = 1000;

/// Phrases that end the call, matched as case-insensitive substrings
pub const FAREWELL_PHRASES: &[&str] = &["goodbye", "bye", "end call", "hang up"];

/// Captures the whole word after the introduction, in any script
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bmy name is\s+(\p{L}[\p{L}\p{M}'-]*)").unwrap());

/// Coarse intent of an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Greeting,
    Help,
    Information,
    Farewell,
}

impl Intent {
    /// Checked in this order; the first hit wins
    const ORDERED: [Intent; 4] = [
        Intent::Greeting,
        Intent::Help,
        Intent::Information,
        Intent::Farewell,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Greeting => "greeting",
            Intent::Help => "help",
            Intent::Information => "information",
            Intent::Farewell => "farewell",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Intent::Greeting => &["hello", "hi", "hey"],
            Intent::Help => &["help", "assist", "support"],
            Intent::Information => &["what", "when", "where", "how"],
            Intent::Farewell => &["bye", "goodbye", "see you"],
        }
    }
}

/// Facts extracted from one utterance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactUpdate {
    entries: Vec<(&'static str, String)>,
}

impl FactUpdate {
    fn single(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            entries: vec![(key, value.into())],
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

/// Strip control characters, cap the length, and trim
pub fn sanitize_utterance(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| !c.is_control())
        .take(max_chars)
        .collect();
    cleaned.trim().to_string()
}

/// Whether the utterance asks to end the call
pub fn is_farewell(text: &str) -> bool {
    let lower = text.to_lowercase();
    FAREWELL_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Classify an utterance by keyword
pub fn detect_intent(text: &str) -> Option<Intent> {
    let words = normalized_words(&text.to_lowercase());
    Intent::ORDERED
        .into_iter()
        .find(|intent| intent.keywords().iter().any(|kw| words.contains(&format!(" {kw} "))))
}

/// Extract advisory facts from a user utterance
///
/// A self-introduction wins over intent keywords; no match yields an empty
/// update.
pub fn extract_facts(text: &str) -> FactUpdate {
    let lower = text.to_lowercase();

    if let Some(name) = NAME_RE.captures(&lower).and_then(|c| c.get(1)) {
        return FactUpdate::single(USER_NAME, name.as_str());
    }

    detect_intent(&lower)
        .map(|intent| FactUpdate::single(LAST_INTENT, intent.as_str()))
        .unwrap_or_default()
}

/// Words joined by single spaces and padded, so `" kw "` matches whole words
fn normalized_words(lower: &str) -> String {
    let mut out = String::from(" ");
    for word in lower
        .split(|c: char| !(c.is_alphanumeric() || c == '\''))
        .filter(|w| !w.is_empty())
    {
        out.push_str(word);
        out.push(' ');
    }
    out
}
