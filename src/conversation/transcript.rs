//! Transcript Sink
//!
//! Where finished conversations go when a call's loop ends.

use super::context::HistoryEntry;
use crate::calls::{CallId, PeerId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Transcript errors
#[derive(Error, Debug)]
pub enum TranscriptError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Full record of one call's conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub call_id: CallId,
    pub peer_id: Option<PeerId>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub turn_count: u32,
    /// How the conversation ended
    pub outcome: String,
    pub entries: Vec<HistoryEntry>,
    pub facts: BTreeMap<String, String>,
}

/// Destination for finished transcripts
#[async_trait]
pub trait TranscriptSink: Send + Sync {
    async fn flush(&self, transcript: &Transcript) -> Result<(), TranscriptError>;
}

/// Writes one pretty-printed JSON file per call under `<dir>/<call_id>/`
#[derive(Debug, Clone)]
pub struct JsonTranscriptSink {
    dir: PathBuf,
}

impl JsonTranscriptSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File a transcript is written to
    pub fn path_for(&self, transcript: &Transcript) -> PathBuf {
        self.dir
            .join(transcript.call_id.to_string())
            .join(format!("{}.json", transcript.started_at.format("%Y%m%d_%H%M%S")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl TranscriptSink for JsonTranscriptSink {
    async fn flush(&self, transcript: &Transcript) -> Result<(), TranscriptError> {
        let path = self.path_for(transcript);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(transcript)?;
        tokio::fs::write(&path, body).await?;
        tracing::info!(call_id = transcript.call_id, path = %path.display(), "transcript saved");
        Ok(())
    }
}
