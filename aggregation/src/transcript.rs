//! Transcript sink — append-only side log of what each stage saw.
//!
//! The pipeline reports every rendered therapist answer, supervisor opinion,
//! supervisor headline and final model response to an injected sink. The
//! core never opens files; persistent sinks live with the caller.
//!
//! Sinks are infallible from the pipeline's point of view: a sink that fails
//! to persist an entry logs the failure and carries on.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stage::Stage;

/// Kind of artifact recorded in a transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// A stage-1 answer rendered into a stage-2 prompt.
    TherapistAnswer,
    /// A stage-2 opinion rendered into a stage-3 prompt.
    SupervisorOpinion,
    /// Headline snippet extracted from a supervisor opinion.
    SupervisorHeadline,
    /// A final stage-3 response.
    ModelResponse,
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TherapistAnswer => write!(f, "therapist_answer"),
            Self::SupervisorOpinion => write!(f, "supervisor_opinion"),
            Self::SupervisorHeadline => write!(f, "supervisor_headline"),
            Self::ModelResponse => write!(f, "model_response"),
        }
    }
}

/// Where an artifact came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactOrigin {
    pub stage: Stage,
    /// Position of the record in its batch.
    pub record_index: usize,
    pub agent_id: String,
    /// Dense id shown in the prompt, when the artifact was rendered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dense_id: Option<usize>,
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub kind: ArtifactKind,
    #[serde(flatten)]
    pub origin: ArtifactOrigin,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn new(kind: ArtifactKind, origin: ArtifactOrigin, content: &str) -> Self {
        Self {
            kind,
            origin,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only transcript destination.
pub trait TranscriptSink: Send + Sync {
    fn append(&self, entry: TranscriptEntry);

    fn therapist_answer(&self, origin: ArtifactOrigin, text: &str) {
        self.append(TranscriptEntry::new(
            ArtifactKind::TherapistAnswer,
            origin,
            text,
        ));
    }

    fn supervisor_opinion(&self, origin: ArtifactOrigin, text: &str) {
        self.append(TranscriptEntry::new(
            ArtifactKind::SupervisorOpinion,
            origin,
            text,
        ));
    }

    fn supervisor_headline(&self, origin: ArtifactOrigin, text: &str) {
        self.append(TranscriptEntry::new(
            ArtifactKind::SupervisorHeadline,
            origin,
            text,
        ));
    }

    fn model_response(&self, origin: ArtifactOrigin, text: &str) {
        self.append(TranscriptEntry::new(
            ArtifactKind::ModelResponse,
            origin,
            text,
        ));
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TranscriptSink for NullSink {
    fn append(&self, _entry: TranscriptEntry) {}
}

/// Keeps entries in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<TranscriptEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries, in append order.
    pub fn entries(&self) -> Vec<TranscriptEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    pub fn entries_of(&self, kind: ArtifactKind) -> Vec<TranscriptEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.kind == kind)
            .collect()
    }
}

impl TranscriptSink for MemorySink {
    fn append(&self, entry: TranscriptEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}
