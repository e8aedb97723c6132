//! Append-only JSONL transcript file.
//!
//! One line per artifact, tagged with the run id. Write failures are logged
//! and never interrupt the pipeline.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use aggregation::{TranscriptEntry, TranscriptSink};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Serialize)]
struct TranscriptLine<'a> {
    run_id: &'a str,
    #[serde(flatten)]
    entry: &'a TranscriptEntry,
}

/// Appends transcript entries to a JSONL file.
#[derive(Debug)]
pub struct JsonlTranscript {
    path: PathBuf,
    run_id: String,
    // Serializes appends from concurrently assembled records
    lock: Mutex<()>,
}

impl JsonlTranscript {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            run_id: run_id.into(),
            lock: Mutex::new(()),
        }
    }

    /// Transcript with a fresh v4 run id.
    pub fn with_random_id(path: impl Into<PathBuf>) -> Self {
        Self::new(path, uuid::Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

impl TranscriptSink for JsonlTranscript {
    fn append(&self, entry: TranscriptEntry) {
        let line = TranscriptLine {
            run_id: &self.run_id,
            entry: &entry,
        };
        let json = match serde_json::to_string(&line) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize transcript entry: {e}");
                return;
            }
        };

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{json}") {
                    warn!("Failed to append transcript entry: {e}");
                } else {
                    debug!(
                        path = %self.path.display(),
                        kind = %entry.kind,
                        "Appended transcript entry"
                    );
                }
            }
            Err(e) => warn!("Failed to open transcript file: {e}"),
        }
    }
}
