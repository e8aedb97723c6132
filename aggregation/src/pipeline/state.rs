//! Pipeline state machine — phases, transitions, and run tracking.
//!
//! ```text
//! Idle → Stage1 → Stage2 → Stage3 → Complete
//!   │       │        │        │
//!   └───────┴────────┴────────┴──→ Failed
//! ```
//!
//! Transitions are one-directional. There is no retry or rollback: a failed
//! stage ends the run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::stage::Stage;

/// Phase of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    /// Run created, no stage entered yet.
    Idle,
    /// Stage-1 prompts built.
    Stage1,
    /// Stage-2 prompts built.
    Stage2,
    /// Stage-3 prompts built.
    Stage3,
    /// Final responses collected.
    Complete,
    /// A stage failed.
    Failed,
}

impl PipelinePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }

    pub fn valid_transitions(self) -> &'static [PipelinePhase] {
        match self {
            Self::Idle => &[Self::Stage1, Self::Failed],
            Self::Stage1 => &[Self::Stage2, Self::Failed],
            Self::Stage2 => &[Self::Stage3, Self::Failed],
            Self::Stage3 => &[Self::Complete, Self::Failed],
            Self::Complete | Self::Failed => &[],
        }
    }

    pub fn for_stage(stage: Stage) -> Self {
        match stage {
            Stage::Answer => Self::Stage1,
            Stage::Critique => Self::Stage2,
            Stage::Synthesis => Self::Stage3,
        }
    }
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Stage1 => write!(f, "stage1"),
            Self::Stage2 => write!(f, "stage2"),
            Self::Stage3 => write!(f, "stage3"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Error for invalid phase transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition {from} → {to}: {reason}")]
pub struct TransitionError {
    pub from: PipelinePhase,
    pub to: PipelinePhase,
    pub reason: String,
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: PipelinePhase,
    pub to: PipelinePhase,
    /// Records in the batch that entered the new phase.
    pub records: usize,
    pub timestamp: DateTime<Utc>,
}

/// Phase tracking for one run through the three stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub id: String,
    pub phase: PipelinePhase,
    pub transitions: Vec<PhaseTransition>,
}

impl RunState {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            phase: PipelinePhase::Idle,
            transitions: Vec::new(),
        }
    }

    pub fn can_transition_to(&self, to: PipelinePhase) -> bool {
        self.phase.valid_transitions().contains(&to)
    }

    pub fn transition(&mut self, to: PipelinePhase, records: usize) -> Result<(), TransitionError> {
        if !self.can_transition_to(to) {
            let reason = if self.phase.is_terminal() {
                "run already finished".to_string()
            } else {
                format!("expected one of {:?}", self.phase.valid_transitions())
            };
            return Err(TransitionError {
                from: self.phase,
                to,
                reason,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            records,
            timestamp: Utc::now(),
        });
        self.phase = to;
        Ok(())
    }

    /// Move to `Failed` unless already terminal.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            let _ = self.transition(PipelinePhase::Failed, 0);
        }
    }
}
