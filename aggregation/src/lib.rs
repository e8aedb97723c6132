//! Multi-stage debate aggregation
//!
//! Builds the prompts of a three-stage debate round over a batch of records:
//!
//! 1. **Answer** — each agent answers the client question.
//! 2. **Critique** — each agent compares a selection of stage-1 answers.
//! 3. **Synthesis** — each agent writes a final answer from the stage-2
//!    prompt and a selection of stage-2 opinions.
//!
//! Agent outputs arrive as nested agent-id → text maps. Before stages 2 and 3
//! the batch is gap-filled so every record names the same agents, flattened
//! into per-agent columns, and at most `k` columns per record are selected by
//! reward (`top_k`) or at random (`uniform_random`). Selected agents are
//! renumbered densely by id before being rendered into the prompt.
//!
//! Model execution, reward models and persistence are injected by the
//! caller: see [`reward::RewardScorer`] and [`transcript::TranscriptSink`].

#![allow(clippy::uninlined_format_args)]

pub mod assembler;
pub mod codec;
pub mod error;
pub mod gap_fill;
pub mod persona;
pub mod pipeline;
pub mod prompts;
pub mod record;
pub mod remap;
pub mod reward;
pub mod samples;
pub mod selector;
pub mod stage;
pub mod transcript;

// Re-export record model
pub use record::{AgentMap, ChatMessage, FieldValue, Record, Role};

// Re-export error types
pub use error::{AggregationError, CodecError, ConfigError, Result, ScoreError};

// Re-export stage and pipeline types
pub use pipeline::{PipelineConfig, PipelinePhase, PipelineRun, RunState, StagePipeline};
pub use stage::Stage;

// Re-export selection types
pub use reward::{CumulativeScorer, FnScorer, RewardScorer, ScoreRequest, ScorerSet};
pub use selector::{SelectionConfig, SelectionMethod, Selector};

// Re-export persona and transcript types
pub use persona::{PersonaPolicy, PersonaSelector};
pub use transcript::{ArtifactKind, MemorySink, NullSink, TranscriptEntry, TranscriptSink};
