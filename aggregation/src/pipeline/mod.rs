//! Stage Pipeline — ordered construction of stage 1, 2 and 3 prompts.
//!
//! Stages run strictly in order; each consumes the previous stage's batch.
//!
//! # Pipeline Flow
//!
//! ```text
//! raw batch ─→ Stage1 ─→ model answers ─→ Stage2 ─→ model opinions ─→ Stage3 ─→ Complete
//!                           (agent_answers)            (agent_opinion)
//!
//! Stage 2/3 entry:
//!   gap-fill (batch) → flatten → per record: select → remap → assemble → preamble
//! ```

pub mod orchestrator;
pub mod state;

pub use orchestrator::{PipelineConfig, PipelineRun, StagePipeline};
pub use state::{PhaseTransition, PipelinePhase, RunState, TransitionError};
