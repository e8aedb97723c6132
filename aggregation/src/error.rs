//! Error taxonomy for the aggregation pipeline.
//!
//! | Kind          | When                                              | Recoverable |
//! |---------------|---------------------------------------------------|-------------|
//! | Config        | unknown stage, unsupported method, `k == 0`       | no          |
//! | Codec         | agent id violates the column naming convention    | no          |
//! | Score         | scorer failed, timed out, or returned bad rewards | no          |
//! | MissingField  | `question` / `answer` / `stage2_prompt` absent     | no          |
//! | Transition    | stage called out of order                         | no          |
//!
//! Partial agent participation is not an error; the gap filler handles it.

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::state::TransitionError;
use crate::stage::Stage;

/// Result alias for aggregation operations.
pub type Result<T> = std::result::Result<T, AggregationError>;

/// Configuration errors. Raised before any record is touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown stage {0}; expected 1, 2 or 3")]
    UnknownStage(u8),

    #[error("stage {0} has no agent columns to select from")]
    NoSelectableColumns(Stage),

    #[error("unsupported selection method `{0}`; expected `top_k` or `uniform_random`")]
    UnknownMethod(String),

    #[error("selection bound k must be positive")]
    ZeroK,
}

/// Column naming violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("field `{field}`: agent id is empty")]
    EmptyAgentId { field: String },

    #[error("field `{field}`: agent id `{agent_id}` contains the column separator `_`")]
    SeparatorInAgentId { field: String, agent_id: String },

    #[error("field `{field}` is not a nested agent map")]
    NotNested { field: String },

    #[error("column `{column}` already exists in the record")]
    ColumnCollision { column: String },
}

/// Reward scorer failures. Always fatal for the affected selection.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("reward scorer failed: {0}")]
    Failed(String),

    #[error("reward scorer timed out after {0:?}")]
    Timeout(Duration),

    #[error("reward scorer returned {got} rewards for {expected} candidates")]
    LengthMismatch { expected: usize, got: usize },

    #[error("reward scorer returned non-finite reward {reward} for candidate {index}")]
    NonFinite { index: usize, reward: f64 },
}

/// Top-level aggregation error.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("column codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("scoring error: {0}")]
    Score(#[from] ScoreError),

    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("stage transition error: {0}")]
    Transition(#[from] TransitionError),

    #[error("record {index}: {source}")]
    Record {
        index: usize,
        #[source]
        source: Box<AggregationError>,
    },
}

impl AggregationError {
    /// Attach the batch position of the failing record.
    pub fn at_record(self, index: usize) -> Self {
        Self::Record {
            index,
            source: Box::new(self),
        }
    }

    /// Innermost error, with record context stripped.
    pub fn root(&self) -> &AggregationError {
        match self {
            Self::Record { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self.root(), Self::Config(_))
    }
}
