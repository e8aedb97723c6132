//! Round stages: answer (1), critique (2), synthesis (3).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::record::{AGENT_ANSWERS, AGENT_OPINION};

/// One of the three sequential debate stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Stage 1: question → answer.
    Answer,
    /// Stage 2: question + selected stage-1 answers → comparative opinion.
    Critique,
    /// Stage 3: stage-2 prompt + selected stage-2 opinions → synthesized answer.
    Synthesis,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Answer, Stage::Critique, Stage::Synthesis];

    /// 1-based stage number.
    pub fn number(self) -> u8 {
        match self {
            Self::Answer => 1,
            Self::Critique => 2,
            Self::Synthesis => 3,
        }
    }

    pub fn from_number(number: u8) -> Result<Self, ConfigError> {
        match number {
            1 => Ok(Self::Answer),
            2 => Ok(Self::Critique),
            3 => Ok(Self::Synthesis),
            other => Err(ConfigError::UnknownStage(other)),
        }
    }

    /// Nested field whose agent columns feed this stage's prompt.
    ///
    /// Stage 1 has no agent input and is rejected.
    pub fn input_field(self) -> Result<&'static str, ConfigError> {
        match self {
            Self::Answer => Err(ConfigError::NoSelectableColumns(self)),
            Self::Critique => Ok(AGENT_ANSWERS),
            Self::Synthesis => Ok(AGENT_OPINION),
        }
    }

    /// Nested fields this stage's prompt depends on (gap-filled on entry).
    pub fn filled_fields(self) -> &'static [&'static str] {
        match self {
            Self::Answer => &[],
            Self::Critique => &[AGENT_ANSWERS],
            Self::Synthesis => &[AGENT_ANSWERS, AGENT_OPINION],
        }
    }

    pub fn next(self) -> Option<Stage> {
        match self {
            Self::Answer => Some(Self::Critique),
            Self::Critique => Some(Self::Synthesis),
            Self::Synthesis => None,
        }
    }
}

impl TryFrom<u8> for Stage {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::from_number(value)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}
