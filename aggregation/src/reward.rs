//! Reward scorer seam.
//!
//! Scorers are external pure functions: one question, N candidate completions,
//! N copies of the reference answer in, N rewards out, order-preserving. The
//! request mirrors the batched call shape of the training-side reward
//! functions (a single prompt, a list of independent single-part
//! completions).
//!
//! Every call goes through [`score_checked`], which bounds it with a timeout
//! and rejects short/long or non-finite reward lists.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ScoreError};
use crate::stage::Stage;

/// Default upper bound on a single scorer call.
pub const DEFAULT_SCORER_TIMEOUT: Duration = Duration::from_secs(30);

/// One part of a prompt or completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPart {
    pub content: String,
}

impl ContentPart {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Input triple for one scorer call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Single-element list holding the question.
    pub prompts: Vec<Vec<ContentPart>>,
    /// One single-part completion per candidate.
    pub completions: Vec<Vec<ContentPart>>,
    /// One copy of the reference answer per candidate.
    pub answers: Vec<String>,
}

impl ScoreRequest {
    pub fn new<I>(question: &str, candidates: I, answer: &str) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let completions: Vec<Vec<ContentPart>> = candidates
            .into_iter()
            .map(|c| vec![ContentPart::new(c)])
            .collect();
        let answers = vec![answer.to_string(); completions.len()];
        Self {
            prompts: vec![vec![ContentPart::new(question)]],
            completions,
            answers,
        }
    }

    /// Text of each candidate, in request order.
    pub fn candidate_texts(&self) -> impl Iterator<Item = &str> {
        self.completions.iter().map(|parts| {
            parts
                .first()
                .map(|p| p.content.as_str())
                .unwrap_or_default()
        })
    }

    pub fn len(&self) -> usize {
        self.completions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completions.is_empty()
    }
}

/// External reward function for one stage.
#[async_trait]
pub trait RewardScorer: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str {
        "reward_scorer"
    }

    /// One reward per completion, in completion order.
    async fn score(&self, request: &ScoreRequest) -> Result<Vec<f64>, ScoreError>;
}

/// Call `scorer` with a timeout and validate its output.
pub async fn score_checked(
    scorer: &dyn RewardScorer,
    request: &ScoreRequest,
    timeout: Duration,
) -> Result<Vec<f64>, ScoreError> {
    let rewards = match tokio::time::timeout(timeout, scorer.score(request)).await {
        Ok(result) => result?,
        Err(_) => {
            warn!(scorer = scorer.name(), ?timeout, "Reward scorer timed out");
            return Err(ScoreError::Timeout(timeout));
        }
    };

    if rewards.len() != request.len() {
        return Err(ScoreError::LengthMismatch {
            expected: request.len(),
            got: rewards.len(),
        });
    }
    if let Some((index, reward)) = rewards.iter().enumerate().find(|(_, r)| !r.is_finite()) {
        return Err(ScoreError::NonFinite {
            index,
            reward: *reward,
        });
    }
    Ok(rewards)
}

/// Sums the rewards of several scorers element-wise.
pub struct CumulativeScorer {
    name: String,
    parts: Vec<Arc<dyn RewardScorer>>,
}

impl CumulativeScorer {
    pub fn new(name: &str, parts: Vec<Arc<dyn RewardScorer>>) -> Self {
        Self {
            name: name.to_string(),
            parts,
        }
    }
}

#[async_trait]
impl RewardScorer for CumulativeScorer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, request: &ScoreRequest) -> Result<Vec<f64>, ScoreError> {
        let mut total = vec![0.0; request.len()];
        for part in &self.parts {
            let rewards = part.score(request).await?;
            if rewards.len() != total.len() {
                return Err(ScoreError::LengthMismatch {
                    expected: total.len(),
                    got: rewards.len(),
                });
            }
            for (acc, r) in total.iter_mut().zip(rewards) {
                *acc += r;
            }
        }
        Ok(total)
    }
}

/// Scorer backed by a plain function.
pub struct FnScorer<F> {
    name: String,
    f: F,
}

impl<F> FnScorer<F>
where
    F: Fn(&ScoreRequest) -> Result<Vec<f64>, ScoreError> + Send + Sync,
{
    pub fn new(name: &str, f: F) -> Self {
        Self {
            name: name.to_string(),
            f,
        }
    }
}

#[async_trait]
impl<F> RewardScorer for FnScorer<F>
where
    F: Fn(&ScoreRequest) -> Result<Vec<f64>, ScoreError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn score(&self, request: &ScoreRequest) -> Result<Vec<f64>, ScoreError> {
        (self.f)(request)
    }
}

/// Scorers for the two stages that select agent outputs.
#[derive(Clone)]
pub struct ScorerSet {
    /// Scores stage-1 answers when building stage-2 prompts.
    critique: Arc<dyn RewardScorer>,
    /// Scores stage-2 opinions when building stage-3 prompts.
    synthesis: Arc<dyn RewardScorer>,
}

impl ScorerSet {
    pub fn new(critique: Arc<dyn RewardScorer>, synthesis: Arc<dyn RewardScorer>) -> Self {
        Self {
            critique,
            synthesis,
        }
    }

    /// Same scorer for both stages.
    pub fn shared(scorer: Arc<dyn RewardScorer>) -> Self {
        Self::new(scorer.clone(), scorer)
    }

    pub fn for_stage(&self, stage: Stage) -> Result<&dyn RewardScorer, ConfigError> {
        match stage {
            Stage::Critique => Ok(self.critique.as_ref()),
            Stage::Synthesis => Ok(self.synthesis.as_ref()),
            Stage::Answer => Err(ConfigError::NoSelectableColumns(stage)),
        }
    }
}

impl std::fmt::Debug for ScorerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScorerSet")
            .field("critique", &self.critique.name())
            .field("synthesis", &self.synthesis.name())
            .finish()
    }
}
