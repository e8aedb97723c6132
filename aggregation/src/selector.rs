//! Selector — bound the number of agent outputs that reach a prompt.
//!
//! Two methods:
//! - `top_k` (default): score every candidate once, order ascending by
//!   `(reward, tiebreak_hash(column))`, keep the last `k`. Deterministic for a
//!   deterministic scorer, regardless of column input order.
//! - `uniform_random`: `k` columns without replacement. Reproducible only when
//!   a seed is configured; each record then draws from its own generator,
//!   seeded from `(seed, stage, record index)`.
//!
//! The effective bound is `min(k, available)`; having fewer than `k`
//! candidates is never an error.

use std::str::FromStr;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::codec::ColumnCodec;
use crate::error::{ConfigError, Result};
use crate::record::{Record, ANSWER, QUESTION};
use crate::reward::{score_checked, ScoreRequest, ScorerSet, DEFAULT_SCORER_TIMEOUT};
use crate::stage::Stage;

/// Default selection bound.
pub const DEFAULT_K: usize = 15;

/// How columns are chosen when more than `k` are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    /// Highest rewards, hash tie-break.
    #[default]
    TopK,
    /// Uniform sample without replacement.
    UniformRandom,
}

impl std::fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TopK => write!(f, "top_k"),
            Self::UniformRandom => write!(f, "uniform_random"),
        }
    }
}

impl FromStr for SelectionMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "top_k" => Ok(Self::TopK),
            "uniform_random" => Ok(Self::UniformRandom),
            other => Err(ConfigError::UnknownMethod(other.to_string())),
        }
    }
}

/// Selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Maximum columns per record.
    pub k: usize,
    pub method: SelectionMethod,
    /// Seed for `uniform_random`; entropy-seeded when absent.
    pub seed: Option<u64>,
    /// Upper bound on one reward scorer call, in seconds.
    pub scorer_timeout_secs: u64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            k: DEFAULT_K,
            method: SelectionMethod::TopK,
            seed: None,
            scorer_timeout_secs: DEFAULT_SCORER_TIMEOUT.as_secs(),
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.k == 0 {
            return Err(ConfigError::ZeroK);
        }
        Ok(())
    }

    pub fn scorer_timeout(&self) -> Duration {
        Duration::from_secs(self.scorer_timeout_secs)
    }
}

/// Tie-break key for a column: the first 16 bytes of its BLAKE3 digest,
/// read as a big-endian integer.
///
/// Stable across runs, processes and platforms. Not a security boundary.
pub fn tiebreak_hash(column: &str) -> u128 {
    let digest = blake3::hash(column.as_bytes());
    let mut wide = [0u8; 16];
    wide.copy_from_slice(&digest.as_bytes()[..16]);
    u128::from_be_bytes(wide)
}

/// Seed of one record's `uniform_random` draw: BLAKE3 over the configured
/// seed, the stage number and the record index, first 8 bytes little-endian.
pub fn record_seed(seed: u64, stage: Stage, record_index: usize) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&seed.to_le_bytes());
    hasher.update(&[stage.number()]);
    hasher.update(&(record_index as u64).to_le_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&hasher.finalize().as_bytes()[..8]);
    u64::from_le_bytes(head)
}

/// A scored candidate column.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedColumn {
    pub column: String,
    pub reward: f64,
    pub tiebreak: u128,
}

/// Order candidates ascending by `(reward, tiebreak, column)`.
///
/// `columns` and `rewards` are parallel. The column name only matters on a
/// full 128-bit hash collision, which keeps the order total.
pub fn rank_columns(columns: &[String], rewards: &[f64]) -> Vec<RankedColumn> {
    let mut ranked: Vec<RankedColumn> = columns
        .iter()
        .zip(rewards)
        .map(|(column, reward)| RankedColumn {
            column: column.clone(),
            // -0.0 and 0.0 must tie so the hash decides
            reward: *reward + 0.0,
            tiebreak: tiebreak_hash(column),
        })
        .collect();
    ranked.sort_by(|a, b| {
        a.reward
            .total_cmp(&b.reward)
            .then(a.tiebreak.cmp(&b.tiebreak))
            .then_with(|| a.column.cmp(&b.column))
    });
    ranked
}

/// Chooses which agent columns of a record reach the next prompt.
pub struct Selector<'a> {
    config: &'a SelectionConfig,
    scorers: &'a ScorerSet,
}

impl<'a> Selector<'a> {
    /// Fails fast on invalid configuration.
    pub fn new(
        config: &'a SelectionConfig,
        scorers: &'a ScorerSet,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, scorers })
    }

    pub fn config(&self) -> &SelectionConfig {
        self.config
    }

    /// Select at most `k` of the `stage`'s agent columns among `all_columns`.
    ///
    /// `record_index` is the record's batch position; it only feeds the
    /// seeded `uniform_random` generator. `top_k` returns columns in ascending
    /// rank order (best last).
    pub async fn select(
        &self,
        all_columns: &[String],
        record: &Record,
        stage: Stage,
        record_index: usize,
    ) -> Result<Vec<String>> {
        let codec = ColumnCodec::for_stage(stage)?;

        let mut valid: Vec<String> = all_columns
            .iter()
            .filter(|c| codec.is_column(c))
            .cloned()
            .collect();
        valid.sort();
        valid.dedup();

        let k = self.config.k.min(valid.len());
        if k == 0 {
            debug!(stage = %stage, "No agent columns to select from");
            return Ok(Vec::new());
        }

        let selected = match self.config.method {
            SelectionMethod::UniformRandom => self.sample(&valid, k, stage, record_index),
            SelectionMethod::TopK => self.top_k(&valid, k, record, stage).await?,
        };

        debug!(
            stage = %stage,
            method = %self.config.method,
            available = valid.len(),
            k,
            "Selected agent columns"
        );
        Ok(selected)
    }

    fn sample(&self, valid: &[String], k: usize, stage: Stage, record_index: usize) -> Vec<String> {
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(record_seed(seed, stage, record_index)),
            None => StdRng::from_entropy(),
        };
        valid.choose_multiple(&mut rng, k).cloned().collect()
    }

    async fn top_k(
        &self,
        valid: &[String],
        k: usize,
        record: &Record,
        stage: Stage,
    ) -> Result<Vec<String>> {
        let scorer = self.scorers.for_stage(stage)?;
        let question = record.require_text(QUESTION)?;
        let answer = record.require_text(ANSWER)?;
        let candidates = valid
            .iter()
            .map(|c| record.require_text(c))
            .collect::<Result<Vec<&str>>>()?;

        let request = ScoreRequest::new(question, candidates, answer);
        let rewards = score_checked(scorer, &request, self.config.scorer_timeout()).await?;

        let ranked = rank_columns(valid, &rewards);
        Ok(ranked
            .into_iter()
            .skip(valid.len() - k)
            .map(|r| r.column)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::error::{AggregationError, ScoreError};
    use crate::record::AGENT_ANSWERS;
    use crate::reward::FnScorer;

    fn columns(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| format!("agent_answers_{id}")).collect()
    }

    fn record(pairs: &[(&str, &str)]) -> Record {
        Record::new()
            .with_text(QUESTION, "q")
            .with_text(ANSWER, "ref")
            .with_nested(AGENT_ANSWERS, pairs.iter().copied())
    }

    fn flat(pairs: &[(&str, &str)]) -> Record {
        ColumnCodec::new(AGENT_ANSWERS)
            .flatten(&record(pairs))
            .unwrap()
    }

    /// Reward = the candidate text parsed as a number.
    fn numeric_scorers() -> ScorerSet {
        ScorerSet::shared(Arc::new(FnScorer::new("numeric", |r: &ScoreRequest| {
            Ok(r.candidate_texts()
                .map(|t| t.parse::<f64>().unwrap_or(0.0))
                .collect())
        })))
    }

    #[test]
    fn test_method_parse() {
        assert_eq!("top_k".parse::<SelectionMethod>().unwrap(), SelectionMethod::TopK);
        assert_eq!(
            "UNIFORM_RANDOM".parse::<SelectionMethod>().unwrap(),
            SelectionMethod::UniformRandom
        );
        assert_eq!(
            "softmax".parse::<SelectionMethod>(),
            Err(ConfigError::UnknownMethod("softmax".into()))
        );
    }

    #[test]
    fn test_zero_k_rejected() {
        let config = SelectionConfig {
            k: 0,
            ..Default::default()
        };
        let scorers = numeric_scorers();
        assert!(matches!(
            Selector::new(&config, &scorers),
            Err(ConfigError::ZeroK)
        ));
    }

    #[test]
    fn test_tiebreak_hash_is_stable() {
        assert_eq!(tiebreak_hash("agent_answers_a"), tiebreak_hash("agent_answers_a"));
        assert_ne!(tiebreak_hash("agent_answers_a"), tiebreak_hash("agent_answers_b"));
    }

    #[test]
    fn test_rank_ties_broken_by_hash() {
        let cols = columns(&["a", "b", "c"]);
        let ranked = rank_columns(&cols, &[1.0, 1.0, 1.0]);
        let hashes: Vec<u128> = ranked.iter().map(|r| r.tiebreak).collect();
        let mut sorted = hashes.clone();
        sorted.sort();
        assert_eq!(hashes, sorted);
    }

    #[tokio::test]
    async fn test_top_k_keeps_highest_rewards() {
        let rec = flat(&[("a", "0.1"), ("b", "0.9"), ("c", "0.5"), ("d", "0.7")]);
        let config = SelectionConfig {
            k: 2,
            ..Default::default()
        };
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();
        let all: Vec<String> = rec.field_names().map(str::to_string).collect();

        let selected = selector.select(&all, &rec, Stage::Critique, 0).await.unwrap();
        assert_eq!(selected, columns(&["d", "b"]));
    }

    #[tokio::test]
    async fn test_k_clamped_to_available() {
        let rec = flat(&[("a", "1"), ("b", "2")]);
        let config = SelectionConfig::default();
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();
        let all: Vec<String> = rec.field_names().map(str::to_string).collect();

        let selected = selector.select(&all, &rec, Stage::Critique, 0).await.unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn test_no_columns_yields_empty_selection() {
        let rec = record(&[]);
        let config = SelectionConfig::default();
        let scorers = ScorerSet::shared(Arc::new(FnScorer::new("unreachable", |_: &ScoreRequest| {
            Err(ScoreError::Failed("must not be called".into()))
        })));
        let selector = Selector::new(&config, &scorers).unwrap();
        let selected = selector
            .select(&["question".to_string()], &rec, Stage::Critique, 0)
            .await
            .unwrap();
        assert!(selected.is_empty());
    }

    #[tokio::test]
    async fn test_stage_one_is_config_error() {
        let rec = flat(&[("a", "1")]);
        let config = SelectionConfig::default();
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();
        let err = selector
            .select(&columns(&["a"]), &rec, Stage::Answer, 0)
            .await
            .unwrap_err();
        assert!(err.is_config());
    }

    #[tokio::test]
    async fn test_missing_question_is_fatal() {
        let rec = Record::new()
            .with_text(ANSWER, "ref")
            .with_text("agent_answers_a", "1");
        let config = SelectionConfig::default();
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();
        let err = selector
            .select(&columns(&["a"]), &rec, Stage::Critique, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::MissingField { ref field } if field == QUESTION));
    }

    #[tokio::test]
    async fn test_scorer_failure_propagates() {
        let rec = flat(&[("a", "1"), ("b", "2")]);
        let config = SelectionConfig::default();
        let scorers = ScorerSet::shared(Arc::new(FnScorer::new("broken", |_: &ScoreRequest| {
            Err(ScoreError::Failed("backend down".into()))
        })));
        let selector = Selector::new(&config, &scorers).unwrap();
        let err = selector
            .select(&columns(&["a", "b"]), &rec, Stage::Critique, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, AggregationError::Score(ScoreError::Failed(_))));
    }

    #[tokio::test]
    async fn test_seeded_uniform_is_reproducible() {
        let rec = flat(&[("a", "1"), ("b", "1"), ("c", "1"), ("d", "1"), ("e", "1")]);
        let config = SelectionConfig {
            k: 3,
            method: SelectionMethod::UniformRandom,
            seed: Some(7),
            ..Default::default()
        };
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();

        let forward = columns(&["a", "b", "c", "d", "e"]);
        let mut backward = forward.clone();
        backward.reverse();

        let first = selector.select(&forward, &rec, Stage::Critique, 0).await.unwrap();
        let second = selector.select(&backward, &rec, Stage::Critique, 0).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_negative_zero_ties_with_zero() {
        let cols = columns(&["a", "b"]);
        let ranked = rank_columns(&cols, &[-0.0, 0.0]);
        let best = cols
            .iter()
            .max_by_key(|c| tiebreak_hash(c))
            .unwrap();
        assert_eq!(&ranked[1].column, best);
        assert_eq!(ranked[0].reward.to_bits(), 0.0f64.to_bits());
    }

    #[tokio::test]
    async fn test_negative_zero_reward_loses_only_on_hash() {
        let rec = flat(&[("a", "-0.0"), ("b", "0.0")]);
        let config = SelectionConfig {
            k: 1,
            ..Default::default()
        };
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();
        let cols = columns(&["a", "b"]);

        let selected = selector.select(&cols, &rec, Stage::Critique, 0).await.unwrap();
        let best = cols.iter().max_by_key(|c| tiebreak_hash(c)).unwrap();
        assert_eq!(selected, vec![best.clone()]);
    }

    #[test]
    fn test_record_seed_varies_by_record_and_stage() {
        assert_eq!(record_seed(7, Stage::Critique, 3), record_seed(7, Stage::Critique, 3));
        assert_ne!(record_seed(7, Stage::Critique, 3), record_seed(7, Stage::Critique, 4));
        assert_ne!(record_seed(7, Stage::Critique, 3), record_seed(7, Stage::Synthesis, 3));
        assert_ne!(record_seed(7, Stage::Critique, 3), record_seed(8, Stage::Critique, 3));
    }

    #[tokio::test]
    async fn test_seeded_uniform_draws_differ_across_records() {
        let ids: Vec<String> = (0..12).map(|i| format!("p{i}")).collect();
        let pairs: Vec<(&str, &str)> = ids.iter().map(|id| (id.as_str(), "1")).collect();
        let rec = flat(&pairs);
        let all: Vec<String> = rec.field_names().map(str::to_string).collect();
        let config = SelectionConfig {
            k: 3,
            method: SelectionMethod::UniformRandom,
            seed: Some(7),
            ..Default::default()
        };
        let scorers = numeric_scorers();
        let selector = Selector::new(&config, &scorers).unwrap();

        let mut draws = Vec::new();
        for index in 0..20 {
            draws.push(selector.select(&all, &rec, Stage::Critique, index).await.unwrap());
        }
        let mut distinct = draws.clone();
        distinct.sort();
        distinct.dedup();
        assert!(distinct.len() > 1);

        for (index, draw) in draws.iter().enumerate() {
            let again = selector.select(&all, &rec, Stage::Critique, index).await.unwrap();
            assert_eq!(&again, draw);
        }
    }
}
