//! Built-in format reward scorers.
//!
//! Used when no external reward model is wired in. Each check awards a fixed
//! reward when a candidate follows the expected answer format, and the stage
//! scorer is the sum of its checks.

use std::sync::{Arc, LazyLock};

use aggregation::reward::{CumulativeScorer, FnScorer, RewardScorer, ScoreRequest};
use aggregation::ScorerSet;
use regex::Regex;

/// Reward for each tag section present.
pub const TAG_REWARD: f64 = 0.5;
/// Reward for a well-formed `<identify>` value.
pub const IDENTIFY_VALUE_REWARD: f64 = 1.0;

static THINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<think>\s*\S.*?</think>").expect("THINK_RE regex should compile")
});

static ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<answer>\s*\S.*?</answer>").expect("ANSWER_RE regex should compile")
});

/// Full `<think>` then `<answer>` layout with nothing around it.
static STRICT_ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\A\s*<think>.*?</think>\s*<answer>.*?</answer>\s*\z")
        .expect("STRICT_ANSWER_RE regex should compile")
});

static COMPARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<compare>\s*\S.*?</compare>").expect("COMPARE_RE regex should compile")
});

static EXPLAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<explain>\s*\S.*?</explain>").expect("EXPLAIN_RE regex should compile")
});

static IDENTIFY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<identify>(.*?)</identify>").expect("IDENTIFY_RE regex should compile")
});

/// `Therapist #N`, `#N`, a bare number, or `None`.
static IDENTIFY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\A(?:(?:therapist\s*)?#?\s*\d+|none)\z")
        .expect("IDENTIFY_VALUE_RE regex should compile")
});

fn tag_check(name: &str, re: &'static LazyLock<Regex>, reward: f64) -> Arc<dyn RewardScorer> {
    Arc::new(FnScorer::new(name, move |request: &ScoreRequest| {
        Ok(request
            .candidate_texts()
            .map(|text| if re.is_match(text) { reward } else { 0.0 })
            .collect())
    }))
}

/// True when `text` has an `<identify>` section naming a therapist or `None`.
pub fn identifies_choice(text: &str) -> bool {
    IDENTIFY_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .is_some_and(|value| IDENTIFY_VALUE_RE.is_match(value.as_str().trim()))
}

/// Scores stage-1 answers (candidates when building stage-2 prompts).
pub fn answer_format_scorer() -> CumulativeScorer {
    CumulativeScorer::new(
        "answer_format",
        vec![
            tag_check("think_tag", &THINK_RE, TAG_REWARD),
            tag_check("answer_tag", &ANSWER_RE, TAG_REWARD),
            tag_check("strict_layout", &STRICT_ANSWER_RE, TAG_REWARD),
        ],
    )
}

/// Scores stage-2 opinions (candidates when building stage-3 prompts).
pub fn critique_format_scorer() -> CumulativeScorer {
    let identify_value: Arc<dyn RewardScorer> =
        Arc::new(FnScorer::new("identify_value", |request: &ScoreRequest| {
            Ok(request
                .candidate_texts()
                .map(|text| {
                    if identifies_choice(text) {
                        IDENTIFY_VALUE_REWARD
                    } else {
                        0.0
                    }
                })
                .collect())
        }));

    CumulativeScorer::new(
        "critique_format",
        vec![
            tag_check("compare_tag", &COMPARE_RE, TAG_REWARD),
            tag_check("explain_tag", &EXPLAIN_RE, TAG_REWARD),
            tag_check("identify_tag", &IDENTIFY_RE, TAG_REWARD),
            identify_value,
        ],
    )
}

/// Built-in scorers for both selecting stages.
pub fn format_scorers() -> ScorerSet {
    ScorerSet::new(
        Arc::new(answer_format_scorer()),
        Arc::new(critique_format_scorer()),
    )
}
