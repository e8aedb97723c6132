//! Pipeline integration tests — full rounds through stages 1 → 2 → 3 with
//! scripted reward scorers and an in-memory transcript.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use aggregation::gap_fill::SENTINEL;
use aggregation::record::{
    AGENT_ANSWERS, AGENT_OPINION, AGENT_SYNTHESIS, ANSWER, PROMPT, QUESTION, STAGE2_PROMPT,
    STAGE3_PROMPT,
};
use aggregation::samples::default_questions;
use aggregation::{
    AggregationError, ArtifactKind, FnScorer, MemorySink, PipelineConfig, PipelinePhase,
    PipelineRun, Record, RewardScorer, Role, ScoreError, ScoreRequest, ScorerSet,
    SelectionConfig, SelectionMethod, Stage, StagePipeline,
};

/// Scores candidates by a fixed text → reward table; unknown text scores 0.
fn table_scorer(table: &'static [(&'static str, f64)]) -> ScorerSet {
    ScorerSet::shared(Arc::new(FnScorer::new("table", move |r: &ScoreRequest| {
        Ok(r.candidate_texts()
            .map(|t| {
                table
                    .iter()
                    .find(|(text, _)| *text == t)
                    .map(|(_, reward)| *reward)
                    .unwrap_or(0.0)
            })
            .collect())
    })))
}

fn config(k: usize) -> PipelineConfig {
    PipelineConfig {
        selection: SelectionConfig {
            k,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn stage2_input(answers: &[(&str, &str)]) -> Record {
    Record::new()
        .with_text(QUESTION, "Q")
        .with_text(ANSWER, "A")
        .with_nested(AGENT_ANSWERS, answers.iter().copied())
}

/// Scorer that never answers within any reasonable timeout.
struct StalledScorer;

#[async_trait]
impl RewardScorer for StalledScorer {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn score(&self, request: &ScoreRequest) -> Result<Vec<f64>, ScoreError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(vec![0.0; request.len()])
    }
}

// ── Stage 2 assembly ───────────────────────────────────────────────

#[tokio::test]
async fn test_stage2_renumbers_by_agent_id_not_reward() {
    // Default k = 15, so both answers survive
    let pipeline = StagePipeline::new(
        PipelineConfig::default(),
        table_scorer(&[("T1", 0.2), ("T2", 0.9)]),
    )
    .unwrap();
    assert_eq!(pipeline.config().selection.k, 15);
    let out = pipeline
        .build_stage2(vec![stage2_input(&[("z", "T1"), ("a", "T2")])])
        .await
        .unwrap();

    let expected = "The client concern we received is: Q  \n\n\
        The following therapeutic responses were provided: \n\
        <therapist>Therapist #0</therapist> said \nT2\n\n\n\
        <therapist>Therapist #1</therapist> said \nT1\n\n\n";
    assert_eq!(out[0].text(STAGE2_PROMPT), Some(expected));

    let prompt = out[0].messages(PROMPT).unwrap();
    assert_eq!(prompt[0].role, Role::System);
    assert_eq!(prompt[1].role, Role::User);
    assert_eq!(prompt[1].content, expected);
}

#[tokio::test]
async fn test_stage2_top_k_drops_lowest_reward() {
    let pipeline =
        StagePipeline::new(config(1), table_scorer(&[("T1", 0.2), ("T2", 0.9)])).unwrap();
    let out = pipeline
        .build_stage2(vec![stage2_input(&[("z", "T1"), ("a", "T2")])])
        .await
        .unwrap();

    let text = out[0].text(STAGE2_PROMPT).unwrap();
    assert!(text.contains("<therapist>Therapist #0</therapist> said \nT2"));
    assert!(!text.contains("T1"));
    assert!(!text.contains("Therapist #1"));
}

#[tokio::test]
async fn test_stage2_missing_agent_gets_sentinel() {
    let pipeline = StagePipeline::new(config(5), table_scorer(&[])).unwrap();
    let out = pipeline
        .build_stage2(vec![
            stage2_input(&[("p", "x")]),
            stage2_input(&[("p", "y"), ("q", "z")]),
        ])
        .await
        .unwrap();

    assert_eq!(out[0].text("agent_answers_q"), Some(SENTINEL));
    let text = out[0].text(STAGE2_PROMPT).unwrap();
    assert!(text.contains(&format!("Therapist #1</therapist> said \n{SENTINEL}")));
}

#[tokio::test]
async fn test_stage2_without_agents_renders_header_only() {
    let pipeline = StagePipeline::new(config(3), table_scorer(&[])).unwrap();
    let out = pipeline
        .build_stage2(vec![Record::new()
            .with_text(QUESTION, "Q")
            .with_text(ANSWER, "A")])
        .await
        .unwrap();

    assert_eq!(
        out[0].text(STAGE2_PROMPT),
        Some("The client concern we received is: Q  \n\nThe following therapeutic responses were provided: \n")
    );
}

#[tokio::test]
async fn test_stage2_record_without_answer_is_fatal() {
    let pipeline = StagePipeline::new(config(3), table_scorer(&[])).unwrap();
    let err = pipeline
        .build_stage2(vec![Record::new()
            .with_text(QUESTION, "Q")
            .with_nested(AGENT_ANSWERS, [("a", "x")])])
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        AggregationError::MissingField { field } if field == ANSWER
    ));
}

// ── Stage 3 assembly ───────────────────────────────────────────────

#[tokio::test]
async fn test_stage3_carries_stage2_prompt_and_headlines() {
    let pipeline = StagePipeline::new(config(5), table_scorer(&[])).unwrap();
    let stage2 = pipeline
        .build_stage2(vec![stage2_input(&[("a", "T2"), ("z", "T1")])])
        .await
        .unwrap();
    let stage2_text = stage2[0].text(STAGE2_PROMPT).unwrap().to_string();

    let input: Vec<Record> = stage2
        .into_iter()
        .map(|r| {
            r.with_nested(
                AGENT_OPINION,
                [
                    ("m", "**Best response:** Therapist #1\n\nIt validates feelings."),
                    ("k", "Both are fine."),
                ],
            )
        })
        .collect();
    let out = pipeline.build_stage3(input).await.unwrap();

    let expected = format!(
        "{stage2_text}  \n\
         After comparing these therapeutic responses, the following supervision feedback was provided: \n\
         <supervisor>Supervisor #0</supervisor> provided \nBoth are fine.\n\n\n\
         <supervisor>Supervisor #1</supervisor> provided \n**Best response:** Therapist #1\n\nIt validates feelings.\n\n\n\
         \n\n\n\n\n<content>Therapist #1</content>\n"
    );
    assert_eq!(out[0].text(STAGE3_PROMPT), Some(expected.as_str()));
    assert_eq!(out[0].messages(PROMPT).unwrap()[1].content, expected);
}

#[tokio::test]
async fn test_stage3_without_stage2_prompt_is_fatal() {
    let pipeline = StagePipeline::new(config(5), table_scorer(&[])).unwrap();
    let err = pipeline
        .build_stage3(vec![Record::new()
            .with_text(QUESTION, "Q")
            .with_text(ANSWER, "A")
            .with_nested(AGENT_OPINION, [("m", "fine")])])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AggregationError::Record { index: 0, .. }
    ));
    assert!(matches!(
        err.root(),
        AggregationError::MissingField { field } if field == STAGE2_PROMPT
    ));
}

// ── Full round ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_full_round_with_transcript() {
    let sink = Arc::new(MemorySink::new());
    let pipeline = StagePipeline::new(config(2), table_scorer(&[("good", 1.0), ("meh", 0.5)]))
        .unwrap()
        .with_sink(sink.clone());
    let mut run = PipelineRun::new(&pipeline, "round-0");

    let stage1 = run.stage1(default_questions()).await.unwrap();
    assert_eq!(stage1.len(), 10);
    assert_eq!(stage1[0].text(ANSWER), Some("This is a mental health question"));

    let answered: Vec<Record> = stage1
        .into_iter()
        .map(|r| r.with_nested(AGENT_ANSWERS, [("a1", "good"), ("a2", "meh"), ("a3", "bad")]))
        .collect();
    let stage2 = run.stage2(answered).await.unwrap();
    assert_eq!(run.phase(), PipelinePhase::Stage2);

    let opined: Vec<Record> = stage2
        .into_iter()
        .map(|r| r.with_nested(AGENT_OPINION, [("a1", "**Pick:** Therapist #0"), ("a2", "good")]))
        .collect();
    let stage3 = run.stage3(opined).await.unwrap();

    let finished: Vec<Record> = stage3
        .into_iter()
        .map(|r| r.with_nested(AGENT_SYNTHESIS, [("a1", "final")]))
        .collect();
    let responses = run.complete(&finished).unwrap();

    assert_eq!(responses, 10);
    assert_eq!(run.phase(), PipelinePhase::Complete);
    assert_eq!(run.state().transitions.len(), 4);

    // k = 2 of 3 answers and both opinions, per record
    assert_eq!(sink.entries_of(ArtifactKind::TherapistAnswer).len(), 20);
    assert_eq!(sink.entries_of(ArtifactKind::SupervisorOpinion).len(), 20);
    assert_eq!(sink.entries_of(ArtifactKind::SupervisorHeadline).len(), 10);
    assert_eq!(sink.entries_of(ArtifactKind::ModelResponse).len(), 10);
    assert!(sink
        .entries_of(ArtifactKind::TherapistAnswer)
        .iter()
        .all(|e| e.origin.stage == Stage::Critique && e.content != "bad"));
}

#[tokio::test]
async fn test_run_rejects_repeated_stage() {
    let pipeline = StagePipeline::new(config(2), table_scorer(&[])).unwrap();
    let mut run = PipelineRun::new(&pipeline, "round-1");

    run.stage1(default_questions()).await.unwrap();
    let err = run.stage1(default_questions()).await.unwrap_err();

    assert!(matches!(err, AggregationError::Transition(_)));
    assert_eq!(run.phase(), PipelinePhase::Failed);
}

// ── Scorer failures ────────────────────────────────────────────────

#[tokio::test]
async fn test_scorer_length_mismatch_fails_run() {
    let scorers = ScorerSet::shared(Arc::new(FnScorer::new("short", |_: &ScoreRequest| {
        Ok(vec![1.0])
    })));
    let pipeline = StagePipeline::new(config(2), scorers).unwrap();
    let mut run = PipelineRun::new(&pipeline, "round-2");

    let stage1 = run.stage1(default_questions()).await.unwrap();
    let answered: Vec<Record> = stage1
        .into_iter()
        .map(|r| r.with_nested(AGENT_ANSWERS, [("a", "x"), ("b", "y"), ("c", "z")]))
        .collect();
    let err = run.stage2(answered).await.unwrap_err();

    assert!(matches!(
        err.root(),
        AggregationError::Score(ScoreError::LengthMismatch { expected: 3, got: 1 })
    ));
    assert_eq!(run.phase(), PipelinePhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_scorer_times_out() {
    let mut config = config(1);
    config.selection.scorer_timeout_secs = 5;
    let pipeline = StagePipeline::new(config, ScorerSet::shared(Arc::new(StalledScorer))).unwrap();

    let err = pipeline
        .build_stage2(vec![stage2_input(&[("a", "x"), ("b", "y")])])
        .await
        .unwrap_err();

    assert!(matches!(
        err.root(),
        AggregationError::Score(ScoreError::Timeout(d)) if *d == Duration::from_secs(5)
    ));
}

#[tokio::test]
async fn test_uniform_random_never_calls_scorer() {
    let pipeline = StagePipeline::new(
        PipelineConfig {
            selection: SelectionConfig {
                k: 1,
                method: SelectionMethod::UniformRandom,
                seed: Some(7),
                ..Default::default()
            },
            ..Default::default()
        },
        ScorerSet::shared(Arc::new(StalledScorer)),
    )
    .unwrap();

    let out = pipeline
        .build_stage2(vec![stage2_input(&[("a", "x"), ("b", "y")])])
        .await
        .unwrap();
    let text = out[0].text(STAGE2_PROMPT).unwrap();
    assert!(text.contains("Therapist #0"));
    assert!(!text.contains("Therapist #1"));
}
