//! File-to-file stage execution.

use std::path::Path;
use std::sync::Arc;

use aggregation::samples::default_questions;
use aggregation::{Stage, StagePipeline};
use anyhow::{Context, Result};
use tracing::info;

use crate::batch_io::{read_batch, write_batch};
use crate::config::StagesConfig;
use crate::scorers::format_scorers;
use crate::transcript_file::JsonlTranscript;

/// Pipeline with built-in format scorers, persona and optional transcript.
pub fn build_pipeline(config: &StagesConfig) -> Result<StagePipeline> {
    let mut pipeline = StagePipeline::new(config.pipeline_config(), format_scorers())
        .context("Invalid stage configuration")?
        .with_persona(config.persona_selector());

    if let Some(path) = &config.transcript_path {
        let sink = JsonlTranscript::with_random_id(path);
        info!(path = %path.display(), run_id = %sink.run_id(), "Recording transcript");
        pipeline = pipeline.with_sink(Arc::new(sink));
    }
    Ok(pipeline)
}

/// Build `stage` prompts from `input` into `output`.
///
/// Stage 1 without an input file uses the built-in questions.
pub async fn run_stage(
    config: &StagesConfig,
    stage: Stage,
    input: Option<&Path>,
    output: &Path,
) -> Result<usize> {
    let pipeline = build_pipeline(config)?;
    let batch = match (stage, input) {
        (_, Some(path)) => read_batch(path)?,
        (Stage::Answer, None) => default_questions(),
        (_, None) => anyhow::bail!("stage {stage} requires an input batch"),
    };

    let out = pipeline
        .build(stage, batch)
        .await
        .context(format!("Stage {stage} failed"))?;
    write_batch(output, &out)?;
    Ok(out.len())
}

/// Report the final responses in a stage-3 output batch to the transcript.
pub fn report_responses(config: &StagesConfig, input: &Path) -> Result<usize> {
    let pipeline = build_pipeline(config)?;
    let batch = read_batch(input)?;
    Ok(pipeline.collect_responses(&batch))
}
