//! Stage pipeline — builds each stage's prompts from the previous stage's batch.
//!
//! Entry procedure for stages 2 and 3:
//! 1. gap-fill the nested fields the prompt depends on (batch-wide reduction),
//! 2. flatten them into columns,
//! 3. per record: Selector → Remapper → Assembler,
//! 4. prepend the stage preamble (with optional persona line).
//!
//! Step 1 completes before any record is flattened; after that records are
//! independent and may be processed concurrently without changing results.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::state::{PipelinePhase, RunState};
use crate::assembler::{
    extract_headline, stage2_user_prompt, stage3_user_prompt, AssembledPrompt,
};
use crate::codec::flatten_fields;
use crate::error::{AggregationError, ConfigError, Result};
use crate::gap_fill::fill_fields;
use crate::persona::PersonaSelector;
use crate::prompts::{system_prompt, PROMPT_VERSION};
use crate::record::{
    batch_columns, ChatMessage, Record, AGENT_SYNTHESIS, ANSWER, PROMPT, QUESTION,
    STAGE2_PROMPT, STAGE3_PROMPT,
};
use crate::reward::ScorerSet;
use crate::samples::extract_hash_answer;
use crate::selector::{SelectionConfig, Selector};
use crate::stage::Stage;
use crate::transcript::{ArtifactOrigin, NullSink, TranscriptSink};

/// Pipeline settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub selection: SelectionConfig,
    /// Records assembled concurrently within a stage. 1 = sequential.
    pub max_concurrent_records: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            max_concurrent_records: 1,
        }
    }
}

/// Builds stage prompts. Stateless between calls; see [`PipelineRun`] for
/// ordered multi-stage runs.
pub struct StagePipeline {
    config: PipelineConfig,
    scorers: ScorerSet,
    persona: PersonaSelector,
    sink: Arc<dyn TranscriptSink>,
}

impl StagePipeline {
    /// Validates the configuration up front.
    pub fn new(
        config: PipelineConfig,
        scorers: ScorerSet,
    ) -> std::result::Result<Self, ConfigError> {
        config.selection.validate()?;
        Ok(Self {
            config,
            scorers,
            persona: PersonaSelector::default(),
            sink: Arc::new(NullSink),
        })
    }

    pub fn with_persona(mut self, persona: PersonaSelector) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn TranscriptSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build the prompts for `stage` from its input batch.
    pub async fn build(&self, stage: Stage, batch: Vec<Record>) -> Result<Vec<Record>> {
        match stage {
            Stage::Answer => self.build_stage1(batch),
            Stage::Critique | Stage::Synthesis => self.build_selected(stage, batch).await,
        }
    }

    /// Stage 1: `prompt` from `question`, `answer` parsed from the raw
    /// `#### <answer>` reference.
    pub fn build_stage1(&self, batch: Vec<Record>) -> Result<Vec<Record>> {
        let system = self.persona.system_prompt(system_prompt(Stage::Answer));
        let records = batch.len();

        let out = batch
            .into_iter()
            .enumerate()
            .map(|(index, record)| {
                stage1_record(record, &system).map_err(|e| e.at_record(index))
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            stage = 1,
            records,
            prompt_version = PROMPT_VERSION,
            "Built stage prompts"
        );
        Ok(out)
    }

    /// Stage 2 from stage-1 answers.
    pub async fn build_stage2(&self, batch: Vec<Record>) -> Result<Vec<Record>> {
        self.build_selected(Stage::Critique, batch).await
    }

    /// Stage 3 from stage-2 opinions and the carried stage-2 prompt.
    pub async fn build_stage3(&self, batch: Vec<Record>) -> Result<Vec<Record>> {
        self.build_selected(Stage::Synthesis, batch).await
    }

    async fn build_selected(&self, stage: Stage, mut batch: Vec<Record>) -> Result<Vec<Record>> {
        let selector = Selector::new(&self.config.selection, &self.scorers)?;
        let fields = stage.filled_fields();

        let report = fill_fields(&mut batch, fields);
        if report.total_sentinels() > 0 {
            warn!(
                stage = %stage,
                sentinels = report.total_sentinels(),
                "Agents missing from some records, filled with sentinel"
            );
        }

        let flat = batch
            .iter()
            .enumerate()
            .map(|(index, record)| {
                flatten_fields(record, fields)
                    .map_err(|e| AggregationError::from(e).at_record(index))
            })
            .collect::<Result<Vec<_>>>()?;
        let columns = batch_columns(&flat);
        let records = flat.len();

        let system = self.persona.system_prompt(system_prompt(stage));
        let selector = &selector;
        let columns = &columns;
        let system = system.as_str();

        let out: Vec<Record> = stream::iter(flat.into_iter().enumerate())
            .map(move |(index, record)| async move {
                self.assemble_record(selector, columns, stage, system, index, record)
                    .await
                    .map_err(|e| e.at_record(index))
            })
            .buffered(self.config.max_concurrent_records.max(1))
            .try_collect()
            .await?;

        info!(
            stage = %stage,
            records,
            columns = columns.len(),
            k = self.config.selection.k,
            method = %self.config.selection.method,
            prompt_version = PROMPT_VERSION,
            "Built stage prompts"
        );
        Ok(out)
    }

    async fn assemble_record(
        &self,
        selector: &Selector<'_>,
        columns: &[String],
        stage: Stage,
        system: &str,
        index: usize,
        mut record: Record,
    ) -> Result<Record> {
        record.require_text(ANSWER)?;

        let selected = selector.select(columns, &record, stage, index).await?;
        let (assembled, prompt_field) = match stage {
            Stage::Critique => (stage2_user_prompt(&record, &selected)?, STAGE2_PROMPT),
            Stage::Synthesis => (stage3_user_prompt(&record, &selected)?, STAGE3_PROMPT),
            Stage::Answer => return Err(ConfigError::NoSelectableColumns(stage).into()),
        };
        debug!(
            stage = %stage,
            record = index,
            selected = selected.len(),
            rendered = assembled.agents.len(),
            "Assembled record prompt"
        );

        self.record_transcript(stage, index, &assembled);

        record.set_text(prompt_field, assembled.text.clone());
        record.set_messages(
            PROMPT,
            vec![ChatMessage::system(system), ChatMessage::user(assembled.text)],
        );
        Ok(record)
    }

    fn record_transcript(&self, stage: Stage, record_index: usize, assembled: &AssembledPrompt) {
        for agent in &assembled.agents {
            let origin = ArtifactOrigin {
                stage,
                record_index,
                agent_id: agent.agent_id.clone(),
                dense_id: Some(agent.dense_id),
            };
            match stage {
                Stage::Critique => self.sink.therapist_answer(origin, &agent.text),
                Stage::Synthesis => {
                    self.sink.supervisor_opinion(origin.clone(), &agent.text);
                    if let Some(headline) = extract_headline(&agent.text) {
                        self.sink.supervisor_headline(origin, &headline);
                    }
                }
                Stage::Answer => {}
            }
        }
    }

    /// Report the final stage-3 responses (`agent_synthesis`) to the sink.
    ///
    /// Returns the number of responses recorded.
    pub fn collect_responses(&self, batch: &[Record]) -> usize {
        let mut recorded = 0;
        for (record_index, record) in batch.iter().enumerate() {
            let Some(responses) = record.nested(AGENT_SYNTHESIS) else {
                continue;
            };
            for (agent_id, text) in responses {
                self.sink.model_response(
                    ArtifactOrigin {
                        stage: Stage::Synthesis,
                        record_index,
                        agent_id: agent_id.clone(),
                        dense_id: None,
                    },
                    text,
                );
                recorded += 1;
            }
        }
        info!(responses = recorded, "Collected final responses");
        recorded
    }
}

fn stage1_record(mut record: Record, system: &str) -> Result<Record> {
    let question = record.require_text(QUESTION)?.to_string();
    let answer = extract_hash_answer(record.require_text(ANSWER)?)
        .ok_or_else(|| AggregationError::MissingField {
            field: ANSWER.to_string(),
        })?
        .to_string();
    record.set_text(ANSWER, answer);
    record.set_messages(
        PROMPT,
        vec![ChatMessage::system(system), ChatMessage::user(question)],
    );
    Ok(record)
}

/// One ordered pass through the three stages.
///
/// Each call checks the phase transition before doing any work. Any failure
/// moves the run to `Failed`.
pub struct PipelineRun<'p> {
    pipeline: &'p StagePipeline,
    state: RunState,
}

impl<'p> PipelineRun<'p> {
    pub fn new(pipeline: &'p StagePipeline, id: &str) -> Self {
        Self {
            pipeline,
            state: RunState::new(id),
        }
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn phase(&self) -> PipelinePhase {
        self.state.phase
    }

    pub async fn stage1(&mut self, batch: Vec<Record>) -> Result<Vec<Record>> {
        self.enter(Stage::Answer, batch).await
    }

    pub async fn stage2(&mut self, batch: Vec<Record>) -> Result<Vec<Record>> {
        self.enter(Stage::Critique, batch).await
    }

    pub async fn stage3(&mut self, batch: Vec<Record>) -> Result<Vec<Record>> {
        self.enter(Stage::Synthesis, batch).await
    }

    /// Terminal step: record the final responses and close the run.
    pub fn complete(&mut self, batch: &[Record]) -> Result<usize> {
        if let Err(e) = self.state.transition(PipelinePhase::Complete, batch.len()) {
            self.state.fail();
            return Err(e.into());
        }
        Ok(self.pipeline.collect_responses(batch))
    }

    async fn enter(&mut self, stage: Stage, batch: Vec<Record>) -> Result<Vec<Record>> {
        if let Err(e) = self
            .state
            .transition(PipelinePhase::for_stage(stage), batch.len())
        {
            self.state.fail();
            return Err(e.into());
        }
        match self.pipeline.build(stage, batch).await {
            Ok(out) => Ok(out),
            Err(e) => {
                warn!(run = %self.state.id, stage = %stage, error = %e, "Stage failed");
                self.state.fail();
                Err(e)
            }
        }
    }
}
