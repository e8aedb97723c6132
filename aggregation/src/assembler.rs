//! Prompt assembler — render selected agent outputs as role-tagged blocks.
//!
//! Stage 2 layout:
//!
//! ```text
//! The client concern we received is: <question>
//!
//! The following therapeutic responses were provided:
//! <therapist>Therapist #0</therapist> said
//! <answer text>
//!
//!
//! <therapist>Therapist #1</therapist> said
//! ...
//! ```
//!
//! Stage 3 appends supervisor blocks to the stage-2 prompt, followed by the
//! headline snippet of every opinion wrapped in `<content>` tags.
//!
//! Callers pass an already-bounded selection; agents are emitted in dense-id
//! order, never in reward order.

use std::sync::LazyLock;

use regex::Regex;

use crate::codec::ColumnCodec;
use crate::error::Result;
use crate::record::{Record, AGENT_ANSWERS, AGENT_OPINION, QUESTION, STAGE2_PROMPT};
use crate::remap::remap;

/// Trailer after every agent block (two blank lines).
pub const BLOCK_SEPARATOR: &str = "\n\n\n";

/// Gap between the last supervisor block and the headline snippets.
const HEADLINE_GAP: &str = "\n\n\n\n\n";

const STAGE2_INTRO: &str = "The following therapeutic responses were provided: \n";

const STAGE3_TRANSITION: &str =
    "After comparing these therapeutic responses, the following supervision feedback was provided: \n";

/// Bold heading, then everything up to the next blank line.
static HEADLINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*([^\n]*?)\*\*\s*((?s:.*?))(?:\n\n|\z)")
        .expect("HEADLINE_RE regex should compile")
});

/// One agent block as rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedAgent {
    pub dense_id: usize,
    pub agent_id: String,
    pub text: String,
}

/// Assembled user content plus what went into it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub text: String,
    /// Rendered blocks, dense id ascending.
    pub agents: Vec<RenderedAgent>,
    /// Extracted headline snippets (stage 3 only), without tags.
    pub headlines: Vec<String>,
}

/// Text following the first `**heading**` up to the next blank line, trimmed.
pub fn extract_headline(text: &str) -> Option<String> {
    HEADLINE_RE
        .captures(text)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().trim().to_string())
}

/// Wrap a headline snippet in its delimiter tag.
pub fn headline_tag(content: &str) -> String {
    format!("<content>{content}</content>")
}

/// Collect the selected agents that are present in `record`, dense id ascending.
fn rendered_agents(
    record: &Record,
    selected: &[String],
    codec: &ColumnCodec,
) -> Vec<RenderedAgent> {
    remap(selected, codec.prefix())
        .iter()
        .filter_map(|(dense_id, agent_id)| {
            let column = format!("{}{}", codec.prefix(), agent_id);
            record.text(&column).map(|text| RenderedAgent {
                dense_id,
                agent_id: agent_id.to_string(),
                text: text.to_string(),
            })
        })
        .collect()
}

/// Build the stage-2 user content from selected `agent_answers` columns.
pub fn stage2_user_prompt(record: &Record, selected: &[String]) -> Result<AssembledPrompt> {
    let question = record.require_text(QUESTION)?;
    let codec = ColumnCodec::new(AGENT_ANSWERS);
    let agents = rendered_agents(record, selected, &codec);

    let mut text = String::new();
    text.push_str(&format!("The client concern we received is: {question}  \n\n"));
    text.push_str(STAGE2_INTRO);
    for agent in &agents {
        text.push_str(&format!(
            "<therapist>Therapist #{}</therapist> said \n",
            agent.dense_id
        ));
        text.push_str(&agent.text);
        text.push_str(BLOCK_SEPARATOR);
    }

    Ok(AssembledPrompt {
        text,
        agents,
        headlines: Vec::new(),
    })
}

/// Build the stage-3 user content from the stage-2 prompt and selected
/// `agent_opinion` columns.
pub fn stage3_user_prompt(record: &Record, selected: &[String]) -> Result<AssembledPrompt> {
    let stage2_prompt = record.require_text(STAGE2_PROMPT)?;
    let codec = ColumnCodec::new(AGENT_OPINION);
    let agents = rendered_agents(record, selected, &codec);

    let mut text = String::new();
    text.push_str(stage2_prompt);
    text.push_str("  \n");
    text.push_str(STAGE3_TRANSITION);

    let mut headlines = Vec::new();
    for agent in &agents {
        if let Some(headline) = extract_headline(&agent.text) {
            headlines.push(headline);
        }
        text.push_str(&format!(
            "<supervisor>Supervisor #{}</supervisor> provided \n",
            agent.dense_id
        ));
        text.push_str(&agent.text);
        text.push_str(BLOCK_SEPARATOR);
    }

    if !headlines.is_empty() {
        text.push_str(HEADLINE_GAP);
        for headline in &headlines {
            text.push_str(&headline_tag(headline));
            text.push('\n');
        }
    }

    Ok(AssembledPrompt {
        text,
        agents,
        headlines,
    })
}
