//! Record model — one training example at one round.
//!
//! A record is a field-name → value map. Text fields hold scalars
//! (`question`, `answer`, stage prompts and flattened agent columns), nested
//! fields hold agent-id → text maps (`agent_answers`, `agent_opinion`) and
//! `prompt` holds the system+user message pair.
//!
//! Fields are stored in a `BTreeMap` so serialized records have a canonical
//! field order. Nothing in selection relies on that order.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AggregationError, Result};

/// Client question.
pub const QUESTION: &str = "question";
/// Reference answer.
pub const ANSWER: &str = "answer";
/// System+user message pair consumed by the model.
pub const PROMPT: &str = "prompt";
/// User content assembled at stage 2, carried into stage 3.
pub const STAGE2_PROMPT: &str = "stage2_prompt";
/// User content assembled at stage 3.
pub const STAGE3_PROMPT: &str = "stage3_prompt";
/// Stage-1 answers, keyed by agent id.
pub const AGENT_ANSWERS: &str = "agent_answers";
/// Stage-2 opinions, keyed by agent id.
pub const AGENT_OPINION: &str = "agent_opinion";
/// Stage-3 synthesized answers, keyed by agent id.
pub const AGENT_SYNTHESIS: &str = "agent_synthesis";

/// Nested per-agent map.
pub type AgentMap = BTreeMap<String, String>;

/// Chat role of a prompt message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// One message of a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Value of a single record field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Scalar text.
    Text(String),
    /// System+user message pair.
    Messages(Vec<ChatMessage>),
    /// Agent id → text.
    Nested(AgentMap),
    /// Anything else (numbers, flags); passed through untouched.
    Other(serde_json::Value),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&AgentMap> {
        match self {
            Self::Nested(map) => Some(map),
            _ => None,
        }
    }
}

/// A single training example at one round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style text field insert.
    pub fn with_text(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_text(name, value);
        self
    }

    /// Builder-style nested field insert.
    pub fn with_nested<I, K, V>(mut self, name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self.set_nested(name, map);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Text value of `name`, if present and scalar.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    /// Text value of a structurally required field.
    pub fn require_text(&self, name: &str) -> Result<&str> {
        self.text(name).ok_or_else(|| AggregationError::MissingField {
            field: name.to_string(),
        })
    }

    pub fn nested(&self, name: &str) -> Option<&AgentMap> {
        self.fields.get(name).and_then(FieldValue::as_nested)
    }

    pub fn nested_mut(&mut self, name: &str) -> Option<&mut AgentMap> {
        match self.fields.get_mut(name) {
            Some(FieldValue::Nested(map)) => Some(map),
            _ => None,
        }
    }

    pub fn messages(&self, name: &str) -> Option<&[ChatMessage]> {
        match self.fields.get(name) {
            Some(FieldValue::Messages(messages)) => Some(messages),
            _ => None,
        }
    }

    pub fn set_text(&mut self, name: &str, value: impl Into<String>) {
        self.fields
            .insert(name.to_string(), FieldValue::Text(value.into()));
    }

    pub fn set_nested(&mut self, name: &str, map: AgentMap) {
        self.fields.insert(name.to_string(), FieldValue::Nested(map));
    }

    pub fn set_messages(&mut self, name: &str, messages: Vec<ChatMessage>) {
        self.fields
            .insert(name.to_string(), FieldValue::Messages(messages));
    }

    pub fn insert(&mut self, name: String, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(name, value)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// Field names in canonical (sorted) order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, FieldValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Record {
    type Item = (String, FieldValue);
    type IntoIter = std::collections::btree_map::IntoIter<String, FieldValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

/// Union of field names across a batch, in canonical order.
///
/// This is the "column set" of a flattened batch.
pub fn batch_columns(batch: &[Record]) -> Vec<String> {
    let mut names: Vec<String> = batch
        .iter()
        .flat_map(|r| r.field_names().map(str::to_string))
        .collect();
    names.sort();
    names.dedup();
    names
}
