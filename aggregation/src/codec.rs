//! Column codec — nested per-agent maps ↔ flat scalar columns.
//!
//! # Naming convention
//!
//! ```text
//! wide:  { "agent_answers": { "QmA": "...", "QmB": "..." } }
//! flat:  { "agent_answers_QmA": "...", "agent_answers_QmB": "..." }
//! ```
//!
//! A column is `{field}{SEPARATOR}{agent_id}`. Agent ids must be non-empty and
//! must not contain [`SEPARATOR`]; the codec rejects ids that do instead of
//! guessing where the field name ends.

use tracing::debug;

use crate::error::{CodecError, ConfigError};
use crate::record::{AgentMap, FieldValue, Record};
use crate::stage::Stage;

/// Separator between the nested field name and the agent id.
pub const SEPARATOR: char = '_';

/// Bidirectional codec for one nested field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnCodec {
    field: String,
    prefix: String,
}

impl ColumnCodec {
    pub fn new(field: &str) -> Self {
        Self {
            field: field.to_string(),
            prefix: format!("{field}{SEPARATOR}"),
        }
    }

    /// Codec for the nested field a stage selects from.
    pub fn for_stage(stage: Stage) -> Result<Self, ConfigError> {
        Ok(Self::new(stage.input_field()?))
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    /// Column prefix, `{field}_`.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn validate_agent_id(&self, agent_id: &str) -> Result<(), CodecError> {
        if agent_id.is_empty() {
            return Err(CodecError::EmptyAgentId {
                field: self.field.clone(),
            });
        }
        if agent_id.contains(SEPARATOR) {
            return Err(CodecError::SeparatorInAgentId {
                field: self.field.clone(),
                agent_id: agent_id.to_string(),
            });
        }
        Ok(())
    }

    pub fn column_name(&self, agent_id: &str) -> Result<String, CodecError> {
        self.validate_agent_id(agent_id)?;
        Ok(format!("{}{}", self.prefix, agent_id))
    }

    /// Agent id encoded in `column`, if it belongs to this field.
    pub fn agent_id_of<'a>(&self, column: &'a str) -> Option<&'a str> {
        column
            .strip_prefix(self.prefix.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn is_column(&self, column: &str) -> bool {
        self.agent_id_of(column).is_some()
    }

    /// Flatten this codec's nested field into scalar columns.
    ///
    /// Every other field passes through. A record without the nested field
    /// is returned unchanged, so flattening is idempotent.
    pub fn flatten(&self, record: &Record) -> Result<Record, CodecError> {
        let nested = match record.get(&self.field) {
            None => return Ok(record.clone()),
            Some(FieldValue::Nested(map)) => map,
            Some(_) => {
                return Err(CodecError::NotNested {
                    field: self.field.clone(),
                })
            }
        };

        let mut flat: Record = record
            .iter()
            .filter(|(name, _)| *name != self.field)
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect();

        for (agent_id, text) in nested {
            let column = self.column_name(agent_id)?;
            if flat.contains(&column) {
                return Err(CodecError::ColumnCollision { column });
            }
            flat.insert(column, FieldValue::Text(text.clone()));
        }

        debug!(field = %self.field, columns = nested.len(), "Flattened nested field");
        Ok(flat)
    }

    /// Gather this field's columns back into a nested map.
    ///
    /// Columns merge into an existing nested map of the same name.
    pub fn unflatten(&self, record: &Record) -> Record {
        let mut wide = Record::new();
        let mut gathered = AgentMap::new();

        for (name, value) in record.iter() {
            match (self.agent_id_of(name), value) {
                (Some(agent_id), FieldValue::Text(text)) => {
                    gathered.insert(agent_id.to_string(), text.clone());
                }
                _ => {
                    wide.insert(name.to_string(), value.clone());
                }
            }
        }

        if gathered.is_empty() {
            return wide;
        }

        match wide.nested_mut(&self.field) {
            Some(existing) => existing.extend(gathered),
            None => wide.set_nested(&self.field, gathered),
        }
        wide
    }

    /// Agent ids among `column_names`, sorted ascending.
    pub fn identify_columns<'a, I>(&self, column_names: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a str>,
    {
        identify_columns(column_names, &self.prefix)
    }
}

/// Strip `prefix` from every matching column name and return the agent ids
/// sorted ascending by string value.
///
/// This sort order is the canonical agent enumeration order.
pub fn identify_columns<'a, I>(column_names: I, prefix: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut agent_ids: Vec<String> = column_names
        .into_iter()
        .filter_map(|c| c.strip_prefix(prefix))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    agent_ids.sort();
    agent_ids
}

/// Flatten several nested fields in turn.
pub fn flatten_fields(record: &Record, fields: &[&str]) -> Result<Record, CodecError> {
    let mut flat = record.clone();
    for field in fields {
        flat = ColumnCodec::new(field).flatten(&flat)?;
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{AGENT_ANSWERS, AGENT_OPINION, QUESTION};

    fn wide() -> Record {
        Record::new()
            .with_text(QUESTION, "q")
            .with_nested(AGENT_ANSWERS, [("zeta", "T1"), ("alpha", "T2")])
    }

    #[test]
    fn test_flatten_writes_prefixed_columns() {
        let flat = ColumnCodec::new(AGENT_ANSWERS).flatten(&wide()).unwrap();
        assert_eq!(flat.text("agent_answers_zeta"), Some("T1"));
        assert_eq!(flat.text("agent_answers_alpha"), Some("T2"));
        assert_eq!(flat.text(QUESTION), Some("q"));
        assert!(!flat.contains(AGENT_ANSWERS));
    }

    #[test]
    fn test_flatten_is_idempotent_on_flat_input() {
        let codec = ColumnCodec::new(AGENT_ANSWERS);
        let once = codec.flatten(&wide()).unwrap();
        let twice = codec.flatten(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_identify_columns_roundtrip_sorted() {
        let codec = ColumnCodec::new(AGENT_ANSWERS);
        let flat = codec.flatten(&wide()).unwrap();
        let ids = codec.identify_columns(flat.field_names());
        assert_eq!(ids, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_identify_columns_ignores_other_prefixes() {
        let names = [
            "agent_opinion_b",
            "agent_answers_c",
            "question",
            "agent_opinion_a",
        ];
        assert_eq!(
            identify_columns(names, "agent_opinion_"),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_unflatten_inverts_flatten() {
        let codec = ColumnCodec::new(AGENT_ANSWERS);
        let flat = codec.flatten(&wide()).unwrap();
        assert_eq!(codec.unflatten(&flat), wide());
    }

    #[test]
    fn test_separator_in_agent_id_rejected() {
        let record = Record::new().with_nested(AGENT_ANSWERS, [("peer_1", "x")]);
        let err = ColumnCodec::new(AGENT_ANSWERS).flatten(&record).unwrap_err();
        assert!(matches!(err, CodecError::SeparatorInAgentId { .. }));
    }

    #[test]
    fn test_empty_agent_id_rejected() {
        let record = Record::new().with_nested(AGENT_ANSWERS, [("", "x")]);
        let err = ColumnCodec::new(AGENT_ANSWERS).flatten(&record).unwrap_err();
        assert!(matches!(err, CodecError::EmptyAgentId { .. }));
    }

    #[test]
    fn test_non_nested_field_rejected() {
        let record = Record::new().with_text(AGENT_ANSWERS, "oops");
        let err = ColumnCodec::new(AGENT_ANSWERS).flatten(&record).unwrap_err();
        assert_eq!(
            err,
            CodecError::NotNested {
                field: AGENT_ANSWERS.to_string()
            }
        );
    }

    #[test]
    fn test_column_collision_rejected() {
        let record = wide().with_text("agent_answers_alpha", "stale");
        let err = ColumnCodec::new(AGENT_ANSWERS).flatten(&record).unwrap_err();
        assert!(matches!(err, CodecError::ColumnCollision { .. }));
    }

    #[test]
    fn test_flatten_fields_handles_both_nested_fields() {
        let record = wide().with_nested(AGENT_OPINION, [("beta", "O1")]);
        let flat = flatten_fields(&record, &[AGENT_ANSWERS, AGENT_OPINION]).unwrap();
        assert_eq!(flat.text("agent_opinion_beta"), Some("O1"));
        assert_eq!(flat.text("agent_answers_alpha"), Some("T2"));
    }

    #[test]
    fn test_prefixes_do_not_overlap() {
        let answers = ColumnCodec::new(AGENT_ANSWERS);
        let opinions = ColumnCodec::new(AGENT_OPINION);
        assert!(!answers.is_column("agent_opinion_x"));
        assert!(!opinions.is_column("agent_answers_x"));
        assert_eq!(answers.agent_id_of("agent_answers_x"), Some("x"));
        assert_eq!(answers.agent_id_of("agent_answers_"), None);
    }
}
