//! Gap filler — rectangularize a batch before flattening.
//!
//! Agents join and drop between rounds, so records in one batch can carry
//! different agent sets. For each nested field independently, the filler
//! computes the union of agent ids across the batch and inserts
//! [`SENTINEL`] for every id a record is missing. Afterwards all records have
//! identical key sets per field and flatten into the same column set.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::record::{AgentMap, Record, AGENT_ANSWERS, AGENT_OPINION};

/// Placeholder text for an agent that produced nothing for a record.
pub const SENTINEL: &str = "No answer received...";

/// Nested fields reconciled by default.
pub const FILLED_FIELDS: [&str; 2] = [AGENT_ANSWERS, AGENT_OPINION];

/// Per-field outcome of a gap-fill pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFill {
    /// Agent ids seen anywhere in the batch for this field.
    pub union_size: usize,
    /// Sentinels inserted across all records.
    pub sentinels_inserted: usize,
}

/// Outcome of a gap-fill pass, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapFillReport {
    pub fields: BTreeMap<String, FieldFill>,
}

impl GapFillReport {
    pub fn total_sentinels(&self) -> usize {
        self.fields.values().map(|f| f.sentinels_inserted).sum()
    }
}

/// Fill [`FILLED_FIELDS`] in place.
pub fn fill_missing_agents(batch: &mut [Record]) -> GapFillReport {
    fill_fields(batch, &FILLED_FIELDS)
}

/// Fill the given nested fields in place.
///
/// A record that lacks a field entirely receives a map of sentinels when the
/// batch union for that field is non-empty. Fields with an empty union are
/// left untouched.
pub fn fill_fields(batch: &mut [Record], fields: &[&str]) -> GapFillReport {
    let mut report = GapFillReport::default();

    for field in fields {
        let union: BTreeSet<String> = batch
            .iter()
            .filter_map(|r| r.nested(field))
            .flat_map(|map| map.keys().cloned())
            .collect();

        let mut fill = FieldFill {
            union_size: union.len(),
            sentinels_inserted: 0,
        };

        if !union.is_empty() {
            for record in batch.iter_mut() {
                if !record.contains(field) {
                    record.set_nested(field, AgentMap::new());
                }
                let Some(map) = record.nested_mut(field) else {
                    continue;
                };
                for agent_id in &union {
                    if !map.contains_key(agent_id) {
                        map.insert(agent_id.clone(), SENTINEL.to_string());
                        fill.sentinels_inserted += 1;
                    }
                }
            }
        }

        debug!(
            field = %field,
            union = fill.union_size,
            sentinels = fill.sentinels_inserted,
            "Gap-filled nested field"
        );
        report.fields.insert(field.to_string(), fill);
    }

    report
}
