//! ID remapper — dense, sort-ranked agent numbering.
//!
//! Selected agent ids are opaque strings. For transcripts they are renumbered
//! `0..n` by ascending string order, so `#0` always names the smallest
//! surviving id, whichever physical agents survived selection.

use std::collections::BTreeMap;

use crate::codec::identify_columns;

/// Agent id → dense id, iterated in ascending dense-id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdAssignment {
    ids: BTreeMap<String, usize>,
}

impl IdAssignment {
    pub fn get(&self, agent_id: &str) -> Option<usize> {
        self.ids.get(agent_id).copied()
    }

    /// `(dense_id, agent_id)` pairs, dense id ascending.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        // BTreeMap order is ascending by agent id, which is dense-id order.
        self.ids.iter().map(|(agent, id)| (*id, agent.as_str()))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Assign dense ids to the agents behind `selected_columns`.
///
/// Columns without `prefix` are ignored. A pure function of the sorted set
/// of surviving ids: input order and duplicates do not matter.
pub fn remap<S: AsRef<str>>(selected_columns: &[S], prefix: &str) -> IdAssignment {
    let mut agent_ids = identify_columns(selected_columns.iter().map(|c| c.as_ref()), prefix);
    agent_ids.dedup();
    IdAssignment {
        ids: agent_ids
            .into_iter()
            .enumerate()
            .map(|(dense, agent)| (agent, dense))
            .collect(),
    }
}
