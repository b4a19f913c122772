//! Definition Registry
//!
//! Per-definition metadata keyed by definition identity. The registry is
//! owned by a [`Runtime`](crate::Runtime); an entry exists exactly while at
//! least one lifecycle manager bound in that runtime refers to the
//! definition, and is removed when the last such manager is dropped.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;

use crate::resource::{DefinitionId, Discipline};

/// Snapshot of one registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DefinitionStats {
    /// Label given with `Definition::named`, or `"anonymous"`.
    pub label: String,
    /// Update discipline of the definition.
    pub discipline: Discipline,
    /// Lifecycle managers currently bound to the definition.
    pub live_managers: usize,
    /// Instances constructed so far across all of those managers.
    pub instances_created: u64,
    /// In-place updates performed so far.
    pub updates: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DefinitionRegistry {
    entries: DashMap<DefinitionId, DefinitionStats>,
}

impl DefinitionRegistry {
    pub(crate) fn acquire(&self, id: DefinitionId, label: &str, discipline: Discipline) {
        self.entries
            .entry(id)
            .or_insert_with(|| DefinitionStats {
                label: label.to_string(),
                discipline,
                live_managers: 0,
                instances_created: 0,
                updates: 0,
            })
            .live_managers += 1;
    }

    pub(crate) fn release(&self, id: DefinitionId) {
        if let Entry::Occupied(mut entry) = self.entries.entry(id) {
            let stats = entry.get_mut();
            stats.live_managers = stats.live_managers.saturating_sub(1);
            if stats.live_managers == 0 {
                entry.remove();
            }
        }
    }

    pub(crate) fn instance_created(&self, id: DefinitionId) {
        if let Some(mut stats) = self.entries.get_mut(&id) {
            stats.instances_created += 1;
        }
    }

    pub(crate) fn instance_updated(&self, id: DefinitionId) {
        if let Some(mut stats) = self.entries.get_mut(&id) {
            stats.updates += 1;
        }
    }

    pub(crate) fn get(&self, id: DefinitionId) -> Option<DefinitionStats> {
        self.entries.get(&id).map(|stats| stats.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
