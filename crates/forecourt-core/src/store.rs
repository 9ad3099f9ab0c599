//! In-memory operation record store
//!
//! Records are keyed by [`OperationId`] for O(1) lookups while a separate
//! index preserves insertion order, which is the order reconciliation
//! batches are built in.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{OperationId, OperationRecord, OperationState};

/// Snapshot of records taken at query time. Consumed once.
pub type StateSnapshot = std::vec::IntoIter<OperationRecord>;

/// Ordered, id-keyed collection of operation records.
#[derive(Debug, Default)]
pub struct OperationStore {
    records: HashMap<OperationId, OperationRecord>,
    order: Vec<OperationId>,
}

impl OperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record at the tail.
    pub fn append(&mut self, record: OperationRecord) -> Result<()> {
        if self.records.contains_key(&record.id) {
            return Err(Error::DuplicateOperation(record.id));
        }
        self.order.push(record.id);
        self.records.insert(record.id, record);
        Ok(())
    }

    pub fn get(&self, id: &OperationId) -> Option<&OperationRecord> {
        self.records.get(id)
    }

    /// Apply `mutator` to the record with `id`. Returns `None` if absent.
    pub fn update_by_id<R>(
        &mut self,
        id: &OperationId,
        mutator: impl FnOnce(&mut OperationRecord) -> R,
    ) -> Option<R> {
        self.records.get_mut(id).map(mutator)
    }

    /// Delete every record matching `predicate`, returning them in insertion order.
    pub fn remove_where(
        &mut self,
        mut predicate: impl FnMut(&OperationRecord) -> bool,
    ) -> Vec<OperationRecord> {
        let mut removed = Vec::new();
        let records = &mut self.records;
        self.order.retain(|id| {
            let matches = records.get(id).is_some_and(&mut predicate);
            if matches {
                if let Some(record) = records.remove(id) {
                    removed.push(record);
                }
            }
            !matches
        });
        removed
    }

    /// Records currently in `state`, in insertion order.
    pub fn filter_by_state(&self, state: OperationState) -> StateSnapshot {
        self.iter()
            .filter(|record| record.state == state)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
    }

    pub fn count_by_state(&self, state: OperationState) -> usize {
        self.records
            .values()
            .filter(|record| record.state == state)
            .count()
    }

    /// All records in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &OperationRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
