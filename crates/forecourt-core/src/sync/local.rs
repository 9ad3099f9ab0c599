//! In-memory local state cache keyed by resource and row.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;

use super::apply::LocalState;
use crate::models::{OperationKind, OperationRecord};

/// Optimistic view of every resource the engine has written to.
///
/// Create and Update upsert the payload under the record key; Delete removes
/// the row.
#[derive(Debug, Default)]
pub struct InMemoryLocalState {
    tables: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryLocalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows of `resource_id`, ordered by key.
    pub fn rows(&self, resource_id: &str) -> Vec<(String, Value)> {
        self.tables
            .read()
            .get(resource_id)
            .map(|table| {
                table
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn row(&self, resource_id: &str, key: &str) -> Option<Value> {
        self.tables.read().get(resource_id)?.get(key).cloned()
    }

    pub fn resources(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl LocalState for InMemoryLocalState {
    fn reconcile(&self, record: &OperationRecord) {
        let key = record.record_key.to_string();
        let mut tables = self.tables.write();
        match record.kind {
            OperationKind::Create | OperationKind::Update => {
                tables
                    .entry(record.resource_id.clone())
                    .or_default()
                    .insert(key, record.local_payload.clone());
            }
            OperationKind::Delete => {
                if let Some(table) = tables.get_mut(&record.resource_id) {
                    table.remove(&key);
                }
            }
        }
    }
}
