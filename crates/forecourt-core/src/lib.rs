//! forecourt-core - Core library for Forecourt
//!
//! This crate contains the optimistic update synchronization engine used by
//! the Forecourt operator interfaces (API, CLI): operation records, the
//! in-memory store, metrics, the sync scheduler, the batch reconciler, and the
//! retry/rollback controller.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod store;
pub mod sync;
pub mod util;

pub use config::SyncConfig;
pub use error::{Error, Result};
pub use metrics::SyncMetrics;
pub use models::{
    NewUpdate, OperationId, OperationKind, OperationRecord, OperationState, RecordKey,
};
pub use store::OperationStore;
pub use sync::{CycleReport, SyncEngine, SyncEvent};
