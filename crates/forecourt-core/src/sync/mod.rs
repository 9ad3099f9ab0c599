//! Optimistic update synchronization.
//!
//! Writes are applied to local state immediately, queued as pending
//! operation records, and reconciled against the backend by a periodic
//! batch cycle. Failures retry with exponential backoff and roll back once
//! retries are exhausted.

mod apply;
mod engine;
mod events;
mod http;
mod local;
mod reconciler;
mod retry;
mod scheduler;

pub use apply::{ApplyError, LocalState, RemoteApply};
pub use engine::SyncEngine;
pub use events::SyncEvent;
pub use http::HttpRemoteApply;
pub use local::InMemoryLocalState;
pub use reconciler::CycleReport;
pub use retry::{backoff_delay, RetryDecision, BASE_BACKOFF_MS};
pub use scheduler::SchedulerHandle;
