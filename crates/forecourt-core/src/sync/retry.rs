//! Retry/rollback controller.
//!
//! A failed attempt is re-queued after `2^N` seconds (N = the retry number
//! it will become) while retries remain; otherwise the record rolls back,
//! restoring its prior payload in local state when one was captured.

use std::time::Duration;

use super::engine::SyncEngine;
use super::events::SyncEvent;
use crate::models::{OperationId, OperationRecord, OperationState};
use crate::util::unix_millis_now;

pub const BASE_BACKOFF_MS: u64 = 1_000;

/// Delay before the `retry_number`-th retry: `2^retry_number * 1000` ms.
pub fn backoff_delay(retry_number: u32) -> Duration {
    let factor = 1_u64.checked_shl(retry_number).unwrap_or(u64::MAX);
    Duration::from_millis(BASE_BACKOFF_MS.saturating_mul(factor))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return to pending after `delay` as retry number `retry_number`.
    Requeue { delay: Duration, retry_number: u32 },
    /// Retries exhausted.
    RollBack,
}

impl RetryDecision {
    pub fn evaluate(retry_count: u32, max_retries: u32) -> Self {
        let retry_number = retry_count.saturating_add(1);
        if retry_number <= max_retries {
            Self::Requeue {
                delay: backoff_delay(retry_number),
                retry_number,
            }
        } else {
            Self::RollBack
        }
    }
}

enum BackoffExpiry {
    Requeued(u32),
    RolledBack(OperationRecord),
}

impl SyncEngine {
    /// Re-queue `id` once `delay` elapses. Replaces any earlier timer for it.
    pub(crate) fn schedule_requeue(&self, id: OperationId, delay: Duration) {
        let weak = self.downgrade();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(engine) = SyncEngine::upgrade(&weak) {
                engine.inner.requeues.lock().remove(&id);
                engine.requeue(id);
            }
        });
        if let Some(previous) = self.inner.requeues.lock().insert(id, handle) {
            previous.abort();
        }
    }

    /// Backoff expiry: `Failed -> Pending`, one more retry consumed. When the
    /// budget was lowered while the record waited, it rolls back instead.
    pub(crate) fn requeue(&self, id: OperationId) {
        let now = unix_millis_now();
        let max_retries = self.inner.config.read().max_retries;
        let expired = self.inner.store.lock().update_by_id(&id, |record| {
            if record.state != OperationState::Failed {
                return None;
            }
            if record.retry_count.saturating_add(1) > max_retries {
                record.transition(OperationState::RolledBack, now).ok()?;
                return Some(BackoffExpiry::RolledBack(record.clone()));
            }
            record.transition(OperationState::Pending, now).ok()?;
            record.retry_count += 1;
            Some(BackoffExpiry::Requeued(record.retry_count))
        });

        match expired.flatten() {
            Some(BackoffExpiry::Requeued(retry_count)) => {
                tracing::debug!(id = %id, retry_count, "Re-queued operation after backoff");
                self.inner.events.emit(SyncEvent::StateChanged {
                    id,
                    from: OperationState::Failed,
                    to: OperationState::Pending,
                });
            }
            Some(BackoffExpiry::RolledBack(record)) => {
                tracing::warn!(
                    id = %id,
                    retries = record.retry_count,
                    max_retries,
                    "Retry budget lowered below pending retry"
                );
                self.inner.events.emit(SyncEvent::StateChanged {
                    id,
                    from: OperationState::Failed,
                    to: OperationState::RolledBack,
                });
                self.complete_rollback(&record);
                self.refresh_metrics();
            }
            None => {
                tracing::debug!(id = %id, "Backoff expired for operation no longer failed");
            }
        }
    }

    /// Roll back every failed record whose next retry no longer fits in
    /// `max_retries`, without waiting for its backoff.
    pub(crate) fn enforce_retry_budget(&self, max_retries: u32) {
        let over_budget: Vec<OperationId> = self
            .inner
            .store
            .lock()
            .filter_by_state(OperationState::Failed)
            .filter(|record| record.retry_count.saturating_add(1) > max_retries)
            .map(|record| record.id)
            .collect();
        for id in over_budget {
            self.cancel_requeue(&id);
            self.requeue(id);
        }
    }

    pub(crate) fn cancel_requeue(&self, id: &OperationId) {
        if let Some(handle) = self.inner.requeues.lock().remove(id) {
            handle.abort();
        }
    }

    pub(crate) fn cancel_all_requeues(&self) {
        for (_, handle) in self.inner.requeues.lock().drain() {
            handle.abort();
        }
    }

    /// Finish a rollback already recorded in the store: undo the local write
    /// when a prior payload exists and notify observers.
    pub(crate) fn complete_rollback(&self, record: &OperationRecord) -> bool {
        self.cancel_requeue(&record.id);
        let corrective = record.corrective_update();
        let corrective_applied = corrective.is_some();

        if let Some(corrective) = corrective {
            self.inner.local.reconcile(&corrective);
            tracing::warn!(
                id = %record.id,
                resource = %record.resource_id,
                key = %record.record_key,
                "Rolled back operation and restored prior payload"
            );
        } else {
            tracing::warn!(
                id = %record.id,
                resource = %record.resource_id,
                key = %record.record_key,
                kind = %record.kind,
                "Rolled back operation without prior payload; local state left unchanged"
            );
        }

        self.inner.events.emit(SyncEvent::RolledBack {
            id: record.id,
            corrective_applied,
        });
        corrective_applied
    }
}
