//! Batch reconciler: one pass over the pending records per scheduler tick.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::apply::RemoteApply;
use super::engine::SyncEngine;
use super::events::SyncEvent;
use super::retry::RetryDecision;
use crate::models::{OperationId, OperationRecord, OperationState};
use crate::util::{duration_millis, unix_millis_now};

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Pending records snapshotted at cycle start
    pub dispatched: usize,
    pub batches: usize,
    pub confirmed: usize,
    /// Failed attempts, whether re-queued or rolled back
    pub failed: usize,
    pub requeued: usize,
    pub rolled_back: usize,
    /// Results dropped because the record changed while in flight
    pub discarded: usize,
    pub duration_ms: u64,
}

/// Clears the reentrancy flag and publishes metrics when the cycle ends,
/// including when it unwinds.
struct CycleGuard<'a> {
    engine: &'a SyncEngine,
    flag: &'a AtomicBool,
    touched_store: bool,
}

impl<'a> CycleGuard<'a> {
    fn acquire(engine: &'a SyncEngine) -> Option<Self> {
        let flag = &engine.inner.cycle_running;
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(Self {
            engine,
            flag,
            touched_store: false,
        })
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        if self.touched_store {
            self.engine.refresh_metrics();
        }
    }
}

type AttemptResult = (OperationId, Result<(), String>, u64);

impl SyncEngine {
    /// Run one reconciliation cycle now.
    ///
    /// Returns `None` when another cycle is still in flight; the call is
    /// skipped rather than queued.
    pub async fn run_cycle(&self) -> Option<CycleReport> {
        let Some(mut guard) = CycleGuard::acquire(self) else {
            tracing::debug!("Reconciliation cycle already in flight; skipping tick");
            return None;
        };

        let started = Instant::now();
        let pending: Vec<OperationRecord> = self
            .inner
            .store
            .lock()
            .filter_by_state(OperationState::Pending)
            .collect();
        if pending.is_empty() {
            return Some(CycleReport::default());
        }
        guard.touched_store = true;

        let (batch_size, apply_timeout) = {
            let config = self.inner.config.read();
            (config.batch_size.max(1), config.apply_timeout)
        };

        let mut report = CycleReport {
            dispatched: pending.len(),
            ..CycleReport::default()
        };

        for batch in pending.chunks(batch_size) {
            report.batches += 1;
            let attempts = batch.iter().map(|record| {
                attempt(
                    Arc::clone(&self.inner.remote),
                    record.clone(),
                    apply_timeout,
                )
            });
            for (id, outcome, elapsed_ms) in join_all(attempts).await {
                self.settle(id, outcome, elapsed_ms, &mut report);
            }
        }

        report.duration_ms = duration_millis(started.elapsed());
        tracing::info!(
            dispatched = report.dispatched,
            batches = report.batches,
            confirmed = report.confirmed,
            failed = report.failed,
            rolled_back = report.rolled_back,
            duration_ms = report.duration_ms,
            "Reconciliation cycle finished"
        );
        self.inner.events.emit(SyncEvent::CycleCompleted(report));
        drop(guard);
        Some(report)
    }

    /// Apply the state transition for one settled attempt.
    fn settle(
        &self,
        id: OperationId,
        outcome: Result<(), String>,
        elapsed_ms: u64,
        report: &mut CycleReport,
    ) {
        match outcome {
            Ok(()) => self.settle_success(id, elapsed_ms, report),
            Err(error) => self.settle_failure(id, error, elapsed_ms, report),
        }
    }

    fn settle_success(&self, id: OperationId, elapsed_ms: u64, report: &mut CycleReport) {
        let now = unix_millis_now();
        let settled = self.inner.store.lock().update_by_id(&id, |record| {
            record.transition(OperationState::Confirmed, now)?;
            record.attempt_durations.push(elapsed_ms);
            record.last_error = None;
            Ok::<_, crate::Error>(())
        });

        match settled {
            Some(Ok(())) => {
                report.confirmed += 1;
                tracing::debug!(id = %id, elapsed_ms, "Operation confirmed");
                self.inner.events.emit(SyncEvent::StateChanged {
                    id,
                    from: OperationState::Pending,
                    to: OperationState::Confirmed,
                });
            }
            Some(Err(error)) => {
                report.discarded += 1;
                tracing::warn!(id = %id, %error, "Discarding remote success for changed operation");
            }
            None => {
                report.discarded += 1;
                tracing::debug!(id = %id, "Operation cleared while in flight");
            }
        }
    }

    fn settle_failure(
        &self,
        id: OperationId,
        error: String,
        elapsed_ms: u64,
        report: &mut CycleReport,
    ) {
        let now = unix_millis_now();
        let max_retries = self.inner.config.read().max_retries;

        let settled = self.inner.store.lock().update_by_id(&id, |record| {
            record.transition(OperationState::Failed, now)?;
            record.attempt_durations.push(elapsed_ms);
            record.last_error = Some(error.clone());

            let decision = RetryDecision::evaluate(record.retry_count, max_retries);
            if decision == RetryDecision::RollBack {
                record.transition(OperationState::RolledBack, now)?;
            }
            Ok::<_, crate::Error>((decision, record.clone()))
        });

        let (decision, record) = match settled {
            Some(Ok(settled)) => settled,
            Some(Err(transition_error)) => {
                report.discarded += 1;
                tracing::warn!(id = %id, error = %transition_error, "Discarding remote failure for changed operation");
                return;
            }
            None => {
                report.discarded += 1;
                tracing::debug!(id = %id, "Operation cleared while in flight");
                return;
            }
        };

        report.failed += 1;
        self.inner.events.emit(SyncEvent::StateChanged {
            id,
            from: OperationState::Pending,
            to: OperationState::Failed,
        });

        match decision {
            RetryDecision::Requeue {
                delay,
                retry_number,
            } => {
                report.requeued += 1;
                tracing::info!(
                    id = %id,
                    retry_number,
                    delay_ms = duration_millis(delay),
                    %error,
                    "Operation failed; retry scheduled"
                );
                self.schedule_requeue(id, delay);
            }
            RetryDecision::RollBack => {
                report.rolled_back += 1;
                tracing::warn!(
                    id = %id,
                    retries = record.retry_count,
                    %error,
                    "Operation failed with retries exhausted"
                );
                self.inner.events.emit(SyncEvent::StateChanged {
                    id,
                    from: OperationState::Failed,
                    to: OperationState::RolledBack,
                });
                self.complete_rollback(&record);
            }
        }
    }
}

/// One bounded remote-apply call. Owns its inputs so a batch can be joined
/// without borrowing the engine. A panicking apply counts as a failure.
async fn attempt(
    remote: Arc<dyn RemoteApply>,
    record: OperationRecord,
    apply_timeout: Duration,
) -> AttemptResult {
    let started = Instant::now();
    let call = AssertUnwindSafe(remote.apply(&record)).catch_unwind();
    let outcome = match tokio::time::timeout(apply_timeout, call).await {
        Ok(Ok(Ok(true))) => Ok(()),
        Ok(Ok(Ok(false))) => Err("remote service reported failure".to_string()),
        Ok(Ok(Err(error))) => Err(error.to_string()),
        Ok(Err(_)) => {
            tracing::warn!(id = %record.id, "Remote apply panicked; counting attempt as failed");
            Err("remote apply panicked".to_string())
        }
        Err(_) => Err(format!(
            "remote apply timed out after {} ms",
            duration_millis(apply_timeout)
        )),
    };
    (record.id, outcome, duration_millis(started.elapsed()))
}
