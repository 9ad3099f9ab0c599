//! The synchronization engine: public entry points for UI triggers and
//! operator controls.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::apply::{LocalState, RemoteApply};
use super::events::{EventBus, SyncEvent};
use super::scheduler::SchedulerHandle;
use crate::config::{validate_max_retries, validate_sync_interval, SyncConfig};
use crate::error::{Error, Result};
use crate::metrics::SyncMetrics;
use crate::models::{NewUpdate, OperationId, OperationRecord, OperationState};
use crate::store::OperationStore;
use crate::util::{duration_millis, unix_millis_now};

pub(crate) struct EngineInner {
    pub(crate) config: RwLock<SyncConfig>,
    pub(crate) store: Mutex<OperationStore>,
    pub(crate) remote: Arc<dyn RemoteApply>,
    pub(crate) local: Arc<dyn LocalState>,
    pub(crate) events: EventBus,
    pub(crate) cycle_running: AtomicBool,
    pub(crate) requeues: Mutex<HashMap<OperationId, JoinHandle<()>>>,
    scheduler: Mutex<SchedulerHandle>,
    metrics: RwLock<SyncMetrics>,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        for (_, handle) in self.requeues.get_mut().drain() {
            handle.abort();
        }
    }
}

/// Thread-safe handle to one engine instance. Cheap to clone.
///
/// Store mutations happen under a mutex that is never held across an
/// await, so operator actions and a running cycle cannot lose updates.
#[derive(Clone)]
pub struct SyncEngine {
    pub(crate) inner: Arc<EngineInner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SyncEngine")
            .field("config", &*self.inner.config.read())
            .field("records", &self.inner.store.lock().len())
            .field("scheduler_running", &self.is_scheduler_running())
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteApply>,
        local: Arc<dyn LocalState>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(EngineInner {
                config: RwLock::new(config),
                store: Mutex::new(OperationStore::new()),
                remote,
                local,
                events: EventBus::new(),
                cycle_running: AtomicBool::new(false),
                requeues: Mutex::new(HashMap::new()),
                scheduler: Mutex::new(SchedulerHandle::new()),
                metrics: RwLock::new(SyncMetrics::default()),
            }),
        })
    }

    pub(crate) fn downgrade(&self) -> Weak<EngineInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<EngineInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    // -----------------------------------------------------------------------
    // UI triggers
    // -----------------------------------------------------------------------

    /// Record an optimistic write and apply it to local state right away.
    pub fn create_update(&self, update: NewUpdate) -> OperationId {
        let mut record = OperationRecord::new(update);
        let mut store = self.inner.store.lock();
        while store.get(&record.id).is_some() {
            record.id = OperationId::new();
        }
        let id = record.id;
        let resource_id = record.resource_id.clone();
        let kind = record.kind;
        let snapshot = record.clone();
        if let Err(error) = store.append(record) {
            tracing::error!(%error, "Failed to queue optimistic update");
        }
        drop(store);

        self.inner.local.reconcile(&snapshot);
        tracing::debug!(id = %id, resource = %resource_id, %kind, "Queued optimistic update");
        self.inner.events.emit(SyncEvent::Created {
            id,
            resource_id,
            kind,
        });
        id
    }

    pub fn get(&self, id: &OperationId) -> Option<OperationRecord> {
        self.inner.store.lock().get(id).cloned()
    }

    /// All records in insertion order.
    pub fn records(&self) -> Vec<OperationRecord> {
        self.inner.store.lock().iter().cloned().collect()
    }

    pub fn records_in_state(&self, state: OperationState) -> Vec<OperationRecord> {
        self.inner.store.lock().filter_by_state(state).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Operator actions
    // -----------------------------------------------------------------------

    /// Move a failed record straight back to pending with a fresh retry budget.
    pub fn retry_now(&self, id: &OperationId) -> Result<()> {
        let now = unix_millis_now();
        let from = self
            .inner
            .store
            .lock()
            .update_by_id(id, |record| {
                let from = record.transition(OperationState::Pending, now)?;
                record.retry_count = 0;
                record.last_error = None;
                Ok::<_, Error>(from)
            })
            .ok_or(Error::OperationNotFound(*id))??;

        self.cancel_requeue(id);
        tracing::info!(id = %id, "Operator retry; backoff bypassed");
        self.inner.events.emit(SyncEvent::StateChanged {
            id: *id,
            from,
            to: OperationState::Pending,
        });
        Ok(())
    }

    /// Roll back a pending or failed record immediately.
    pub fn force_rollback(&self, id: &OperationId) -> Result<()> {
        let now = unix_millis_now();
        let (from, record) = self
            .inner
            .store
            .lock()
            .update_by_id(id, |record| {
                let from = record.transition(OperationState::RolledBack, now)?;
                Ok::<_, Error>((from, record.clone()))
            })
            .ok_or(Error::OperationNotFound(*id))??;

        self.inner.events.emit(SyncEvent::StateChanged {
            id: *id,
            from,
            to: OperationState::RolledBack,
        });
        self.complete_rollback(&record);
        self.refresh_metrics();
        Ok(())
    }

    /// Drop every confirmed and rolled-back record. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = self
            .inner
            .store
            .lock()
            .remove_where(OperationRecord::is_terminal);
        for record in &removed {
            self.cancel_requeue(&record.id);
        }
        tracing::info!(removed = removed.len(), "Cleared completed operations");
        self.refresh_metrics();
        removed.len()
    }

    // -----------------------------------------------------------------------
    // Metrics
    // -----------------------------------------------------------------------

    /// Metrics as of the last cycle, rollback or clear.
    pub fn metrics(&self) -> SyncMetrics {
        *self.inner.metrics.read()
    }

    /// Metrics computed from the store right now.
    pub fn compute_metrics(&self) -> SyncMetrics {
        SyncMetrics::from_records(self.inner.store.lock().iter())
    }

    pub(crate) fn refresh_metrics(&self) {
        let metrics = self.compute_metrics();
        *self.inner.metrics.write() = metrics;
        self.inner.events.emit(SyncEvent::MetricsUpdated(metrics));
    }

    // -----------------------------------------------------------------------
    // Scheduler and configuration
    // -----------------------------------------------------------------------

    /// Start (or restart) the periodic reconciliation timer with the
    /// currently configured interval.
    pub fn start_scheduler(&self) {
        let period = self.inner.config.read().sync_interval;
        let weak = self.downgrade();
        self.inner.scheduler.lock().start(period, move || {
            let Some(engine) = Self::upgrade(&weak) else {
                return ControlFlow::Break(());
            };
            tokio::spawn(async move {
                engine.run_cycle().await;
            });
            ControlFlow::Continue(())
        });
        tracing::info!(interval_ms = duration_millis(period), "Sync scheduler started");
    }

    /// Stop the timer. In-flight cycles still finish.
    pub fn stop_scheduler(&self) -> bool {
        let stopped = self.inner.scheduler.lock().stop();
        if stopped {
            tracing::info!("Sync scheduler stopped");
        }
        stopped
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.inner.scheduler.lock().is_running()
    }

    /// Period the running timer ticks at. Can differ from the configured
    /// interval until the scheduler is restarted.
    pub fn scheduler_period(&self) -> Option<Duration> {
        self.inner.scheduler.lock().period()
    }

    /// Whether a reconciliation cycle is currently in flight.
    pub fn is_cycle_running(&self) -> bool {
        self.inner.cycle_running.load(Ordering::Acquire)
    }

    pub fn config(&self) -> SyncConfig {
        *self.inner.config.read()
    }

    /// Change the timer period. A running timer keeps its old period until
    /// the next stop/start.
    pub fn set_sync_interval(&self, interval: Duration) -> Result<()> {
        validate_sync_interval(interval)?;
        self.inner.config.write().sync_interval = interval;
        Ok(())
    }

    /// Change the retry budget. Failed records already past the new budget
    /// roll back now instead of waiting out their backoff.
    pub fn set_max_retries(&self, max_retries: u32) -> Result<()> {
        validate_max_retries(max_retries)?;
        self.inner.config.write().max_retries = max_retries;
        self.enforce_retry_budget(max_retries);
        Ok(())
    }

    /// Stop the timer and cancel every scheduled retry.
    pub fn shutdown(&self) {
        self.stop_scheduler();
        self.cancel_all_requeues();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use tokio::time::sleep;

    use super::*;
    use crate::models::{OperationKind, RecordKey};
    use crate::sync::{ApplyError, CycleReport, InMemoryLocalState};

    /// Remote that fails the first `failures` calls, then succeeds.
    struct ScriptedRemote {
        failures: usize,
        calls: AtomicUsize,
        latency: Duration,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
        started_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl ScriptedRemote {
        fn new(failures: usize) -> Arc<Self> {
            Self::with_latency(failures, Duration::ZERO)
        }

        fn with_latency(failures: usize, latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicUsize::new(0),
                latency,
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
                started_at: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RemoteApply for ScriptedRemote {
        async fn apply(&self, _record: &OperationRecord) -> std::result::Result<bool, ApplyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
            self.started_at.lock().push(tokio::time::Instant::now());
            if !self.latency.is_zero() {
                sleep(self.latency).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if call < self.failures {
                if call % 2 == 0 {
                    Err(ApplyError::Api("pump controller offline".to_string()))
                } else {
                    Ok(false)
                }
            } else {
                Ok(true)
            }
        }
    }

    /// Local state that records every reconcile call.
    #[derive(Default)]
    struct RecordingLocal {
        calls: Mutex<Vec<OperationRecord>>,
    }

    impl LocalState for RecordingLocal {
        fn reconcile(&self, record: &OperationRecord) {
            self.calls.lock().push(record.clone());
        }
    }

    fn config(max_retries: u32) -> SyncConfig {
        SyncConfig {
            max_retries,
            ..SyncConfig::default()
        }
    }

    fn engine_with(
        remote: Arc<ScriptedRemote>,
        max_retries: u32,
    ) -> (SyncEngine, Arc<RecordingLocal>) {
        let local = Arc::new(RecordingLocal::default());
        let engine = SyncEngine::new(config(max_retries), remote, local.clone()).unwrap();
        (engine, local)
    }

    fn product(kind: OperationKind, payload: Value) -> NewUpdate {
        NewUpdate::new("products", kind, payload)
    }

    async fn wait_for_backoff(seconds: u64) {
        sleep(Duration::from_millis(seconds * 1_000 + 1)).await;
    }

    #[tokio::test]
    async fn create_update_applies_local_state_immediately() {
        let (engine, local) = engine_with(ScriptedRemote::new(0), 3);
        let id = engine.create_update(product(OperationKind::Create, json!({"id": 7, "name": "E85"})));

        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::Pending);
        assert_eq!(local.calls.lock().len(), 1);
        assert_eq!(local.calls.lock()[0].id, id);
    }

    #[tokio::test]
    async fn successful_cycle_confirms_and_records_duration() {
        let remote = ScriptedRemote::new(0);
        let (engine, _local) = engine_with(remote.clone(), 3);
        let id = engine.create_update(product(OperationKind::Update, json!({"id": 1})));

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.dispatched, 1);
        assert_eq!(report.confirmed, 1);

        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::Confirmed);
        assert_eq!(record.attempt_durations.len(), 1);
        assert_eq!(engine.metrics().confirmed_operations, 1);
        assert!((engine.metrics().success_rate_pct - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn empty_cycle_has_no_side_effects() {
        let (engine, _local) = engine_with(ScriptedRemote::new(0), 3);
        let mut events = engine.subscribe();

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport::default());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn create_without_prior_rolls_back_without_corrective_call() {
        let remote = ScriptedRemote::new(usize::MAX);
        let (engine, local) = engine_with(remote.clone(), 3);
        let id = engine.create_update(product(OperationKind::Create, json!({"name": "Premium"})));

        for (attempt, backoff_secs) in [(1, 2), (2, 4), (3, 8)] {
            engine.run_cycle().await.unwrap();
            let record = engine.get(&id).unwrap();
            assert_eq!(record.state, OperationState::Failed, "attempt {attempt}");
            assert_eq!(record.retry_count, attempt - 1);
            wait_for_backoff(backoff_secs).await;
            let record = engine.get(&id).unwrap();
            assert_eq!(record.state, OperationState::Pending);
            assert_eq!(record.retry_count, attempt);
        }

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.rolled_back, 1);

        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::RolledBack);
        assert_eq!(record.retry_count, 3);
        assert_eq!(record.attempt_durations.len(), 4);
        assert!(record.last_error.is_some());
        assert_eq!(remote.calls(), 4);
        // Only the optimistic create reached local state.
        assert_eq!(local.calls.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_update_restores_prior_payload() {
        let (engine, local) = engine_with(ScriptedRemote::new(usize::MAX), 1);
        let id = engine.create_update(
            product(OperationKind::Update, json!({"id": 12, "price": 10.49}))
                .with_prior(json!({"price": 9.99})),
        );

        engine.run_cycle().await.unwrap();
        wait_for_backoff(2).await;
        engine.run_cycle().await.unwrap();

        assert_eq!(engine.get(&id).unwrap().state, OperationState::RolledBack);
        let calls = local.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].kind, OperationKind::Update);
        assert_eq!(calls[1].local_payload, json!({"price": 9.99}));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_record_skips_cycles_during_backoff() {
        let remote = ScriptedRemote::new(1);
        let (engine, _local) = engine_with(remote.clone(), 3);
        let id = engine.create_update(product(OperationKind::Delete, json!({"id": 2})));

        engine.run_cycle().await.unwrap();
        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.dispatched, 0);
        assert_eq!(remote.calls(), 1);

        sleep(Duration::from_millis(1_999)).await;
        assert_eq!(engine.get(&id).unwrap().state, OperationState::Failed);
        sleep(Duration::from_millis(2)).await;
        assert_eq!(engine.get(&id).unwrap().state, OperationState::Pending);

        engine.run_cycle().await.unwrap();
        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::Confirmed);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.attempt_durations.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_sequential_and_bounded() {
        let remote = ScriptedRemote::with_latency(0, Duration::from_millis(100));
        let (engine, _local) = engine_with(remote.clone(), 3);
        for index in 0..7 {
            engine.create_update(product(OperationKind::Create, json!({"id": index})));
        }

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.batches, 2);
        assert_eq!(report.confirmed, 7);
        assert_eq!(remote.peak_in_flight.load(Ordering::SeqCst), 5);

        let starts = remote.started_at.lock().clone();
        assert_eq!(starts.len(), 7);
        let first = starts[0];
        let first_batch = starts.iter().filter(|at| **at == first).count();
        let second_batch = starts
            .iter()
            .filter(|at| at.duration_since(first) >= Duration::from_millis(100))
            .count();
        assert_eq!((first_batch, second_batch), (5, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_cycle_is_skipped() {
        let remote = ScriptedRemote::with_latency(0, Duration::from_millis(500));
        let (engine, _local) = engine_with(remote.clone(), 3);
        engine.create_update(product(OperationKind::Create, json!({"id": 1})));

        let background = engine.clone();
        let running = tokio::spawn(async move { background.run_cycle().await });
        sleep(Duration::from_millis(10)).await;

        assert!(engine.is_cycle_running());
        assert!(engine.run_cycle().await.is_none());

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.confirmed, 1);
        assert!(!engine.is_cycle_running());
        assert_eq!(remote.calls(), 1);
    }

    #[tokio::test]
    async fn retry_now_resets_budget_and_cancels_backoff() {
        let remote = ScriptedRemote::new(2);
        let (engine, _local) = engine_with(remote.clone(), 3);
        let id = engine.create_update(product(OperationKind::Update, json!({"id": 3})));

        engine.run_cycle().await.unwrap();
        assert_eq!(engine.get(&id).unwrap().state, OperationState::Failed);
        assert_eq!(engine.inner.requeues.lock().len(), 1);

        engine.retry_now(&id).unwrap();
        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::Pending);
        assert_eq!(record.retry_count, 0);
        assert!(engine.inner.requeues.lock().is_empty());
    }

    #[tokio::test]
    async fn retry_now_rejects_non_failed_records() {
        let (engine, _local) = engine_with(ScriptedRemote::new(0), 3);
        let id = engine.create_update(product(OperationKind::Create, json!({"id": 1})));

        let err = engine.retry_now(&id).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));

        let missing = OperationId::new();
        assert!(matches!(
            engine.retry_now(&missing).unwrap_err(),
            Error::OperationNotFound(_)
        ));
    }

    #[tokio::test]
    async fn force_rollback_pending_record() {
        let (engine, local) = engine_with(ScriptedRemote::new(0), 3);
        let id = engine.create_update(
            product(OperationKind::Delete, json!({"id": 8}))
                .with_prior(json!({"id": 8, "name": "Car wash token"})),
        );
        let mut events = engine.subscribe();

        engine.force_rollback(&id).unwrap();
        assert_eq!(engine.get(&id).unwrap().state, OperationState::RolledBack);
        assert_eq!(local.calls.lock().len(), 2);
        assert_eq!(engine.metrics().rolled_back_operations, 1);

        let mut saw_rollback = false;
        while let Ok(event) = events.try_recv() {
            if let SyncEvent::RolledBack {
                id: event_id,
                corrective_applied,
            } = event
            {
                assert_eq!(event_id, id);
                assert!(corrective_applied);
                saw_rollback = true;
            }
        }
        assert!(saw_rollback);

        // Terminal records cannot be rolled back twice.
        assert!(engine.force_rollback(&id).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rollback_during_flight_discards_late_success() {
        let remote = ScriptedRemote::with_latency(0, Duration::from_millis(50));
        let (engine, _local) = engine_with(remote, 3);
        let id = engine.create_update(product(OperationKind::Create, json!({"id": 1})));

        let background = engine.clone();
        let running = tokio::spawn(async move { background.run_cycle().await });
        sleep(Duration::from_millis(10)).await;
        engine.force_rollback(&id).unwrap();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.discarded, 1);
        assert_eq!(engine.get(&id).unwrap().state, OperationState::RolledBack);
    }

    #[tokio::test]
    async fn clear_completed_keeps_unresolved_records() {
        let remote = ScriptedRemote::new(1);
        let (engine, _local) = engine_with(remote, 3);
        let failed = engine.create_update(product(OperationKind::Create, json!({"id": 1})));
        let confirmed = engine.create_update(product(OperationKind::Create, json!({"id": 2})));
        engine.run_cycle().await.unwrap();
        let rolled_back = engine.create_update(product(OperationKind::Create, json!({"id": 3})));
        engine.force_rollback(&rolled_back).unwrap();
        let pending = engine.create_update(product(OperationKind::Create, json!({"id": 4})));

        assert_eq!(engine.clear_completed(), 2);

        let remaining: Vec<_> = engine.records().iter().map(|r| r.id).collect();
        assert_eq!(remaining, vec![failed, pending]);
        assert!(engine.get(&confirmed).is_none());
        assert_eq!(engine.metrics().total_operations, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_drives_cycles_and_stops() {
        let remote = ScriptedRemote::new(0);
        let (engine, _local) = engine_with(remote.clone(), 3);
        engine.create_update(product(OperationKind::Create, json!({"id": 1})));

        engine.start_scheduler();
        engine.start_scheduler();
        assert!(engine.is_scheduler_running());

        sleep(Duration::from_millis(1_050)).await;
        assert_eq!(remote.calls(), 1);
        assert_eq!(engine.metrics().confirmed_operations, 1);

        assert!(engine.stop_scheduler());
        engine.create_update(product(OperationKind::Create, json!({"id": 2})));
        sleep(Duration::from_millis(5_000)).await;
        assert_eq!(remote.calls(), 1);
        assert_eq!(engine.records_in_state(OperationState::Pending).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_change_waits_for_restart() {
        let remote = ScriptedRemote::new(0);
        let (engine, _local) = engine_with(remote.clone(), 3);
        engine.start_scheduler();
        engine.set_sync_interval(Duration::from_millis(5_000)).unwrap();
        engine.create_update(product(OperationKind::Create, json!({"id": 1})));

        sleep(Duration::from_millis(1_050)).await;
        assert_eq!(remote.calls(), 1);
        assert_eq!(engine.scheduler_period(), Some(Duration::from_millis(1_000)));

        engine.start_scheduler();
        assert_eq!(engine.scheduler_period(), Some(Duration::from_millis(5_000)));
        engine.create_update(product(OperationKind::Create, json!({"id": 2})));
        sleep(Duration::from_millis(4_000)).await;
        assert_eq!(remote.calls(), 1);
        sleep(Duration::from_millis(1_050)).await;
        assert_eq!(remote.calls(), 2);
    }

    #[tokio::test]
    async fn config_setters_validate_ranges() {
        let (engine, _local) = engine_with(ScriptedRemote::new(0), 3);
        assert!(engine.set_sync_interval(Duration::from_millis(100)).is_err());
        assert!(engine.set_max_retries(0).is_err());
        engine.set_max_retries(10).unwrap();
        assert_eq!(engine.config().max_retries, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn in_memory_local_state_reflects_rollback() {
        let local = Arc::new(InMemoryLocalState::new());
        let engine = SyncEngine::new(config(1), ScriptedRemote::new(usize::MAX), local.clone())
            .unwrap();
        engine.create_update(
            product(OperationKind::Update, json!({"id": 5, "price": 4.10}))
                .with_prior(json!({"id": 5, "price": 3.90})),
        );
        assert_eq!(local.row("products", "5").unwrap()["price"], json!(4.10));

        engine.run_cycle().await.unwrap();
        wait_for_backoff(2).await;
        engine.run_cycle().await.unwrap();

        assert_eq!(local.row("products", "5").unwrap()["price"], json!(3.90));
    }

    #[tokio::test(start_paused = true)]
    async fn lowering_max_retries_rolls_back_waiting_records() {
        let (engine, local) = engine_with(ScriptedRemote::new(usize::MAX), 3);
        let id = engine.create_update(
            product(OperationKind::Update, json!({"id": 9, "price": 2.15}))
                .with_prior(json!({"id": 9, "price": 2.05})),
        );

        engine.run_cycle().await.unwrap();
        wait_for_backoff(2).await;
        engine.run_cycle().await.unwrap();
        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::Failed);
        assert_eq!(record.retry_count, 1);

        engine.set_max_retries(1).unwrap();
        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::RolledBack);
        assert_eq!(record.retry_count, 1);
        assert!(engine.inner.requeues.lock().is_empty());
        assert_eq!(local.calls.lock().len(), 2);
        assert_eq!(engine.metrics().rolled_back_operations, 1);

        wait_for_backoff(4).await;
        assert_eq!(engine.get(&id).unwrap().state, OperationState::RolledBack);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_expiry_respects_current_budget() {
        let (engine, _local) = engine_with(ScriptedRemote::new(usize::MAX), 3);
        let id = engine.create_update(product(OperationKind::Create, json!({"id": 4})));

        engine.run_cycle().await.unwrap();
        wait_for_backoff(2).await;
        engine.run_cycle().await.unwrap();

        // Budget changed behind the setter, so only the timer sees it.
        engine.inner.config.write().max_retries = 1;
        wait_for_backoff(4).await;

        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::RolledBack);
        assert!(record.retry_count <= engine.config().max_retries);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_remote_times_out_as_failure() {
        let remote = ScriptedRemote::with_latency(0, Duration::from_millis(12_000));
        let local = Arc::new(RecordingLocal::default());
        let config = SyncConfig {
            apply_timeout: Duration::from_millis(1_000),
            ..config(3)
        };
        let engine = SyncEngine::new(config, remote, local).unwrap();
        let id = engine.create_update(product(OperationKind::Update, json!({"id": 6})));

        let report = engine.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.requeued, 1);

        let record = engine.get(&id).unwrap();
        assert_eq!(record.state, OperationState::Failed);
        assert!(record.last_error.as_deref().unwrap().contains("timed out"));
        assert_eq!(record.attempt_durations, vec![1_000]);
    }

    struct PanickingRemote;

    #[async_trait]
    impl RemoteApply for PanickingRemote {
        async fn apply(&self, record: &OperationRecord) -> std::result::Result<bool, ApplyError> {
            if record.record_key == RecordKey::Number(1) {
                panic!("pump controller driver crashed");
            }
            Ok(true)
        }
    }

    #[tokio::test]
    async fn panicking_apply_fails_only_its_record() {
        let local = Arc::new(RecordingLocal::default());
        let engine = SyncEngine::new(config(3), Arc::new(PanickingRemote), local).unwrap();
        let crashed = engine.create_update(product(OperationKind::Update, json!({"id": 1})));
        let healthy = engine.create_update(product(OperationKind::Update, json!({"id": 2})));

        let report = engine.run_cycle().await.unwrap();
        assert_eq!((report.confirmed, report.failed), (1, 1));
        assert!(!engine.is_cycle_running());

        let record = engine.get(&crashed).unwrap();
        assert_eq!(record.state, OperationState::Failed);
        assert_eq!(record.last_error.as_deref(), Some("remote apply panicked"));
        assert_eq!(engine.get(&healthy).unwrap().state, OperationState::Confirmed);
    }
}
