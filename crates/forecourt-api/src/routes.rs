use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use forecourt_core::sync::{HttpRemoteApply, InMemoryLocalState};
use forecourt_core::{
    CycleReport, NewUpdate, OperationId, OperationKind, OperationRecord, OperationState,
    SyncConfig, SyncEngine, SyncMetrics,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub engine: SyncEngine,
    local_state: Arc<InMemoryLocalState>,
}

impl AppState {
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, AppError> {
        let remote = HttpRemoteApply::new(config.apply_url.clone(), config.apply_token.clone())
            .map_err(|error| AppError::Config(error.to_string()))?;
        let local_state = Arc::new(InMemoryLocalState::new());
        let engine = SyncEngine::new(config.sync, Arc::new(remote), local_state.clone())?;
        Ok(Self::new(config, engine, local_state))
    }

    pub fn new(
        config: Arc<AppConfig>,
        engine: SyncEngine,
        local_state: Arc<InMemoryLocalState>,
    ) -> Self {
        Self {
            config,
            engine,
            local_state,
        }
    }
}

pub fn app_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/updates", post(create_update).get(list_updates))
        .route("/updates/completed", delete(clear_completed))
        .route("/updates/{id}", get(get_update))
        .route("/updates/{id}/retry", post(retry_update))
        .route("/updates/{id}/rollback", post(rollback_update))
        .route("/metrics", get(metrics))
        .route("/sync", post(run_sync))
        .route("/scheduler", get(scheduler_status))
        .route("/scheduler/start", post(start_scheduler))
        .route("/scheduler/stop", post(stop_scheduler))
        .route("/scheduler/config", put(update_scheduler_config))
        .route("/resources/{resource_id}", get(resource_rows));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    scheduler_running: bool,
    metrics: SyncMetrics,
}

async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        scheduler_running: state.engine.is_scheduler_running(),
        metrics: state.engine.metrics(),
    })
}

/// A record plus its display progress at response time.
#[derive(Debug, Serialize)]
struct RecordView {
    #[serde(flatten)]
    record: OperationRecord,
    progress_pct: u8,
}

impl From<OperationRecord> for RecordView {
    fn from(record: OperationRecord) -> Self {
        let progress_pct = record.progress_pct(Utc::now().timestamp_millis());
        Self {
            record,
            progress_pct,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateUpdateRequest {
    resource_id: String,
    kind: OperationKind,
    payload: Value,
    #[serde(default)]
    prior_payload: Option<Value>,
}

#[derive(Debug, Serialize)]
struct CreateUpdateResponse {
    id: OperationId,
}

async fn create_update(
    State(state): State<AppState>,
    Json(request): Json<CreateUpdateRequest>,
) -> Result<Json<CreateUpdateResponse>, AppError> {
    let resource_id = request.resource_id.trim();
    if resource_id.is_empty() {
        return Err(AppError::bad_request("resource_id must not be empty"));
    }

    let mut update = NewUpdate::new(resource_id, request.kind, request.payload);
    if let Some(prior) = request.prior_payload.filter(|prior| !prior.is_null()) {
        update = update.with_prior(prior);
    }
    let id = state.engine.create_update(update);
    tracing::info!(endpoint = "create_update", id = %id, resource = resource_id, "Queued update");
    Ok(Json(CreateUpdateResponse { id }))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    state: Option<String>,
}

async fn list_updates(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RecordView>>, AppError> {
    let records = match query.state.as_deref().map(str::trim) {
        Some(filter) if !filter.is_empty() => {
            let filter = filter
                .parse::<OperationState>()
                .map_err(|error| AppError::bad_request(error.to_string()))?;
            state.engine.records_in_state(filter)
        }
        _ => state.engine.records(),
    };
    Ok(Json(records.into_iter().map(RecordView::from).collect()))
}

async fn get_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let id = parse_id(&id)?;
    let record = state
        .engine
        .get(&id)
        .ok_or(forecourt_core::Error::OperationNotFound(id))?;
    Ok(Json(record.into()))
}

async fn retry_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let id = parse_id(&id)?;
    state.engine.retry_now(&id)?;
    current_record(&state, id)
}

async fn rollback_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RecordView>, AppError> {
    let id = parse_id(&id)?;
    state.engine.force_rollback(&id)?;
    current_record(&state, id)
}

#[derive(Debug, Serialize)]
struct ClearResponse {
    removed: usize,
}

async fn clear_completed(State(state): State<AppState>) -> Json<ClearResponse> {
    Json(ClearResponse {
        removed: state.engine.clear_completed(),
    })
}

async fn metrics(State(state): State<AppState>) -> Json<SyncMetrics> {
    Json(state.engine.metrics())
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum SyncResponse {
    Completed(CycleReport),
    Skipped { skipped: bool },
}

async fn run_sync(State(state): State<AppState>) -> Json<SyncResponse> {
    let response = match state.engine.run_cycle().await {
        Some(report) => SyncResponse::Completed(report),
        None => SyncResponse::Skipped { skipped: true },
    };
    Json(response)
}

#[derive(Debug, Serialize)]
struct SchedulerStatus {
    running: bool,
    cycle_running: bool,
    /// Period of the running timer; trails `config` until a restart.
    active_interval_ms: Option<u64>,
    config: SyncConfig,
}

fn scheduler_snapshot(state: &AppState) -> SchedulerStatus {
    SchedulerStatus {
        running: state.engine.is_scheduler_running(),
        cycle_running: state.engine.is_cycle_running(),
        active_interval_ms: state
            .engine
            .scheduler_period()
            .map(forecourt_core::util::duration_millis),
        config: state.engine.config(),
    }
}

async fn scheduler_status(State(state): State<AppState>) -> Json<SchedulerStatus> {
    Json(scheduler_snapshot(&state))
}

async fn start_scheduler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.engine.start_scheduler();
    Json(scheduler_snapshot(&state))
}

async fn stop_scheduler(State(state): State<AppState>) -> Json<SchedulerStatus> {
    state.engine.stop_scheduler();
    Json(scheduler_snapshot(&state))
}

#[derive(Debug, Deserialize)]
struct SchedulerConfigRequest {
    sync_interval_ms: Option<u64>,
    max_retries: Option<u32>,
}

async fn update_scheduler_config(
    State(state): State<AppState>,
    Json(request): Json<SchedulerConfigRequest>,
) -> Result<Json<SchedulerStatus>, AppError> {
    if request.sync_interval_ms.is_none() && request.max_retries.is_none() {
        return Err(AppError::bad_request(
            "provide sync_interval_ms and/or max_retries",
        ));
    }
    if let Some(interval_ms) = request.sync_interval_ms {
        state
            .engine
            .set_sync_interval(Duration::from_millis(interval_ms))?;
    }
    if let Some(max_retries) = request.max_retries {
        state.engine.set_max_retries(max_retries)?;
    }
    tracing::info!(
        endpoint = "scheduler_config",
        sync_interval_ms = ?request.sync_interval_ms,
        max_retries = ?request.max_retries,
        "Updated sync configuration"
    );
    Ok(Json(scheduler_snapshot(&state)))
}

#[derive(Debug, Serialize)]
struct ResourceRow {
    key: String,
    payload: Value,
}

async fn resource_rows(
    State(state): State<AppState>,
    Path(resource_id): Path<String>,
) -> Json<Vec<ResourceRow>> {
    let rows = state
        .local_state
        .rows(&resource_id)
        .into_iter()
        .map(|(key, payload)| ResourceRow { key, payload })
        .collect();
    Json(rows)
}

fn parse_id(raw: &str) -> Result<OperationId, AppError> {
    raw.parse::<OperationId>()
        .map_err(|error| AppError::bad_request(format!("invalid operation id `{raw}`: {error}")))
}

fn current_record(state: &AppState, id: OperationId) -> Result<Json<RecordView>, AppError> {
    state
        .engine
        .get(&id)
        .map(|record| Json(record.into()))
        .ok_or_else(|| forecourt_core::Error::OperationNotFound(id).into())
}
