mod config;
mod error;
mod routes;

use std::sync::Arc;

use config::AppConfig;
use forecourt_core::{SyncEngine, SyncEvent};
use routes::{app_router, AppState};
use tokio::sync::broadcast::error::RecvError;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Only load .env in development; production uses platform-native env injection.
    #[cfg(debug_assertions)]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("forecourt_api=info".parse().expect("valid directive"))
                .add_directive("forecourt_core=info".parse().expect("valid directive")),
        )
        .init();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!("Starting forecourt-api with config: {:?}", config);

    let state = AppState::from_config(config)?;
    spawn_event_logger(&state.engine);
    if state.config.scheduler_autostart {
        state.engine.start_scheduler();
    }

    let engine = state.engine.clone();
    let bind_addr = state.config.bind_addr.clone();
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("forecourt-api listening on {}", bind_addr);
    let served = axum::serve(listener, router).await;
    engine.shutdown();
    served?;
    Ok(())
}

/// Mirror engine notifications into the log.
fn spawn_event_logger(engine: &SyncEngine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SyncEvent::RolledBack {
                    id,
                    corrective_applied,
                }) => {
                    tracing::warn!(id = %id, corrective_applied, "Update rolled back");
                }
                Ok(SyncEvent::CycleCompleted(report)) if report.failed > 0 => {
                    tracing::info!(
                        failed = report.failed,
                        rolled_back = report.rolled_back,
                        "Cycle finished with failures"
                    );
                }
                Ok(event) => tracing::debug!(?event, "Sync event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event logger lagged behind engine");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
