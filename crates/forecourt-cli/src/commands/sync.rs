use forecourt_core::SyncMetrics;

use crate::client::{ApiClient, SyncOutcome};
use crate::commands::common::{format_cycle_report, format_metrics_lines, print_lines};
use crate::error::CliError;

pub async fn run_sync(client: &ApiClient, as_json: bool) -> Result<(), CliError> {
    let outcome: SyncOutcome = client.post::<(), _>("/v1/sync", None).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    match outcome {
        SyncOutcome::Completed(report) => println!("{}", format_cycle_report(&report)),
        SyncOutcome::Skipped { .. } => println!("A sync cycle is already running; skipped"),
    }
    Ok(())
}

pub async fn run_metrics(client: &ApiClient, as_json: bool) -> Result<(), CliError> {
    let metrics: SyncMetrics = client.get("/v1/metrics").await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&metrics)?);
    } else {
        print_lines(format_metrics_lines(&metrics));
    }
    Ok(())
}
