use std::time::Duration;

use forecourt_core::config::{validate_max_retries, validate_sync_interval};
use serde::Serialize;

use crate::client::{ApiClient, SchedulerStatus};
use crate::commands::common::{format_scheduler_status, print_lines};
use crate::error::CliError;

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SchedulerConfigBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl SchedulerConfigBody {
    /// Check ranges locally so bad input never reaches the API.
    pub fn from_args(interval_ms: Option<u64>, max_retries: Option<u32>) -> Result<Self, CliError> {
        if interval_ms.is_none() && max_retries.is_none() {
            return Err(CliError::EmptySchedulerUpdate);
        }
        if let Some(interval_ms) = interval_ms {
            validate_sync_interval(Duration::from_millis(interval_ms))
                .map_err(forecourt_core::Error::from)?;
        }
        if let Some(max_retries) = max_retries {
            validate_max_retries(max_retries).map_err(forecourt_core::Error::from)?;
        }
        Ok(Self {
            sync_interval_ms: interval_ms,
            max_retries,
        })
    }
}

pub async fn run_status(client: &ApiClient, as_json: bool) -> Result<(), CliError> {
    let status: SchedulerStatus = client.get("/v1/scheduler").await?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_lines(format_scheduler_status(&status));
    }
    Ok(())
}

pub async fn run_start(client: &ApiClient) -> Result<(), CliError> {
    let status: SchedulerStatus = client.post::<(), _>("/v1/scheduler/start", None).await?;
    println!(
        "Scheduler running every {}ms",
        status.config.sync_interval.as_millis()
    );
    Ok(())
}

pub async fn run_stop(client: &ApiClient) -> Result<(), CliError> {
    let _: SchedulerStatus = client.post::<(), _>("/v1/scheduler/stop", None).await?;
    println!("Scheduler stopped");
    Ok(())
}

pub async fn run_set(client: &ApiClient, body: &SchedulerConfigBody) -> Result<(), CliError> {
    let status: SchedulerStatus = client.put("/v1/scheduler/config", body).await?;
    print_lines(format_scheduler_status(&status));
    if status.running && body.sync_interval_ms.is_some() {
        println!("Restart the scheduler for the new interval to take effect.");
    }
    Ok(())
}
