use chrono::{TimeZone, Utc};
use forecourt_core::{CycleReport, OperationId, SyncMetrics};

use crate::client::{RecordView, SchedulerStatus};
use crate::error::CliError;

pub fn parse_operation_id(raw: &str) -> Result<OperationId, CliError> {
    let trimmed = raw.trim();
    trimmed
        .parse::<OperationId>()
        .map_err(|_| CliError::InvalidId(trimmed.to_string()))
}

pub fn parse_json_arg(flag: &'static str, raw: &str) -> Result<serde_json::Value, CliError> {
    serde_json::from_str(raw).map_err(|error| CliError::InvalidPayload {
        flag,
        message: error.to_string(),
    })
}

pub fn short_id(id: &OperationId) -> String {
    id.to_string().chars().take(13).collect()
}

pub fn format_record_lines(records: &[RecordView]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|view| {
            let record = &view.record;
            let short_id = short_id(&record.id);
            let state = record.state.label();
            let target = format!("{}/{}", record.resource_id, record.record_key);
            let relative_time = format_relative_time(record.updated_at, now_ms);
            let line = format!(
                "{short_id:<13}  {state:<11}  {kind:<6}  {target:<24}  {relative_time}",
                kind = record.kind.label()
            );

            match (&record.last_error, record.retry_count) {
                (Some(error), retries) => format!("{line}  retries={retries}  {error}"),
                (None, 0) => line,
                (None, retries) => format!("{line}  retries={retries}"),
            }
        })
        .collect()
}

pub fn format_record_detail(view: &RecordView) -> Vec<String> {
    let record = &view.record;
    let mut lines = vec![
        format!("id:          {}", record.id),
        format!("resource:    {}", record.resource_id),
        format!("key:         {}", record.record_key),
        format!("kind:        {}", record.kind),
        format!("state:       {} ({}%)", record.state, view.progress_pct),
        format!("retries:     {}", record.retry_count),
        format!("created:     {}", format_timestamp(record.created_at)),
        format!("updated:     {}", format_timestamp(record.updated_at)),
        format!("payload:     {}", record.local_payload),
    ];
    if let Some(prior) = &record.prior_payload {
        lines.push(format!("prior:       {prior}"));
    }
    if !record.attempt_durations.is_empty() {
        let durations = record
            .attempt_durations
            .iter()
            .map(|ms| format!("{ms}ms"))
            .collect::<Vec<_>>()
            .join(", ");
        lines.push(format!("attempts:    {durations}"));
    }
    if let Some(error) = &record.last_error {
        lines.push(format!("last error:  {error}"));
    }
    lines
}

pub fn format_metrics_lines(metrics: &SyncMetrics) -> Vec<String> {
    vec![
        format!("success rate:   {:.1}%", metrics.success_rate_pct),
        format!("avg response:   {:.0}ms", metrics.average_response_time_ms),
        format!("total:          {}", metrics.total_operations),
        format!("pending:        {}", metrics.pending_operations),
        format!("confirmed:      {}", metrics.confirmed_operations),
        format!("failed:         {}", metrics.failed_operations),
        format!("rolled back:    {}", metrics.rolled_back_operations),
    ]
}

pub fn format_cycle_report(report: &CycleReport) -> String {
    if report.dispatched == 0 {
        return "Nothing pending".to_string();
    }
    format!(
        "Dispatched {} in {} batch(es): {} confirmed, {} failed ({} re-queued, {} rolled back) in {}ms",
        report.dispatched,
        report.batches,
        report.confirmed,
        report.failed,
        report.requeued,
        report.rolled_back,
        report.duration_ms
    )
}

pub fn format_scheduler_status(status: &SchedulerStatus) -> Vec<String> {
    let state = if status.running { "running" } else { "stopped" };
    let cycle = if status.cycle_running {
        "in flight"
    } else {
        "idle"
    };
    let configured_ms = status.config.sync_interval.as_millis();
    let interval = match status.active_interval_ms {
        Some(active) if u128::from(active) != configured_ms => {
            format!("interval:       {configured_ms}ms (running at {active}ms until restart)")
        }
        _ => format!("interval:       {configured_ms}ms"),
    };
    vec![
        format!("scheduler:      {state}"),
        format!("cycle:          {cycle}"),
        interval,
        format!("max retries:    {}", status.config.max_retries),
        format!("batch size:     {}", status.config.batch_size),
        format!(
            "apply timeout:  {}ms",
            status.config.apply_timeout.as_millis()
        ),
    ]
}

pub fn format_timestamp(timestamp_ms: i64) -> String {
    Utc.timestamp_millis_opt(timestamp_ms)
        .single()
        .map_or_else(|| timestamp_ms.to_string(), |value| value.to_rfc3339())
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let second = 1_000;
    let minute = 60 * second;
    let hour = 60 * minute;
    let day = 24 * hour;

    if diff < second {
        "just now".to_string()
    } else if diff < minute {
        format!("{}s ago", diff / second)
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else {
        format!("{}d ago", diff / day)
    }
}

pub fn print_lines(lines: impl IntoIterator<Item = String>) {
    for line in lines {
        println!("{line}");
    }
}
