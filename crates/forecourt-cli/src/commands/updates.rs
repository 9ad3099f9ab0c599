use forecourt_core::{OperationKind, OperationState};
use serde::Serialize;
use serde_json::Value;

use crate::client::{ApiClient, ClearedUpdates, CreatedUpdate, RecordView};
use crate::commands::common::{
    format_record_detail, format_record_lines, parse_json_arg, parse_operation_id, print_lines,
};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct CreateUpdateBody {
    pub resource_id: String,
    pub kind: OperationKind,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior_payload: Option<Value>,
}

impl CreateUpdateBody {
    pub fn from_args(
        resource: &str,
        kind: OperationKind,
        payload: &str,
        prior: Option<&str>,
    ) -> Result<Self, CliError> {
        let resource_id = resource.trim();
        if resource_id.is_empty() {
            return Err(CliError::EmptyResource);
        }
        Ok(Self {
            resource_id: resource_id.to_string(),
            kind,
            payload: parse_json_arg("payload", payload)?,
            prior_payload: prior.map(|raw| parse_json_arg("prior", raw)).transpose()?,
        })
    }
}

pub fn list_path(state: Option<OperationState>) -> String {
    state.map_or_else(
        || "/v1/updates".to_string(),
        |state| format!("/v1/updates?state={}", state.label()),
    )
}

pub async fn run_list(
    client: &ApiClient,
    state: Option<OperationState>,
    as_json: bool,
) -> Result<(), CliError> {
    let records: Vec<Value> = client.get(&list_path(state)).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No updates queued.");
        return Ok(());
    }

    let views = records
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<RecordView>, _>>()?;
    print_lines(format_record_lines(&views));
    Ok(())
}

pub async fn run_show(client: &ApiClient, id: &str, as_json: bool) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let record: Value = client.get(&format!("/v1/updates/{id}")).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        let view: RecordView = serde_json::from_value(record)?;
        print_lines(format_record_detail(&view));
    }
    Ok(())
}

pub async fn run_create(client: &ApiClient, body: &CreateUpdateBody) -> Result<(), CliError> {
    let created: CreatedUpdate = client.post("/v1/updates", Some(body)).await?;
    println!("{}", created.id);
    Ok(())
}

pub async fn run_retry(client: &ApiClient, id: &str) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let view: RecordView = client
        .post::<(), _>(&format!("/v1/updates/{id}/retry"), None)
        .await?;
    println!("{} -> {}", view.record.id, view.record.state);
    Ok(())
}

pub async fn run_rollback(client: &ApiClient, id: &str) -> Result<(), CliError> {
    let id = parse_operation_id(id)?;
    let view: RecordView = client
        .post::<(), _>(&format!("/v1/updates/{id}/rollback"), None)
        .await?;
    let restored = if view.record.prior_payload.is_some() {
        "prior payload restored"
    } else {
        "no prior payload; local state unchanged"
    };
    println!("{} -> {} ({restored})", view.record.id, view.record.state);
    Ok(())
}

pub async fn run_clear(client: &ApiClient) -> Result<(), CliError> {
    let cleared: ClearedUpdates = client.delete("/v1/updates/completed").await?;
    println!("Removed {} completed update(s)", cleared.removed);
    Ok(())
}
