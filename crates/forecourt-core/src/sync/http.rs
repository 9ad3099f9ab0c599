//! HTTP implementation of the remote apply service.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::apply::{ApplyError, RemoteApply};
use crate::models::{OperationId, OperationKind, OperationRecord, RecordKey};
use crate::util::{compact_text, is_http_url, normalize_text_option};

/// Posts each operation to `{endpoint}/{resource_id}`.
#[derive(Clone)]
pub struct HttpRemoteApply {
    endpoint: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemoteApply {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("HttpRemoteApply")
            .field("endpoint", &self.endpoint.as_str())
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl HttpRemoteApply {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Result<Self, ApplyError> {
        let endpoint = normalize_endpoint(endpoint.into())?;
        Ok(Self {
            endpoint,
            token: normalize_text_option(token),
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }

    fn resource_url(&self, resource_id: &str) -> Result<Url, ApplyError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ApplyError::InvalidConfiguration("endpoint cannot carry a path".to_string())
            })?
            .pop_if_empty()
            .push(resource_id);
        Ok(url)
    }
}

#[derive(Debug, Serialize)]
struct ApplyRequest<'a> {
    id: OperationId,
    resource_id: &'a str,
    record_key: &'a RecordKey,
    kind: OperationKind,
    payload: &'a Value,
}

impl<'a> From<&'a OperationRecord> for ApplyRequest<'a> {
    fn from(record: &'a OperationRecord) -> Self {
        Self {
            id: record.id,
            resource_id: &record.resource_id,
            record_key: &record.record_key,
            kind: record.kind,
            payload: &record.local_payload,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApplyResponse {
    success: Option<bool>,
    ok: Option<bool>,
}

#[async_trait]
impl RemoteApply for HttpRemoteApply {
    async fn apply(&self, record: &OperationRecord) -> Result<bool, ApplyError> {
        let url = self.resource_url(&record.resource_id)?;
        let mut request = self
            .client
            .post(url)
            .header("Accept", "application/json")
            .json(&ApplyRequest::from(record));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApplyError::Api(parse_api_error(status, &body)));
        }

        let body = response.text().await?;
        parse_apply_result(&body)
    }
}

fn parse_apply_result(body: &str) -> Result<bool, ApplyError> {
    if body.trim().is_empty() {
        return Ok(true);
    }
    let payload: ApplyResponse = serde_json::from_str(body).map_err(|error| {
        ApplyError::Api(format!("invalid apply response: {error}: {}", compact_text(body)))
    })?;
    Ok(payload.success.or(payload.ok).unwrap_or(true))
}

#[derive(Debug, Deserialize)]
struct ApplyErrorBody {
    error: Option<String>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApplyErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{trimmed} ({})", status.as_u16())
    }
}

fn normalize_endpoint(raw: String) -> Result<Url, ApplyError> {
    let endpoint = normalize_text_option(Some(raw)).ok_or_else(|| {
        ApplyError::InvalidConfiguration("endpoint must not be empty".to_string())
    })?;
    if !is_http_url(&endpoint) {
        return Err(ApplyError::InvalidConfiguration(
            "endpoint must include http:// or https://".to_string(),
        ));
    }
    Url::parse(endpoint.trim_end_matches('/'))
        .map_err(|error| ApplyError::InvalidConfiguration(format!("invalid endpoint: {error}")))
}
