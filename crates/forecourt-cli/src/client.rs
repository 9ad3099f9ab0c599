//! Thin JSON client for the forecourt-api service.

use forecourt_core::util::{compact_text, is_http_url, normalize_text_option};
use forecourt_core::{CycleReport, OperationRecord, SyncConfig};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CliError;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
pub const API_URL_ENV: &str = "FORECOURT_API_URL";

/// A record as served by the API, with its display progress.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordView {
    #[serde(flatten)]
    pub record: OperationRecord,
    #[serde(default)]
    pub progress_pct: u8,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub cycle_running: bool,
    #[serde(default)]
    pub active_interval_ms: Option<u64>,
    pub config: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SyncOutcome {
    Completed(CycleReport),
    Skipped { skipped: bool },
}

#[derive(Debug, Deserialize)]
pub struct CreatedUpdate {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub struct ClearedUpdates {
    pub removed: usize,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, CliError> {
        Ok(Self {
            base_url: normalize_api_url(base_url)?,
            client: reqwest::Client::builder().build()?,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        self.send::<(), T>(Method::GET, path, None).await
    }

    pub async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, CliError> {
        self.send(Method::POST, path, body).await
    }

    pub async fn put<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, CliError> {
        self.send(Method::PUT, path, Some(body)).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, CliError> {
        self.send::<(), T>(Method::DELETE, path, None).await
    }

    async fn send<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, CliError> {
        let url = format!("{}{path}", self.base_url);
        tracing::debug!(%method, %url, "Calling forecourt-api");

        let mut request = self
            .client
            .request(method, &url)
            .header("Accept", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(CliError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &text),
            });
        }
        Ok(serde_json::from_str(&text)?)
    }
}

/// Pick the API URL: explicit flag, then environment, then the local default.
pub fn resolve_api_url(flag: Option<String>, env_value: Option<String>) -> String {
    normalize_text_option(flag)
        .or_else(|| normalize_text_option(env_value))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string())
}

pub fn normalize_api_url(raw: &str) -> Result<String, CliError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(CliError::InvalidApiUrl("URL must not be empty".to_string()));
    }
    if !is_http_url(trimmed) {
        return Err(CliError::InvalidApiUrl(format!(
            "`{trimmed}` must include http:// or https://"
        )));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.error.or(payload.message) {
            return message.trim().to_string();
        }
    }

    let trimmed = compact_text(body);
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        trimmed
    }
}
