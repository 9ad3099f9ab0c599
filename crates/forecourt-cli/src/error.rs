use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] forecourt_core::Error),
    #[error("API request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid API URL: {0}")]
    InvalidApiUrl(String),
    #[error("Invalid JSON for --{flag}: {message}")]
    InvalidPayload { flag: &'static str, message: String },
    #[error("Invalid operation ID: {0}")]
    InvalidId(String),
    #[error("Resource name cannot be empty")]
    EmptyResource,
    #[error("Nothing to change. Pass --interval-ms and/or --max-retries.")]
    EmptySchedulerUpdate,
}
