//! Collaborator seams: the remote apply service and the local state cache.

use async_trait::async_trait;
use thiserror::Error;

use crate::models::OperationRecord;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("Invalid remote apply configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Remote apply HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote apply API error: {0}")]
    Api(String),
}

/// Backend that makes an operation durable.
///
/// `Ok(false)` is a logical failure and is handled exactly like `Err`.
#[async_trait]
pub trait RemoteApply: Send + Sync {
    async fn apply(&self, record: &OperationRecord) -> Result<bool, ApplyError>;
}

/// Local state the UI reads from. Receives every optimistic write and every
/// corrective rollback write. Fire-and-forget.
pub trait LocalState: Send + Sync {
    fn reconcile(&self, record: &OperationRecord);
}
