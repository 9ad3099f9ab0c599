//! Error types for forecourt-core

use thiserror::Error;

use crate::models::{OperationId, OperationState};

/// Result type alias using forecourt-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in forecourt-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// No record with this id exists in the store
    #[error("Operation not found: {0}")]
    OperationNotFound(OperationId),

    /// A record with this id is already stored
    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(OperationId),

    /// The requested state change is not an edge of the state machine
    #[error("Invalid transition for operation {id}: {from} -> {to}")]
    InvalidTransition {
        id: OperationId,
        from: OperationState,
        to: OperationState,
    },

    /// Configuration value out of range
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
