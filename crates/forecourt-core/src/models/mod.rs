//! Data models for Forecourt

mod operation;

pub use operation::{
    NewUpdate, OperationId, OperationKind, OperationRecord, OperationState, RecordKey,
};
