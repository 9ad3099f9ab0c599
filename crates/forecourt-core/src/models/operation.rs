//! Operation record model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{Error, Result};

/// A unique identifier for an operation record, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Create a new unique operation ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s.trim())?))
    }
}

/// The kind of write an operation performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Estimated round-trip time, used only for progress display.
    pub const fn expected_duration_ms(self) -> u64 {
        match self {
            Self::Create => 2_000,
            Self::Update => 1_500,
            Self::Delete => 1_000,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OperationKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidConfig(format!(
                "unknown operation kind '{other}' (expected create, update or delete)"
            ))),
        }
    }
}

/// Synchronization state of an operation record.
///
/// ```text
/// Pending -> Confirmed | Failed | RolledBack (forced)
/// Failed  -> Pending (retry) | RolledBack
/// Confirmed, RolledBack: terminal
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Pending,
    Confirmed,
    Failed,
    RolledBack,
}

impl OperationState {
    /// Whether `next` is an edge of the state machine from `self`.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Confirmed | Self::Failed | Self::RolledBack
            ) | (Self::Failed, Self::Pending | Self::RolledBack)
        )
    }

    /// Confirmed and RolledBack records never transition again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Confirmed | Self::RolledBack)
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
            Self::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for OperationState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "failed" => Ok(Self::Failed),
            "rolled_back" | "rolledback" => Ok(Self::RolledBack),
            other => Err(Error::InvalidConfig(format!(
                "unknown operation state '{other}'"
            ))),
        }
    }
}

/// Identifier of the affected row: whatever the payload carried as `id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    Number(i64),
    Text(String),
}

impl RecordKey {
    /// Read the row key from the payload's `id` field, falling back to
    /// `fallback_ms` when it is missing or not a scalar.
    pub fn from_payload(payload: &Value, fallback_ms: i64) -> Self {
        match payload.get("id") {
            Some(Value::Number(number)) => number
                .as_i64()
                .map_or_else(|| Self::Text(number.to_string()), Self::Number),
            Some(Value::String(text)) if !text.trim().is_empty() => Self::Text(text.clone()),
            _ => Self::Number(fallback_ms),
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// Input for a new optimistic update, as produced by a UI trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUpdate {
    pub resource_id: String,
    pub kind: OperationKind,
    pub local_payload: Value,
    #[serde(default)]
    pub prior_payload: Option<Value>,
}

impl NewUpdate {
    pub fn new(resource_id: impl Into<String>, kind: OperationKind, local_payload: Value) -> Self {
        Self {
            resource_id: resource_id.into(),
            kind,
            local_payload,
            prior_payload: None,
        }
    }

    #[must_use]
    pub fn with_prior(mut self, prior_payload: Value) -> Self {
        self.prior_payload = Some(prior_payload);
        self
    }
}

/// One attempted write and its synchronization history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    /// Unique identifier
    pub id: OperationId,
    /// Logical table/entity name
    pub resource_id: String,
    /// Affected row
    pub record_key: RecordKey,
    pub kind: OperationKind,
    /// Desired post-state
    pub local_payload: Value,
    /// Pre-state, used for corrective rollback
    pub prior_payload: Option<Value>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last transition timestamp (Unix ms)
    pub updated_at: i64,
    pub state: OperationState,
    pub retry_count: u32,
    pub expected_duration_ms: u64,
    /// Elapsed time of every sync attempt, in order (ms)
    pub attempt_durations: Vec<u64>,
    /// Description of the most recent failure, for display
    pub last_error: Option<String>,
}

impl OperationRecord {
    /// Create a pending record for `update`, stamped with the current time.
    #[must_use]
    pub fn new(update: NewUpdate) -> Self {
        Self::new_at(update, crate::util::unix_millis_now())
    }

    /// Create a pending record stamped with `now_ms`.
    #[must_use]
    pub fn new_at(update: NewUpdate, now_ms: i64) -> Self {
        let record_key = RecordKey::from_payload(&update.local_payload, now_ms);
        Self {
            id: OperationId::new(),
            resource_id: update.resource_id,
            record_key,
            kind: update.kind,
            local_payload: update.local_payload,
            prior_payload: update.prior_payload,
            created_at: now_ms,
            updated_at: now_ms,
            state: OperationState::Pending,
            retry_count: 0,
            expected_duration_ms: update.kind.expected_duration_ms(),
            attempt_durations: Vec::new(),
            last_error: None,
        }
    }

    /// Move to `next`, returning the previous state.
    pub fn transition(&mut self, next: OperationState, now_ms: i64) -> Result<OperationState> {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                id: self.id,
                from: previous,
                to: next,
            });
        }
        self.state = next;
        self.updated_at = now_ms;
        Ok(previous)
    }

    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// The local-state write that undoes this record, when a prior payload exists.
    pub fn corrective_update(&self) -> Option<Self> {
        let prior = self.prior_payload.clone()?;
        Some(Self {
            kind: OperationKind::Update,
            local_payload: prior,
            ..self.clone()
        })
    }

    /// Display progress in percent, estimated from `expected_duration_ms`.
    pub fn progress_pct(&self, now_ms: i64) -> u8 {
        match self.state {
            OperationState::Confirmed | OperationState::RolledBack => 100,
            OperationState::Failed => 0,
            OperationState::Pending => {
                let elapsed = u64::try_from(now_ms.saturating_sub(self.updated_at)).unwrap_or(0);
                let expected = self.expected_duration_ms.max(1);
                let pct = elapsed.saturating_mul(100) / expected;
                u8::try_from(pct.min(100)).unwrap_or(100)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn pending(kind: OperationKind, payload: Value) -> OperationRecord {
        OperationRecord::new_at(NewUpdate::new("products", kind, payload), 1_000)
    }

    #[test]
    fn test_operation_id_unique() {
        assert_ne!(OperationId::new(), OperationId::new());
    }

    #[test]
    fn test_operation_id_parse() {
        let id = OperationId::new();
        let parsed: OperationId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_record_key_from_payload() {
        assert_eq!(
            RecordKey::from_payload(&json!({"id": 42}), 7),
            RecordKey::Number(42)
        );
        assert_eq!(
            RecordKey::from_payload(&json!({"id": "pump-3"}), 7),
            RecordKey::Text("pump-3".to_string())
        );
        assert_eq!(
            RecordKey::from_payload(&json!({"name": "diesel"}), 7),
            RecordKey::Number(7)
        );
        assert_eq!(RecordKey::from_payload(&json!({"id": ""}), 7), RecordKey::Number(7));
    }

    #[test]
    fn test_new_record_defaults() {
        let record = pending(OperationKind::Update, json!({"id": 1, "price": 3.49}));
        assert_eq!(record.state, OperationState::Pending);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.expected_duration_ms, 1_500);
        assert!(record.attempt_durations.is_empty());
        assert_eq!(record.record_key, RecordKey::Number(1));
    }

    #[test]
    fn test_state_machine_edges() {
        use OperationState::{Confirmed, Failed, Pending, RolledBack};

        assert!(Pending.can_transition_to(Confirmed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Pending.can_transition_to(RolledBack));
        assert!(Failed.can_transition_to(Pending));
        assert!(Failed.can_transition_to(RolledBack));

        assert!(!Confirmed.can_transition_to(Pending));
        assert!(!Confirmed.can_transition_to(Failed));
        assert!(!RolledBack.can_transition_to(Pending));
        assert!(!Failed.can_transition_to(Confirmed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn test_transition_rejects_terminal_exit() {
        let mut record = pending(OperationKind::Create, json!({}));
        record.transition(OperationState::Confirmed, 2_000).unwrap();
        assert_eq!(record.updated_at, 2_000);

        let err = record.transition(OperationState::Pending, 3_000).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert_eq!(record.state, OperationState::Confirmed);
        assert_eq!(record.updated_at, 2_000);
    }

    #[test]
    fn test_corrective_update_uses_prior_payload() {
        let record = OperationRecord::new_at(
            NewUpdate::new("products", OperationKind::Delete, json!({"id": 5}))
                .with_prior(json!({"id": 5, "price": 9.99})),
            1_000,
        );
        let corrective = record.corrective_update().unwrap();
        assert_eq!(corrective.kind, OperationKind::Update);
        assert_eq!(corrective.local_payload, json!({"id": 5, "price": 9.99}));
        assert_eq!(corrective.id, record.id);

        let no_prior = pending(OperationKind::Create, json!({"id": 6}));
        assert!(no_prior.corrective_update().is_none());
    }

    #[test]
    fn test_progress_pct() {
        let mut record = pending(OperationKind::Delete, json!({}));
        assert_eq!(record.progress_pct(1_000), 0);
        assert_eq!(record.progress_pct(1_500), 50);
        assert_eq!(record.progress_pct(60_000), 100);

        record.transition(OperationState::Failed, 1_200).unwrap();
        assert_eq!(record.progress_pct(5_000), 0);
    }

    #[test]
    fn test_state_and_kind_parse() {
        assert_eq!(
            "rolled-back".parse::<OperationState>().unwrap(),
            OperationState::RolledBack
        );
        assert_eq!(" Update ".parse::<OperationKind>().unwrap(), OperationKind::Update);
        assert!("upsert".parse::<OperationKind>().is_err());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let value = serde_json::to_value(OperationState::RolledBack).unwrap();
        assert_eq!(value, json!("rolled_back"));
    }
}
