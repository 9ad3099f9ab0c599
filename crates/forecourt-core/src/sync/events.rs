use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::reconciler::CycleReport;
use crate::metrics::SyncMetrics;
use crate::models::{OperationId, OperationKind, OperationState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Notifications emitted by the engine for UIs, loggers and tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    Created {
        id: OperationId,
        resource_id: String,
        kind: OperationKind,
    },
    StateChanged {
        id: OperationId,
        from: OperationState,
        to: OperationState,
    },
    RolledBack {
        id: OperationId,
        corrective_applied: bool,
    },
    CycleCompleted(CycleReport),
    MetricsUpdated(SyncMetrics),
}

#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub(crate) fn emit(&self, event: SyncEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }
}
