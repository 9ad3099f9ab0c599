//! Rolling sync performance statistics derived from the operation store.

use serde::{Deserialize, Serialize};

use crate::models::{OperationRecord, OperationState};

/// Read-side projection of the store, recomputed after every cycle,
/// rollback and clear.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetrics {
    /// Mean of every attempt duration on settled records (ms)
    pub average_response_time_ms: f64,
    /// `confirmed / (confirmed + failed + rolled_back) * 100`
    pub success_rate_pct: f64,
    pub total_operations: usize,
    pub pending_operations: usize,
    pub confirmed_operations: usize,
    pub failed_operations: usize,
    pub rolled_back_operations: usize,
}

impl SyncMetrics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a OperationRecord>) -> Self {
        let mut metrics = Self::default();
        let mut duration_sum: u128 = 0;
        let mut duration_count: u64 = 0;

        for record in records {
            metrics.total_operations += 1;
            match record.state {
                OperationState::Pending => {
                    metrics.pending_operations += 1;
                    continue;
                }
                OperationState::Confirmed => metrics.confirmed_operations += 1,
                OperationState::Failed => metrics.failed_operations += 1,
                OperationState::RolledBack => metrics.rolled_back_operations += 1,
            }
            for duration in &record.attempt_durations {
                duration_sum += u128::from(*duration);
                duration_count += 1;
            }
        }

        if duration_count > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                metrics.average_response_time_ms = duration_sum as f64 / duration_count as f64;
            }
        }

        let settled = metrics.confirmed_operations
            + metrics.failed_operations
            + metrics.rolled_back_operations;
        if settled > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                metrics.success_rate_pct =
                    metrics.confirmed_operations as f64 / settled as f64 * 100.0;
            }
        }

        metrics
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::models::{NewUpdate, OperationKind};

    fn record_with(state: OperationState, durations: &[u64]) -> OperationRecord {
        let mut record = OperationRecord::new_at(
            NewUpdate::new("fuel_tanks", OperationKind::Update, json!({"id": 1})),
            0,
        );
        record.state = state;
        record.attempt_durations = durations.to_vec();
        record
    }

    #[test]
    fn empty_store_yields_zeroes() {
        assert_eq!(SyncMetrics::from_records(std::iter::empty()), SyncMetrics::default());
    }

    #[test]
    fn success_rate_over_settled_records() {
        let records = vec![
            record_with(OperationState::Confirmed, &[100]),
            record_with(OperationState::Confirmed, &[100]),
            record_with(OperationState::Confirmed, &[100]),
            record_with(OperationState::Failed, &[100]),
            record_with(OperationState::RolledBack, &[100]),
            record_with(OperationState::Pending, &[]),
            record_with(OperationState::Pending, &[]),
        ];

        let metrics = SyncMetrics::from_records(&records);
        assert!((metrics.success_rate_pct - 60.0).abs() < f64::EPSILON);
        assert_eq!(metrics.total_operations, 7);
        assert_eq!(metrics.pending_operations, 2);
        assert_eq!(metrics.rolled_back_operations, 1);
        assert_eq!(metrics.confirmed_operations, 3);
        assert_eq!(metrics.failed_operations, 1);
    }

    #[test]
    fn average_flattens_every_attempt() {
        let records = vec![
            record_with(OperationState::Confirmed, &[100]),
            record_with(OperationState::RolledBack, &[200, 400, 600]),
            // Pending durations from earlier attempts are not counted
            record_with(OperationState::Pending, &[10_000]),
        ];

        let metrics = SyncMetrics::from_records(&records);
        assert!((metrics.average_response_time_ms - 325.0).abs() < f64::EPSILON);
    }

    #[test]
    fn only_pending_records_have_zero_rate() {
        let records = vec![record_with(OperationState::Pending, &[])];
        let metrics = SyncMetrics::from_records(&records);
        assert_eq!(metrics.success_rate_pct, 0.0);
        assert_eq!(metrics.average_response_time_ms, 0.0);
        assert_eq!(metrics.pending_operations, 1);
    }
}
