//! Read-model over the accumulated set of terminal operations.
//!
//! Everything here is recomputed on demand from the operation log; nothing
//! is incrementally maintained, so the figures cannot drift from the
//! records they summarize.

use crate::model::item::ItemKind;
use crate::model::operation::{ActionKind, BulkOperation, OperationId, OperationStatus};
use chrono::{DateTime, Utc};
use enum_map::EnumMap;
use std::time::Duration;

/// Compact view of one operation for "recent activity" surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSummary {
    pub id: OperationId,
    pub action: ActionKind,
    pub item_kind: ItemKind,
    pub status: OperationStatus,
    pub total_items: usize,
    pub failed_items: usize,
    pub started_at: DateTime<Utc>,
}

impl From<&BulkOperation> for OperationSummary {
    fn from(op: &BulkOperation) -> Self {
        Self {
            id: op.id.clone(),
            action: op.action,
            item_kind: op.item_kind,
            status: op.status,
            total_items: op.total_items,
            failed_items: op.failed_items,
            started_at: op.started_at,
        }
    }
}

/// Aggregated figures over terminal operations.
#[derive(Debug, Clone, Default)]
pub struct OperationStats {
    pub total_operations: usize,

    /// `Completed` with zero failed items.
    pub successful_operations: usize,

    /// `Completed` with at least one failed item; counted separately from
    /// both the successful and the failed buckets.
    pub partial_operations: usize,

    /// `Failed` or `Cancelled`.
    pub failed_operations: usize,

    pub total_items_processed: usize,

    /// Mean wall-clock duration over terminal operations carrying both
    /// timestamps.
    pub average_duration: Option<Duration>,

    pub most_used_action: Option<ActionKind>,

    /// The 10 most recent operations by start time, newest first.
    pub recent: Vec<OperationSummary>,
}

impl OperationStats {
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }
        self.successful_operations as f64 / self.total_operations as f64
    }

    /// One-line summary for status surfaces.
    pub fn report(&self) -> String {
        format!(
            "{} operations ({} ok, {} partial, {} failed), {} items processed",
            self.total_operations,
            self.successful_operations,
            self.partial_operations,
            self.failed_operations,
            self.total_items_processed,
        )
    }
}

/// How many summaries `aggregate` keeps in the recent list.
const RECENT_LIMIT: usize = 10;

/// Compute statistics over an iterator of terminal operations.
///
/// Non-terminal records are skipped defensively; callers normally pass
/// `OperationLog::terminal_operations()`.
pub fn aggregate<'a>(ops: impl Iterator<Item = &'a BulkOperation>) -> OperationStats {
    let mut stats = OperationStats::default();
    let mut action_counts: EnumMap<ActionKind, usize> = EnumMap::default();
    let mut duration_sum_ms: i64 = 0;
    let mut duration_count: usize = 0;
    let mut summaries: Vec<OperationSummary> = Vec::new();

    for op in ops.filter(|op| op.is_terminal()) {
        stats.total_operations += 1;
        stats.total_items_processed += op.processed_items;
        action_counts[op.action] += 1;

        match op.status {
            OperationStatus::Completed if op.failed_items == 0 => {
                stats.successful_operations += 1;
            }
            OperationStatus::Completed => {
                stats.partial_operations += 1;
            }
            OperationStatus::Failed | OperationStatus::Cancelled => {
                stats.failed_operations += 1;
            }
            OperationStatus::Pending | OperationStatus::InProgress => unreachable!("filtered above"),
        }

        if let Some(duration) = op.duration() {
            duration_sum_ms += duration.num_milliseconds();
            duration_count += 1;
        }

        summaries.push(OperationSummary::from(op));
    }

    if duration_count > 0 {
        let mean_ms = (duration_sum_ms / duration_count as i64).max(0) as u64;
        stats.average_duration = Some(Duration::from_millis(mean_ms));
    }

    stats.most_used_action = action_counts
        .iter()
        .filter(|(_, count)| **count > 0)
        .max_by_key(|(_, count)| **count)
        .map(|(action, _)| action);

    summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    summaries.truncate(RECENT_LIMIT);
    stats.recent = summaries;

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::item::ItemId;
    use chrono::TimeDelta;

    fn op(
        action: ActionKind,
        status: OperationStatus,
        processed: usize,
        failed: usize,
        duration_ms: i64,
    ) -> BulkOperation {
        let ids: Vec<ItemId> = (0..processed)
            .map(|i| ItemId::from(format!("i{i}")))
            .collect();
        let mut op = BulkOperation::new(action, ItemKind::Position, ids);
        op.status = status;
        op.processed_items = processed;
        op.failed_items = failed;
        op.completed_at = Some(op.started_at + TimeDelta::milliseconds(duration_ms));
        op
    }

    #[test]
    fn buckets_are_disjoint() {
        let ops = vec![
            op(ActionKind::Close, OperationStatus::Completed, 3, 0, 100),
            op(ActionKind::Close, OperationStatus::Completed, 5, 2, 100),
            op(ActionKind::Delete, OperationStatus::Cancelled, 2, 0, 100),
            op(ActionKind::Export, OperationStatus::Failed, 0, 0, 100),
        ];

        let stats = aggregate(ops.iter());
        assert_eq!(stats.total_operations, 4);
        assert_eq!(stats.successful_operations, 1);
        assert_eq!(stats.partial_operations, 1);
        assert_eq!(stats.failed_operations, 2);
        assert_eq!(stats.total_items_processed, 10);
    }

    #[test]
    fn in_flight_operations_are_ignored() {
        let mut in_flight = op(ActionKind::Close, OperationStatus::Completed, 1, 0, 50);
        in_flight.status = OperationStatus::InProgress;

        let stats = aggregate([&in_flight].into_iter());
        assert_eq!(stats.total_operations, 0);
    }

    #[test]
    fn average_duration_over_timestamped_operations() {
        let ops = vec![
            op(ActionKind::Close, OperationStatus::Completed, 1, 0, 100),
            op(ActionKind::Close, OperationStatus::Completed, 1, 0, 300),
        ];

        let stats = aggregate(ops.iter());
        assert_eq!(stats.average_duration, Some(Duration::from_millis(200)));
    }

    #[test]
    fn most_used_action_is_the_mode() {
        let ops = vec![
            op(ActionKind::Delete, OperationStatus::Completed, 1, 0, 10),
            op(ActionKind::Delete, OperationStatus::Cancelled, 1, 0, 10),
            op(ActionKind::Close, OperationStatus::Completed, 1, 0, 10),
        ];

        let stats = aggregate(ops.iter());
        assert_eq!(stats.most_used_action, Some(ActionKind::Delete));
    }

    #[test]
    fn recent_is_newest_first_and_capped() {
        let mut ops = Vec::new();
        for i in 0..15 {
            let mut one = op(ActionKind::Export, OperationStatus::Completed, 1, 0, 10);
            one.started_at = Utc::now() + TimeDelta::seconds(i);
            ops.push(one);
        }

        let stats = aggregate(ops.iter());
        assert_eq!(stats.recent.len(), 10);
        for pair in stats.recent.windows(2) {
            assert!(pair[0].started_at >= pair[1].started_at);
        }
    }

    #[test]
    fn empty_log_yields_empty_stats() {
        let stats = aggregate(std::iter::empty());
        assert_eq!(stats.total_operations, 0);
        assert_eq!(stats.average_duration, None);
        assert_eq!(stats.most_used_action, None);
        assert_eq!(stats.success_rate(), 0.0);
    }
}
