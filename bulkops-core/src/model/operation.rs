use crate::model::item::{ItemId, ItemKind};
use crate::model::rollback::RollbackItem;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use enum_map::Enum;
use serde::{Deserialize, Serialize};

/// Identifier of one bulk operation.
pub type OperationId = CompactString;

/// The closed set of actions an operator can apply in bulk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Close,
    Cancel,
    Tag,
    Export,
    Delete,
    Enable,
    Disable,
    Duplicate,
    UpdateStatus,
    UpdateTags,
    UpdateNotes,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Close => "close",
            ActionKind::Cancel => "cancel",
            ActionKind::Tag => "tag",
            ActionKind::Export => "export",
            ActionKind::Delete => "delete",
            ActionKind::Enable => "enable",
            ActionKind::Disable => "disable",
            ActionKind::Duplicate => "duplicate",
            ActionKind::UpdateStatus => "update_status",
            ActionKind::UpdateTags => "update_tags",
            ActionKind::UpdateNotes => "update_notes",
        }
    }

    /// Past-tense label for descriptions ("Closed 3 positions").
    pub fn past_tense(&self) -> &'static str {
        match self {
            ActionKind::Close => "Closed",
            ActionKind::Cancel => "Cancelled",
            ActionKind::Tag => "Tagged",
            ActionKind::Export => "Exported",
            ActionKind::Delete => "Deleted",
            ActionKind::Enable => "Enabled",
            ActionKind::Disable => "Disabled",
            ActionKind::Duplicate => "Duplicated",
            ActionKind::UpdateStatus => "Updated status of",
            ActionKind::UpdateTags => "Updated tags of",
            ActionKind::UpdateNotes => "Updated notes of",
        }
    }

    /// Whether a rollback payload is captured and the action is eligible
    /// for undo.
    pub fn is_undoable(&self) -> bool {
        matches!(
            self,
            ActionKind::Close
                | ActionKind::Delete
                | ActionKind::Tag
                | ActionKind::Enable
                | ActionKind::Disable
        )
    }

    /// Advisory metadata for UI layers; the engine never enforces this.
    pub fn requires_confirmation(&self) -> bool {
        matches!(
            self,
            ActionKind::Close | ActionKind::Cancel | ActionKind::Delete | ActionKind::Disable
        )
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle states of one bulk operation.
///
/// `Pending → InProgress → {Completed, Failed, Cancelled}`; the three
/// right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            OperationStatus::Pending => "pending",
            OperationStatus::InProgress => "in_progress",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome of one item within a bulk operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemResult {
    pub item_id: ItemId,

    pub success: bool,

    /// Error message when the item failed.
    pub error: Option<String>,

    /// Pre-action capture, present only for undoable action kinds.
    pub rollback: Option<RollbackItem>,
}

impl BulkItemResult {
    pub fn succeeded(item_id: ItemId, rollback: Option<RollbackItem>) -> Self {
        Self {
            item_id,
            success: true,
            error: None,
            rollback,
        }
    }

    pub fn failed(item_id: ItemId, error: impl Into<String>) -> Self {
        Self {
            item_id,
            success: false,
            error: Some(error.into()),
            rollback: None,
        }
    }
}

/// One bulk operation record.
///
/// Created by the engine, mutated only by the executor while `InProgress`,
/// immutable once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOperation {
    pub id: OperationId,

    pub action: ActionKind,

    pub item_kind: ItemKind,

    /// Target ids in the order the caller supplied them; chunking preserves
    /// this order.
    pub item_ids: Vec<ItemId>,

    pub status: OperationStatus,

    pub total_items: usize,

    pub processed_items: usize,

    pub failed_items: usize,

    pub results: Vec<BulkItemResult>,

    pub started_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,

    pub can_undo: bool,

    /// Operation-level failure message; per-item failures live in `results`.
    pub error: Option<String>,
}

impl BulkOperation {
    pub fn new(action: ActionKind, item_kind: ItemKind, item_ids: Vec<ItemId>) -> Self {
        let total_items = item_ids.len();
        Self {
            id: OperationId::from(nanoid::nanoid!()),
            action,
            item_kind,
            item_ids,
            status: OperationStatus::InProgress,
            total_items,
            processed_items: 0,
            failed_items: 0,
            results: Vec::with_capacity(total_items),
            started_at: Utc::now(),
            completed_at: None,
            can_undo: false,
            error: None,
        }
    }

    /// Progress percentage, derived from the counters and never stored.
    pub fn progress(&self) -> f64 {
        if self.total_items == 0 {
            return 0.0;
        }
        self.processed_items as f64 / self.total_items as f64 * 100.0
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Wall-clock duration, available once both timestamps exist.
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|done| done - self.started_at)
    }

    /// Ids with a successful per-item result.
    pub fn succeeded_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.results
            .iter()
            .filter(|r| r.success)
            .map(|r| &r.item_id)
    }

    /// Ids with a failed per-item result.
    pub fn failed_ids(&self) -> impl Iterator<Item = &ItemId> {
        self.results
            .iter()
            .filter(|r| !r.success)
            .map(|r| &r.item_id)
    }
}

impl std::fmt::Display for BulkOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({} {} on {} {})",
            self.status, self.id, self.action, self.total_items, self.item_kind
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(n: usize) -> Vec<ItemId> {
        (0..n).map(|i| ItemId::from(format!("item-{i}"))).collect()
    }

    #[test]
    fn progress_is_derived_from_counters() {
        let mut op = BulkOperation::new(ActionKind::Close, ItemKind::Position, ids(4));
        assert_eq!(op.progress(), 0.0);

        op.processed_items = 1;
        assert_eq!(op.progress(), 25.0);

        op.processed_items = 4;
        assert_eq!(op.progress(), 100.0);
    }

    #[test]
    fn zero_total_progress_is_zero() {
        let op = BulkOperation::new(ActionKind::Export, ItemKind::Alert, Vec::new());
        assert_eq!(op.progress(), 0.0);
    }

    #[test]
    fn undoable_set_is_closed() {
        let undoable = [
            ActionKind::Close,
            ActionKind::Delete,
            ActionKind::Tag,
            ActionKind::Enable,
            ActionKind::Disable,
        ];
        for action in undoable {
            assert!(action.is_undoable(), "{action} should be undoable");
        }

        for action in [
            ActionKind::Cancel,
            ActionKind::Export,
            ActionKind::Duplicate,
            ActionKind::UpdateStatus,
            ActionKind::UpdateTags,
            ActionKind::UpdateNotes,
        ] {
            assert!(!action.is_undoable(), "{action} should not be undoable");
        }
    }
}
