//! Operation lifecycle state machine and the bounded in-memory log.
//!
//! `Pending → InProgress → {Completed, Failed, Cancelled}`. Records are
//! created directly in `InProgress`, mutated only through the methods here,
//! and frozen once terminal. At most one operation per item kind may be in
//! flight; disjoint kinds run independently.

use crate::error::{BulkError, BulkResult};
use crate::model::item::{ItemId, ItemKind};
use crate::model::operation::{
    ActionKind, BulkItemResult, BulkOperation, OperationId, OperationStatus,
};
use chrono::Utc;
use enum_map::EnumMap;
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Insertion-ordered operation log with a per-kind in-flight guard.
///
/// The log is bounded: once it grows past its retention cap the oldest
/// terminal records are evicted first. In-flight records are never evicted.
#[derive(Debug)]
pub struct OperationLog {
    ops: IndexMap<OperationId, BulkOperation>,
    active: EnumMap<ItemKind, Option<OperationId>>,
    retention: usize,
}

impl OperationLog {
    pub fn new(retention: usize) -> Self {
        Self {
            ops: IndexMap::new(),
            active: EnumMap::default(),
            retention,
        }
    }

    /// Create a new operation in `InProgress` and return its id.
    ///
    /// Rejects with [`BulkError::OperationInFlight`] when another operation
    /// for the same kind has not reached a terminal state yet.
    pub fn begin(
        &mut self,
        action: ActionKind,
        item_kind: ItemKind,
        item_ids: Vec<ItemId>,
    ) -> BulkResult<OperationId> {
        if let Some(active_id) = &self.active[item_kind] {
            return Err(BulkError::OperationInFlight {
                item_kind,
                operation_id: active_id.clone(),
            });
        }

        let op = BulkOperation::new(action, item_kind, item_ids);
        let id = op.id.clone();

        debug!(operation_id = %id, %action, %item_kind, total = op.total_items, "Operation started");

        self.ops.insert(id.clone(), op);
        self.active[item_kind] = Some(id.clone());
        self.prune();

        Ok(id)
    }

    /// Accumulate chunk counters. Only legal while `InProgress`.
    pub fn update_progress(
        &mut self,
        id: &str,
        processed_delta: usize,
        failed_delta: usize,
    ) -> BulkResult<()> {
        let op = self.get_mut(id)?;

        if op.status != OperationStatus::InProgress {
            return Err(BulkError::InvalidTransition {
                id: op.id.clone(),
                status: op.status,
                attempted: "update progress",
            });
        }

        let processed = op.processed_items + processed_delta;
        let failed = op.failed_items + failed_delta;

        if processed > op.total_items {
            return Err(BulkError::InvariantViolation {
                id: op.id.clone(),
                msg: format!("processed {processed} exceeds total {}", op.total_items),
            });
        }
        if failed > processed {
            return Err(BulkError::InvariantViolation {
                id: op.id.clone(),
                msg: format!("failed {failed} exceeds processed {processed}"),
            });
        }

        op.processed_items = processed;
        op.failed_items = failed;
        Ok(())
    }

    /// `InProgress → Completed`, partial failures included.
    ///
    /// `can_undo` is set only when the action kind supports rollback and at
    /// least one item succeeded.
    pub fn complete(
        &mut self,
        id: &str,
        results: Vec<BulkItemResult>,
    ) -> BulkResult<&BulkOperation> {
        self.finalize(id, OperationStatus::Completed, results, None)
    }

    /// `InProgress → Cancelled` at a batch checkpoint; the results of the
    /// chunks that did run are kept, unattempted ids are simply absent.
    pub fn complete_cancelled(
        &mut self,
        id: &str,
        results: Vec<BulkItemResult>,
    ) -> BulkResult<&BulkOperation> {
        self.finalize(id, OperationStatus::Cancelled, results, None)
    }

    /// `InProgress → Failed`. Reserved for operation-level breakage such as
    /// a violated handler contract, never for per-item failures.
    pub fn fail(
        &mut self,
        id: &str,
        error: String,
        results: Vec<BulkItemResult>,
    ) -> BulkResult<&BulkOperation> {
        warn!(operation_id = %id, error = %error, "Operation failed");
        self.finalize(id, OperationStatus::Failed, results, Some(error))
    }

    fn finalize(
        &mut self,
        id: &str,
        status: OperationStatus,
        results: Vec<BulkItemResult>,
        error: Option<String>,
    ) -> BulkResult<&BulkOperation> {
        let op = self.get_mut(id)?;

        if op.status != OperationStatus::InProgress {
            return Err(BulkError::InvalidTransition {
                id: op.id.clone(),
                status: op.status,
                attempted: "finalize",
            });
        }

        op.status = status;
        op.results = results;
        op.completed_at = Some(Utc::now());
        op.error = error;
        op.can_undo = status == OperationStatus::Completed
            && op.action.is_undoable()
            && op.failed_items < op.total_items;

        debug!(
            operation_id = %op.id,
            %status,
            processed = op.processed_items,
            failed = op.failed_items,
            "Operation reached terminal state"
        );

        let kind = op.item_kind;
        let op_id = op.id.clone();
        self.active[kind] = None;

        // Reborrow immutably for the return value.
        Ok(self.ops.get(op_id.as_str()).expect("operation just updated"))
    }

    pub fn get(&self, id: &str) -> Option<&BulkOperation> {
        self.ops.get(id)
    }

    /// Id of the in-flight operation for one kind, if any.
    pub fn active_id(&self, kind: ItemKind) -> Option<&OperationId> {
        self.active[kind].as_ref()
    }

    pub fn operations(&self) -> impl Iterator<Item = &BulkOperation> {
        self.ops.values()
    }

    pub fn terminal_operations(&self) -> impl Iterator<Item = &BulkOperation> {
        self.ops.values().filter(|op| op.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Re-insert terminal records restored from durable storage.
    ///
    /// In-flight records are never persisted, so anything non-terminal is
    /// dropped here rather than resurrected half-done.
    pub fn restore(&mut self, records: Vec<BulkOperation>) {
        for op in records {
            if !op.is_terminal() {
                warn!(operation_id = %op.id, "Dropping non-terminal persisted operation");
                continue;
            }
            self.ops.insert(op.id.clone(), op);
        }
        self.prune();
    }

    fn get_mut(&mut self, id: &str) -> BulkResult<&mut BulkOperation> {
        self.ops
            .get_mut(id)
            .ok_or_else(|| BulkError::UnknownOperation(OperationId::from(id)))
    }

    /// Evict the oldest terminal records once the log grows past retention.
    fn prune(&mut self) {
        while self.ops.len() > self.retention {
            let oldest_terminal = self
                .ops
                .iter()
                .find(|(_, op)| op.is_terminal())
                .map(|(id, _)| id.clone());

            match oldest_terminal {
                Some(id) => {
                    self.ops.shift_remove(id.as_str());
                }
                // Everything is in flight; nothing is evictable.
                None => break,
            }
        }
    }
}
