//! The engine service object.
//!
//! One explicit [`BulkEngine`] instance owns the selection registry, the
//! operation log, the undo stack, the handler registry, and the event
//! channel. It is injected into calling code explicitly; there is no
//! ambient singleton. Cloning the engine clones a handle to the same
//! underlying state.

use crate::config::EngineConfig;
use crate::engine::executor::{BatchExecutor, ChunkUpdate, ExecutionOutcome};
use crate::engine::handler::ActionHandler;
use crate::engine::lifecycle::OperationLog;
use crate::engine::scheduler::{Scheduler, TokioScheduler};
use crate::engine::selection::SelectionRegistry;
use crate::error::{BulkError, BulkResult};
use crate::model::item::{ItemId, ItemKind, SelectionMode};
use crate::model::operation::{ActionKind, BulkOperation, OperationId, OperationStatus};
use crate::model::rollback::{RollbackItem, RollbackPayload, UndoableAction};
use crate::persistence::{self, StateStore, OPERATIONS_KEY, UNDO_KEY};
use crate::stats::{self, OperationStats};
use dashmap::DashMap;
use enum_map::EnumMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use undor::{UndoStack, UndoStackStats};

/// Engine notifications pushed to subscribers.
///
/// Progress is emitted after every chunk boundary, never only at
/// completion.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SelectionChanged {
        item_kind: ItemKind,
        selected: usize,
    },

    OperationStarted {
        operation_id: OperationId,
        action: ActionKind,
        item_kind: ItemKind,
        total_items: usize,
    },

    OperationProgress {
        operation_id: OperationId,
        processed_items: usize,
        failed_items: usize,
        total_items: usize,
    },

    OperationFinished {
        operation_id: OperationId,
        status: OperationStatus,
        processed_items: usize,
        failed_items: usize,
    },

    UndoApplied {
        action: ActionKind,
        item_kind: ItemKind,
    },

    RedoApplied {
        action: ActionKind,
        item_kind: ItemKind,
    },
}

/// Handle to one bulk operation engine.
#[derive(Clone)]
pub struct BulkEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: EngineConfig,
    selection: RwLock<SelectionRegistry>,
    log: RwLock<OperationLog>,
    undo: RwLock<UndoStack<UndoableAction>>,
    handlers: RwLock<EnumMap<ItemKind, Option<Arc<dyn ActionHandler>>>>,
    tokens: DashMap<OperationId, CancellationToken>,
    events: broadcast::Sender<EngineEvent>,
    scheduler: Arc<dyn Scheduler>,
    store: Option<Arc<dyn StateStore>>,
}

impl BulkEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_parts(config, Arc::new(TokioScheduler), None)
    }

    /// Construct with an explicit scheduler and optional state store; this
    /// is the constructor tests use to drive time deterministically.
    pub fn with_parts(
        config: EngineConfig,
        scheduler: Arc<dyn Scheduler>,
        store: Option<Arc<dyn StateStore>>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let inner = EngineInner {
            log: RwLock::new(OperationLog::new(config.history.max_in_memory)),
            undo: RwLock::new(UndoStack::new(config.undo.clone())),
            selection: RwLock::new(SelectionRegistry::new()),
            handlers: RwLock::new(EnumMap::default()),
            tokens: DashMap::new(),
            events,
            scheduler,
            store,
            config,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Register the action handler for one item kind, replacing any
    /// previous one.
    pub fn register_handler(&self, kind: ItemKind, handler: Arc<dyn ActionHandler>) {
        self.inner.handlers.write()[kind] = Some(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // ------------------------------------------------------------------
    // Selection facade
    // ------------------------------------------------------------------

    pub fn select(&self, kind: ItemKind, id: ItemId) {
        self.inner.selection.write().select(kind, id);
        self.emit_selection(kind);
    }

    pub fn deselect(&self, kind: ItemKind, id: &str) {
        self.inner.selection.write().deselect(kind, id);
        self.emit_selection(kind);
    }

    pub fn toggle(&self, kind: ItemKind, id: ItemId) {
        self.inner.selection.write().toggle(kind, id);
        self.emit_selection(kind);
    }

    pub fn select_all(&self, kind: ItemKind, all_ids: impl IntoIterator<Item = ItemId>) {
        self.inner.selection.write().select_all(kind, all_ids);
        self.emit_selection(kind);
    }

    pub fn deselect_all(&self, kind: ItemKind) {
        self.inner.selection.write().deselect_all(kind);
        self.emit_selection(kind);
    }

    /// Empty the selections of every item kind at once.
    pub fn clear_selections(&self) {
        self.inner.selection.write().clear_all();
        for kind in [
            ItemKind::Position,
            ItemKind::Trade,
            ItemKind::Alert,
            ItemKind::Order,
        ] {
            self.emit_selection(kind);
        }
    }

    pub fn is_selected(&self, kind: ItemKind, id: &str) -> bool {
        self.inner.selection.read().is_selected(kind, id)
    }

    pub fn selected_ids(&self, kind: ItemKind) -> Vec<ItemId> {
        self.inner.selection.read().selected_ids(kind)
    }

    pub fn selected_count(&self, kind: ItemKind) -> usize {
        self.inner.selection.read().selected_count(kind)
    }

    pub fn selection_mode(&self, kind: ItemKind, all_ids: &[ItemId]) -> SelectionMode {
        self.inner.selection.read().mode(kind, all_ids)
    }

    fn emit_selection(&self, kind: ItemKind) {
        let selected = self.inner.selection.read().selected_count(kind);
        self.inner.emit(EngineEvent::SelectionChanged {
            item_kind: kind,
            selected,
        });
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Start a bulk action over the current selection for `item_kind`.
    pub fn start(&self, action: ActionKind, item_kind: ItemKind) -> BulkResult<OperationId> {
        let item_ids = self.selected_ids(item_kind);
        self.start_with_items(action, item_kind, item_ids)
    }

    /// Start a bulk action over an explicit id list.
    ///
    /// Validation and the per-kind concurrency guard run synchronously;
    /// everything after that is absorbed into the operation's own results.
    #[instrument(
        level = "info",
        skip(self, item_ids),
        fields(%action, %item_kind, count = item_ids.len())
    )]
    pub fn start_with_items(
        &self,
        action: ActionKind,
        item_kind: ItemKind,
        item_ids: Vec<ItemId>,
    ) -> BulkResult<OperationId> {
        if item_ids.is_empty() {
            return Err(BulkError::EmptySelection(item_kind));
        }

        let handler = self.inner.handlers.read()[item_kind]
            .clone()
            .ok_or(BulkError::NoHandler(item_kind))?;

        let operation_id = self
            .inner
            .log
            .write()
            .begin(action, item_kind, item_ids.clone())?;

        let token = CancellationToken::new();
        self.inner.tokens.insert(operation_id.clone(), token.clone());

        self.inner.emit(EngineEvent::OperationStarted {
            operation_id: operation_id.clone(),
            action,
            item_kind,
            total_items: item_ids.len(),
        });

        let executor = BatchExecutor::new(
            operation_id.clone(),
            action,
            item_ids,
            handler,
            self.inner.config.executor,
            token,
            self.inner.scheduler.clone(),
        );

        let inner = self.inner.clone();
        let update_inner = self.inner.clone();
        let task_op_id = operation_id.clone();
        tokio::spawn(async move {
            let outcome = executor
                .execute(move |update| update_inner.apply_chunk_update(update))
                .await;
            inner.finalize_operation(task_op_id, item_kind, outcome).await;
        });

        Ok(operation_id)
    }

    /// Request cooperative cancellation.
    ///
    /// The in-flight chunk still runs to completion and keeps its results;
    /// the operation transitions to `Cancelled` at the next checkpoint.
    pub fn cancel(&self, operation_id: &str) -> BulkResult<()> {
        if let Some(token) = self.inner.tokens.get(operation_id) {
            info!(operation_id, "Cancellation requested");
            token.cancel();
            return Ok(());
        }

        // Already terminal: nothing to do. Never seen: caller bug.
        match self.inner.log.read().get(operation_id) {
            Some(_) => Ok(()),
            None => Err(BulkError::UnknownOperation(OperationId::from(operation_id))),
        }
    }

    pub fn operation(&self, operation_id: &str) -> Option<BulkOperation> {
        self.inner.log.read().get(operation_id).cloned()
    }

    pub fn operations(&self) -> Vec<BulkOperation> {
        self.inner.log.read().operations().cloned().collect()
    }

    /// Id of the in-flight operation for `kind`, if any.
    pub fn active_operation(&self, kind: ItemKind) -> Option<OperationId> {
        self.inner.log.read().active_id(kind).cloned()
    }

    pub fn stats(&self) -> OperationStats {
        stats::aggregate(self.inner.log.read().terminal_operations())
    }

    // ------------------------------------------------------------------
    // Undo / redo
    // ------------------------------------------------------------------

    pub fn peek_undo(&self) -> Option<UndoableAction> {
        self.inner.undo.read().peek_undo().cloned()
    }

    pub fn undo_stats(&self) -> UndoStackStats {
        self.inner.undo.read().stats()
    }

    /// Reverse the most recent undoable action by applying its rollback
    /// payload through the item kind's handler.
    ///
    /// A failed rollback application leaves both history sequences exactly
    /// as they were.
    pub async fn undo(&self) -> BulkResult<UndoableAction> {
        let entry = self.inner.undo.write().pop_undo()?;

        let handler = match self.inner.handlers.read()[entry.item_kind].clone() {
            Some(handler) => handler,
            None => {
                self.inner.undo.write().restore_undo(entry.clone());
                return Err(BulkError::NoHandler(entry.item_kind));
            }
        };

        let Some(payload) = entry.payload.clone() else {
            // Reversible entries always carry a payload; guard anyway so a
            // bad hydrate cannot panic the engine.
            self.inner.undo.write().restore_undo(entry.clone());
            return Err(BulkError::NotUndoableKind(entry.action));
        };

        match handler.revert(&payload).await {
            Ok(()) => {
                self.inner.undo.write().push_redo(entry.clone());
                info!(action = %entry.action, items = entry.item_ids.len(), "Undo applied");
                self.inner.persist().await;
                self.inner.emit(EngineEvent::UndoApplied {
                    action: entry.action,
                    item_kind: entry.item_kind,
                });
                Ok(entry)
            }
            Err(err) => {
                warn!(action = %entry.action, error = %err, "Rollback application failed");
                self.inner.undo.write().restore_undo(entry.clone());
                Err(BulkError::RollbackFailed {
                    action: entry.action,
                    msg: err.to_string(),
                })
            }
        }
    }

    /// Re-apply the most recently undone action.
    pub async fn redo(&self) -> BulkResult<UndoableAction> {
        let entry = self.inner.undo.write().pop_redo()?;

        let handler = match self.inner.handlers.read()[entry.item_kind].clone() {
            Some(handler) => handler,
            None => {
                self.inner.undo.write().restore_redo(entry.clone());
                return Err(BulkError::NoHandler(entry.item_kind));
            }
        };

        match handler.reapply(entry.action, &entry.item_ids).await {
            Ok(()) => {
                // Back onto the undo sequence without clearing what is left
                // of redo.
                self.inner.undo.write().restore_undo(entry.clone());
                info!(action = %entry.action, items = entry.item_ids.len(), "Redo applied");
                self.inner.persist().await;
                self.inner.emit(EngineEvent::RedoApplied {
                    action: entry.action,
                    item_kind: entry.item_kind,
                });
                Ok(entry)
            }
            Err(err) => {
                warn!(action = %entry.action, error = %err, "Redo application failed");
                self.inner.undo.write().restore_redo(entry.clone());
                Err(BulkError::RollbackFailed {
                    action: entry.action,
                    msg: err.to_string(),
                })
            }
        }
    }

    // ------------------------------------------------------------------
    // Durable state
    // ------------------------------------------------------------------

    /// Restore the persisted operation and undo slices. Call once at
    /// startup, before any operation runs.
    pub async fn hydrate(&self) -> BulkResult<()> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };

        let ops: Vec<BulkOperation> = persistence::load_slice(store.as_ref(), OPERATIONS_KEY)
            .await
            .map_err(BulkError::Persistence)?;
        let undo_entries: Vec<UndoableAction> = persistence::load_slice(store.as_ref(), UNDO_KEY)
            .await
            .map_err(BulkError::Persistence)?;

        info!(
            operations = ops.len(),
            undo_entries = undo_entries.len(),
            "Hydrated persisted state"
        );

        self.inner.log.write().restore(ops);

        let mut undo = self.inner.undo.write();
        for entry in undo_entries {
            undo.push(entry);
        }

        Ok(())
    }
}

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        // A send error only means nobody is subscribed right now.
        let _ = self.events.send(event);
    }

    /// Sync progress application; runs in the executor's callback between
    /// suspension points.
    fn apply_chunk_update(&self, update: ChunkUpdate) {
        let snapshot = {
            let mut log = self.log.write();
            if let Err(err) =
                log.update_progress(&update.operation_id, update.processed_delta, update.failed_delta)
            {
                error!(operation_id = %update.operation_id, error = %err, "Progress update rejected");
                return;
            }
            log.get(&update.operation_id)
                .map(|op| (op.processed_items, op.failed_items, op.total_items))
        };

        if let Some((processed_items, failed_items, total_items)) = snapshot {
            self.emit(EngineEvent::OperationProgress {
                operation_id: update.operation_id,
                processed_items,
                failed_items,
                total_items,
            });
        }
    }

    async fn finalize_operation(
        self: Arc<Self>,
        operation_id: OperationId,
        item_kind: ItemKind,
        outcome: ExecutionOutcome,
    ) {
        let snapshot: Option<BulkOperation> = {
            let mut log = self.log.write();
            let finalized = match outcome {
                ExecutionOutcome::Completed(results) => log.complete(&operation_id, results),
                ExecutionOutcome::Cancelled(results) => {
                    log.complete_cancelled(&operation_id, results)
                }
                ExecutionOutcome::Failed { error, results } => {
                    log.fail(&operation_id, error, results)
                }
            };

            match finalized {
                Ok(op) => Some(op.clone()),
                Err(err) => {
                    error!(operation_id = %operation_id, error = %err, "Finalization rejected");
                    None
                }
            }
        };

        self.tokens.remove(&operation_id);

        let Some(op) = snapshot else { return };

        // Satisfied ids leave the selection; failed and unattempted ids
        // stay selected so the operator can retry exactly those.
        let succeeded: Vec<ItemId> = op.succeeded_ids().cloned().collect();
        if !succeeded.is_empty() {
            self.selection.write().deselect_many(item_kind, succeeded.iter());
        }
        let selected = self.selection.read().selected_count(item_kind);
        self.emit(EngineEvent::SelectionChanged {
            item_kind,
            selected,
        });

        // Completed operations with at least one success enter the action
        // history; cancelled and failed operations never do.
        if op.status == OperationStatus::Completed && !succeeded.is_empty() {
            match self.build_history_entry(&op) {
                Ok(entry) => self.undo.write().push(entry),
                Err(err) => {
                    warn!(operation_id = %op.id, error = %err, "Skipping history entry")
                }
            }
        }

        info!(
            operation_id = %op.id,
            status = %op.status,
            processed = op.processed_items,
            failed = op.failed_items,
            "Bulk operation finished"
        );

        // Persist before announcing: a subscriber reacting to the terminal
        // event may immediately read or restart state.
        self.persist().await;

        self.emit(EngineEvent::OperationFinished {
            operation_id: op.id.clone(),
            status: op.status,
            processed_items: op.processed_items,
            failed_items: op.failed_items,
        });
    }

    fn build_history_entry(&self, op: &BulkOperation) -> BulkResult<UndoableAction> {
        let captures: Vec<RollbackItem> = op
            .results
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.rollback.clone())
            .collect();

        let payload = if op.action.is_undoable() && !captures.is_empty() {
            Some(RollbackPayload::from_items(op.action, captures)?)
        } else {
            None
        };

        let succeeded: Vec<ItemId> = op.succeeded_ids().cloned().collect();
        UndoableAction::new(op.action, op.item_kind, succeeded, payload)
    }

    /// Mirror the bounded slices to the store; persistence trouble is
    /// logged, never surfaced into operation results.
    async fn persist(&self) {
        let Some(store) = &self.store else { return };

        let ops: Vec<BulkOperation> = {
            let log = self.log.read();
            let terminal: Vec<BulkOperation> = log.terminal_operations().cloned().collect();
            let skip = terminal
                .len()
                .saturating_sub(self.config.history.persisted_slice);
            terminal.into_iter().skip(skip).collect()
        };
        let undo_slice: Vec<UndoableAction> =
            self.undo.read().recent(self.config.undo.persisted_slice);

        if let Err(err) = persistence::save_slice(store.as_ref(), OPERATIONS_KEY, &ops).await {
            warn!(error = %err, "Failed to persist operation history");
        }
        if let Err(err) = persistence::save_slice(store.as_ref(), UNDO_KEY, &undo_slice).await {
            warn!(error = %err, "Failed to persist undo history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::handler::{ChunkOutcome, HandlerError, ItemOutcome};
    use crate::engine::scheduler::NoDelayScheduler;
    use crate::model::rollback::{DeletedRecord, PositionSide, PositionSnapshot, TagSnapshot};
    use crate::persistence::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use undor::UndoError;

    /// Simulated desk backend: fails configured ids, captures rollback data
    /// for undoable actions, records revert/reapply calls, and can hold each
    /// chunk on a semaphore to keep operations in flight.
    #[derive(Default)]
    struct DeskHandler {
        fail_ids: Vec<ItemId>,
        hold: Option<Arc<Semaphore>>,
        revert_fails: bool,
        reverted: Mutex<Vec<RollbackPayload>>,
        reapplied: Mutex<Vec<(ActionKind, Vec<ItemId>)>>,
    }

    impl DeskHandler {
        fn capture(action: ActionKind, id: &ItemId) -> Option<RollbackItem> {
            match action {
                ActionKind::Close => Some(RollbackItem::Close(PositionSnapshot {
                    item_id: id.clone(),
                    symbol: "NQZ5".into(),
                    side: PositionSide::Long,
                    quantity: 1.0,
                    entry_price: 17810.25,
                })),
                ActionKind::Delete => Some(RollbackItem::Delete(DeletedRecord {
                    item_id: id.clone(),
                    record: serde_json::json!({ "id": id.as_str(), "threshold": 42 }),
                })),
                ActionKind::Tag => Some(RollbackItem::Tag(TagSnapshot {
                    item_id: id.clone(),
                    tags: vec!["scalps".into()],
                })),
                ActionKind::Enable => Some(RollbackItem::Enable {
                    item_id: id.clone(),
                }),
                ActionKind::Disable => Some(RollbackItem::Disable {
                    item_id: id.clone(),
                }),
                _ => None,
            }
        }
    }

    #[async_trait]
    impl ActionHandler for DeskHandler {
        async fn apply(
            &self,
            action: ActionKind,
            chunk: &[ItemId],
        ) -> Result<ChunkOutcome, HandlerError> {
            if let Some(hold) = &self.hold {
                hold.acquire()
                    .await
                    .map_err(|_| HandlerError::Remote("gate closed".into()))?
                    .forget();
            }

            Ok(ChunkOutcome::PerItem(
                chunk
                    .iter()
                    .map(|id| {
                        if self.fail_ids.contains(id) {
                            ItemOutcome::failed(id.clone(), "venue rejected")
                        } else {
                            ItemOutcome::succeeded(id.clone(), Self::capture(action, id))
                        }
                    })
                    .collect(),
            ))
        }

        async fn revert(&self, payload: &RollbackPayload) -> Result<(), HandlerError> {
            if self.revert_fails {
                return Err(HandlerError::Remote("restore endpoint down".into()));
            }
            self.reverted.lock().push(payload.clone());
            Ok(())
        }

        async fn reapply(
            &self,
            action: ActionKind,
            item_ids: &[ItemId],
        ) -> Result<(), HandlerError> {
            self.reapplied.lock().push((action, item_ids.to_vec()));
            Ok(())
        }
    }

    fn ids(prefix: &str, n: usize) -> Vec<ItemId> {
        (0..n)
            .map(|i| ItemId::from(format!("{prefix}-{i}")))
            .collect()
    }

    fn test_engine(batch_size: usize, handler: Arc<DeskHandler>) -> BulkEngine {
        engine_with(batch_size, handler, Arc::new(NoDelayScheduler::new()), None)
    }

    fn engine_with(
        batch_size: usize,
        handler: Arc<DeskHandler>,
        scheduler: Arc<dyn Scheduler>,
        store: Option<Arc<dyn StateStore>>,
    ) -> BulkEngine {
        let mut config = EngineConfig::default();
        config.executor.batch_size = batch_size;

        let engine = BulkEngine::with_parts(config, scheduler, store);
        engine.register_handler(ItemKind::Position, handler.clone());
        engine.register_handler(ItemKind::Alert, handler.clone());
        engine.register_handler(ItemKind::Trade, handler);
        engine
    }

    async fn wait_finished(
        rx: &mut broadcast::Receiver<EngineEvent>,
        id: &OperationId,
    ) -> (OperationStatus, usize, usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await.expect("event channel closed") {
                    EngineEvent::OperationFinished {
                        operation_id,
                        status,
                        processed_items,
                        failed_items,
                    } if &operation_id == id => {
                        return (status, processed_items, failed_items);
                    }
                    _ => continue,
                }
            }
        })
        .await
        .expect("operation did not finish in time")
    }

    #[tokio::test]
    async fn full_success_clears_selection_and_allows_undo() {
        let handler = Arc::new(DeskHandler::default());
        let engine = test_engine(10, handler);

        for id in ids("p", 3) {
            engine.select(ItemKind::Position, id);
        }

        let mut rx = engine.subscribe();
        let op_id = engine.start(ActionKind::Close, ItemKind::Position).unwrap();
        let (status, processed, failed) = wait_finished(&mut rx, &op_id).await;

        assert_eq!(status, OperationStatus::Completed);
        assert_eq!(processed, 3);
        assert_eq!(failed, 0);

        let op = engine.operation(&op_id).unwrap();
        assert!(op.can_undo);
        assert_eq!(op.results.len(), 3);

        assert_eq!(engine.selected_count(ItemKind::Position), 0);
        assert!(engine.peek_undo().is_some());
    }

    #[tokio::test]
    async fn partial_failure_narrows_selection_to_failed_ids() {
        let handler = Arc::new(DeskHandler {
            fail_ids: vec![ItemId::from("a-3"), ItemId::from("a-7")],
            ..DeskHandler::default()
        });
        let engine = test_engine(10, handler);

        for id in ids("a", 10) {
            engine.select(ItemKind::Alert, id);
        }

        let mut rx = engine.subscribe();
        let op_id = engine.start(ActionKind::Delete, ItemKind::Alert).unwrap();
        let (status, processed, failed) = wait_finished(&mut rx, &op_id).await;

        // Partial failure is not an overall failure.
        assert_eq!(status, OperationStatus::Completed);
        assert_eq!(processed, 10);
        assert_eq!(failed, 2);

        let op = engine.operation(&op_id).unwrap();
        assert!(op.can_undo);

        assert_eq!(
            engine.selected_ids(ItemKind::Alert),
            vec![ItemId::from("a-3"), ItemId::from("a-7")]
        );
    }

    /// Scheduler that blocks every inter-batch pause on a semaphore the
    /// test releases explicitly.
    struct GateScheduler {
        gate: Semaphore,
    }

    #[async_trait]
    impl Scheduler for GateScheduler {
        async fn pause(&self, _duration: Duration) {
            self.gate
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }
    }

    #[tokio::test]
    async fn cancellation_after_first_chunk_leaves_rest_untouched() {
        let handler = Arc::new(DeskHandler::default());
        let scheduler = Arc::new(GateScheduler {
            gate: Semaphore::new(0),
        });
        let engine = engine_with(10, handler, scheduler.clone(), None);

        for id in ids("p", 25) {
            engine.select(ItemKind::Position, id);
        }

        let mut rx = engine.subscribe();
        let op_id = engine.start(ActionKind::Close, ItemKind::Position).unwrap();

        // Wait for the first chunk's progress update to land, then cancel
        // while the executor sits in the inter-batch pause.
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let EngineEvent::OperationProgress {
                    processed_items, ..
                } = rx.recv().await.expect("event channel closed")
                {
                    assert_eq!(processed_items, 10);
                    break;
                }
            }
        })
        .await
        .expect("no progress update arrived");

        engine.cancel(&op_id).unwrap();
        scheduler.gate.add_permits(1);

        let (status, processed, failed) = wait_finished(&mut rx, &op_id).await;
        assert_eq!(status, OperationStatus::Cancelled);
        assert_eq!(processed, 10);
        assert_eq!(failed, 0);

        let op = engine.operation(&op_id).unwrap();
        assert_eq!(op.results.len(), 10);
        assert!(!op.can_undo);

        // The 15 unattempted ids stay selected for retry.
        assert_eq!(engine.selected_count(ItemKind::Position), 15);
    }

    #[tokio::test]
    async fn undo_on_export_rejects_and_leaves_stack() {
        let handler = Arc::new(DeskHandler::default());
        let engine = test_engine(10, handler);

        let mut rx = engine.subscribe();
        let op_id = engine
            .start_with_items(ActionKind::Export, ItemKind::Trade, ids("t", 2))
            .unwrap();
        wait_finished(&mut rx, &op_id).await;

        assert_eq!(engine.undo_stats().undo_depth, 1);

        let err = engine.undo().await.unwrap_err();
        assert!(matches!(
            err,
            BulkError::Undo(UndoError::NotReversible(_))
        ));
        assert_eq!(engine.undo_stats().undo_depth, 1);
    }

    #[tokio::test]
    async fn same_kind_serialized_while_other_kinds_run() {
        let hold = Arc::new(Semaphore::new(0));
        let blocking = Arc::new(DeskHandler {
            hold: Some(hold.clone()),
            ..DeskHandler::default()
        });
        let engine = test_engine(10, blocking);

        // Alerts get their own non-blocking handler.
        engine.register_handler(ItemKind::Alert, Arc::new(DeskHandler::default()));

        let mut rx = engine.subscribe();
        let first = engine
            .start_with_items(ActionKind::Close, ItemKind::Position, ids("p", 15))
            .unwrap();

        // Same kind while in flight: rejected, not queued.
        let err = engine
            .start_with_items(ActionKind::Delete, ItemKind::Position, ids("q", 1))
            .unwrap_err();
        assert!(err.is_concurrency());

        // A disjoint kind starts in the same moment.
        let alert_op = engine
            .start_with_items(ActionKind::Delete, ItemKind::Alert, ids("a", 2))
            .unwrap();
        let (status, ..) = wait_finished(&mut rx, &alert_op).await;
        assert_eq!(status, OperationStatus::Completed);

        hold.add_permits(2);
        let (status, processed, _) = wait_finished(&mut rx, &first).await;
        assert_eq!(status, OperationStatus::Completed);
        assert_eq!(processed, 15);
    }

    #[tokio::test]
    async fn progress_updates_arrive_at_every_chunk_boundary() {
        let handler = Arc::new(DeskHandler::default());
        let engine = test_engine(10, handler);

        let mut rx = engine.subscribe();
        let op_id = engine
            .start_with_items(ActionKind::Tag, ItemKind::Position, ids("p", 25))
            .unwrap();

        let mut progress = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await.expect("event channel closed") {
                    EngineEvent::OperationProgress {
                        processed_items, ..
                    } => progress.push(processed_items),
                    EngineEvent::OperationFinished { operation_id, .. }
                        if operation_id == op_id =>
                    {
                        break;
                    }
                    _ => continue,
                }
            }
        })
        .await
        .expect("operation did not finish in time");

        assert_eq!(progress, vec![10, 20, 25]);
    }

    #[tokio::test]
    async fn undo_applies_rollback_and_redo_reapplies() {
        let handler = Arc::new(DeskHandler::default());
        let engine = test_engine(10, handler.clone());

        let mut rx = engine.subscribe();
        let op_id = engine
            .start_with_items(ActionKind::Close, ItemKind::Position, ids("p", 2))
            .unwrap();
        wait_finished(&mut rx, &op_id).await;

        let entry = engine.undo().await.unwrap();
        assert_eq!(entry.action, ActionKind::Close);
        assert_eq!(entry.description, "Closed 2 positions");

        {
            let reverted = handler.reverted.lock();
            assert_eq!(reverted.len(), 1);
            match &reverted[0] {
                RollbackPayload::Close { positions } => assert_eq!(positions.len(), 2),
                other => panic!("unexpected payload {other:?}"),
            }
        }
        assert_eq!(engine.undo_stats().undo_depth, 0);
        assert_eq!(engine.undo_stats().redo_depth, 1);

        let entry = engine.redo().await.unwrap();
        assert_eq!(entry.action, ActionKind::Close);
        assert_eq!(
            handler.reapplied.lock()[0],
            (ActionKind::Close, ids("p", 2))
        );
        assert_eq!(engine.undo_stats().undo_depth, 1);
        assert_eq!(engine.undo_stats().redo_depth, 0);
    }

    #[tokio::test]
    async fn failed_rollback_leaves_history_untouched() {
        let handler = Arc::new(DeskHandler {
            revert_fails: true,
            ..DeskHandler::default()
        });
        let engine = test_engine(10, handler);

        let mut rx = engine.subscribe();
        let op_id = engine
            .start_with_items(ActionKind::Close, ItemKind::Position, ids("p", 1))
            .unwrap();
        wait_finished(&mut rx, &op_id).await;

        let before = engine.peek_undo().unwrap();
        let err = engine.undo().await.unwrap_err();
        assert!(matches!(err, BulkError::RollbackFailed { .. }));

        assert_eq!(engine.undo_stats().undo_depth, 1);
        assert_eq!(engine.undo_stats().redo_depth, 0);
        assert_eq!(engine.peek_undo().unwrap().id, before.id);
    }

    #[tokio::test]
    async fn start_rejects_empty_selection_and_missing_handler() {
        let handler = Arc::new(DeskHandler::default());
        let engine = test_engine(10, handler);

        let err = engine.start(ActionKind::Close, ItemKind::Position).unwrap_err();
        assert!(matches!(err, BulkError::EmptySelection(ItemKind::Position)));

        // No handler was registered for orders.
        let err = engine
            .start_with_items(ActionKind::Cancel, ItemKind::Order, ids("o", 1))
            .unwrap_err();
        assert!(matches!(err, BulkError::NoHandler(ItemKind::Order)));
    }

    #[tokio::test]
    async fn persisted_slices_survive_restart() {
        let store = Arc::new(MemoryStore::new());
        let handler = Arc::new(DeskHandler::default());

        let engine = engine_with(
            10,
            handler.clone(),
            Arc::new(NoDelayScheduler::new()),
            Some(store.clone()),
        );

        let mut rx = engine.subscribe();
        let op_id = engine
            .start_with_items(ActionKind::Close, ItemKind::Position, ids("p", 2))
            .unwrap();
        wait_finished(&mut rx, &op_id).await;

        // Fresh engine over the same store: terminal history and undo
        // entries come back, selection does not.
        let restarted = engine_with(
            10,
            handler,
            Arc::new(NoDelayScheduler::new()),
            Some(store),
        );
        restarted.hydrate().await.unwrap();

        let ops = restarted.operations();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].status, OperationStatus::Completed);
        assert_eq!(ops[0].id, op_id);

        let entry = restarted.peek_undo().unwrap();
        assert_eq!(entry.action, ActionKind::Close);
        assert!(entry.can_undo);

        assert_eq!(restarted.selected_count(ItemKind::Position), 0);
    }

    #[tokio::test]
    async fn cancel_unknown_operation_is_an_error() {
        let handler = Arc::new(DeskHandler::default());
        let engine = test_engine(10, handler);

        let err = engine.cancel("never-existed").unwrap_err();
        assert!(matches!(err, BulkError::UnknownOperation(_)));
    }
}
