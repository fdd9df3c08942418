use crate::model::item::ItemId;
use crate::model::operation::ActionKind;
use crate::model::rollback::{RollbackItem, RollbackPayload};
use async_trait::async_trait;
use thiserror::Error;

/// Failure raised by a caller-supplied handler.
///
/// Never escapes the executor: a chunk-level error is converted into a
/// failure result for every id in the chunk and the remaining chunks are
/// still attempted.
#[derive(Error, Debug, Clone)]
pub enum HandlerError {
    #[error("Remote call failed: {0}")]
    Remote(String),

    #[error("Chunk rejected: {0}")]
    Rejected(String),
}

/// Per-item outcome a handler reports for one chunk.
#[derive(Debug, Clone)]
pub struct ItemOutcome {
    pub item_id: ItemId,

    pub success: bool,

    pub error: Option<String>,

    /// Pre-action capture for undoable action kinds, taken by the handler
    /// before the destructive step.
    pub rollback: Option<RollbackItem>,
}

impl ItemOutcome {
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

/// What a handler reports for one chunk invocation.
#[derive(Debug, Clone)]
pub enum ChunkOutcome {
    /// No per-item detail; the whole chunk is treated as succeeded.
    AllSucceeded,

    /// Structured per-item outcomes, used verbatim after validation against
    /// the chunk's ids.
    PerItem(Vec<ItemOutcome>),
}

/// Caller-supplied action execution, registered per item kind.
///
/// Handlers own the remote side entirely, including latency bounds; the
/// engine only chunks ids, absorbs failures, and tracks progress.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Apply `action` to one chunk of ids.
    async fn apply(&self, action: ActionKind, chunk: &[ItemId]) -> Result<ChunkOutcome, HandlerError>;

    /// Apply a rollback payload captured by an earlier `apply`.
    async fn revert(&self, payload: &RollbackPayload) -> Result<(), HandlerError>;

    /// Re-apply a previously undone action (redo). Defaults to a plain
    /// `apply` over the original ids.
    async fn reapply(&self, action: ActionKind, item_ids: &[ItemId]) -> Result<(), HandlerError> {
        self.apply(action, item_ids).await.map(|_| ())
    }
}
