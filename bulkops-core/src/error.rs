use crate::model::item::ItemKind;
use crate::model::operation::{ActionKind, OperationId, OperationStatus};
use thiserror::Error;

pub type BulkResult<T> = Result<T, BulkError>;

/// Errors surfaced to callers of the engine.
///
/// Only validation and concurrency failures are synchronous results of
/// `start()`; everything that happens once an operation is in progress is
/// absorbed into its per-item results and never raised as an error.
#[derive(Debug, Error)]
pub enum BulkError {
    #[error("Nothing selected for {0}")]
    EmptySelection(ItemKind),

    #[error("No action handler registered for item kind '{0}'")]
    NoHandler(ItemKind),

    #[error("A bulk operation is already in progress for {item_kind} (operation {operation_id})")]
    OperationInFlight {
        item_kind: ItemKind,
        operation_id: OperationId,
    },

    #[error("Unknown operation: {0}")]
    UnknownOperation(OperationId),

    #[error("Operation {id} is {status}, cannot {attempted}")]
    InvalidTransition {
        id: OperationId,
        status: OperationStatus,
        attempted: &'static str,
    },

    #[error("Counter invariant violated for operation {id}: {msg}")]
    InvariantViolation { id: OperationId, msg: String },

    #[error(transparent)]
    Undo(#[from] undor::UndoError),

    #[error("Rollback payload mismatch: expected {expected}, found {found}")]
    PayloadMismatch {
        expected: ActionKind,
        found: ActionKind,
    },

    #[error("Action kind '{0}' does not capture rollback data")]
    NotUndoableKind(ActionKind),

    #[error("Rollback application failed for '{action}': {msg}")]
    RollbackFailed { action: ActionKind, msg: String },

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BulkError {
    /// Synchronous pre-flight rejection from `start()`.
    pub fn is_validation(&self) -> bool {
        matches!(self, BulkError::EmptySelection(_) | BulkError::NoHandler(_))
    }

    /// Per-item-kind serialization rejection from `start()`.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, BulkError::OperationInFlight { .. })
    }
}

/// Errors of the durable state boundary.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Failed to encode persisted state")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Failed to decode persisted state")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Persisted state version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Persisted state corrupted: checksum mismatch under key '{key}'")]
    ChecksumMismatch { key: String },

    #[error("IO operation failed")]
    Io(#[from] std::io::Error),
}

impl PersistenceError {
    /// Whether loading should fall back to the backup file.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            PersistenceError::Decode(_)
                | PersistenceError::ChecksumMismatch { .. }
                | PersistenceError::VersionMismatch { .. }
        )
    }
}
