use compact_str::CompactString;
use thiserror::Error;

pub type UndoResult<T> = Result<T, UndoError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UndoError {
    #[error("Action is not undoable: {0}")]
    NotReversible(CompactString),

    #[error("Undo history is empty")]
    EmptyHistory,

    #[error("Redo history is empty")]
    EmptyRedo,
}

impl UndoError {
    /// Whether the stack was left untouched by the failed call.
    ///
    /// Every `UndoError` currently guarantees this; the method exists so
    /// callers don't have to encode that knowledge themselves.
    #[inline]
    pub fn stack_unmodified(&self) -> bool {
        true
    }
}
