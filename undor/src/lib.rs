//! # undor - Bounded Undo/Redo History
//!
//! A small, dependency-light undo/redo stack for action engines that need
//! reversible operation history with hard depth limits.
//!
//! ## Key Features
//! - Two bounded sequences (undo and redo) with FIFO eviction
//! - Pushing a new action always clears the redo sequence
//! - Entries declare reversibility themselves via [`UndoEntry`]
//! - Failed rollback application can restore the stack untouched
//! - Stack statistics for status surfaces

pub mod config;
pub mod entry;
pub mod error;
pub mod stack;

// Re-export main types for easy use
pub use config::UndoConfig;
pub use entry::UndoEntry;
pub use error::{UndoError, UndoResult};
pub use stack::{UndoStack, UndoStackStats};
