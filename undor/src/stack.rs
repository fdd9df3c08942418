use crate::config::UndoConfig;
use crate::entry::UndoEntry;
use crate::error::{UndoError, UndoResult};
use std::collections::VecDeque;
use tracing::debug;

/// Bounded undo/redo history.
///
/// Both sequences are capped at [`UndoConfig::max_depth`]; insertion beyond
/// the cap evicts the oldest entry (FIFO). Pushing a new action clears the
/// redo sequence.
#[derive(Debug, Clone)]
pub struct UndoStack<T: UndoEntry> {
    undo: VecDeque<T>,
    redo: VecDeque<T>,
    config: UndoConfig,
    pushed: u64,
    evicted: u64,
}

impl<T: UndoEntry> UndoStack<T> {
    pub fn new(config: UndoConfig) -> Self {
        Self {
            undo: VecDeque::new(),
            redo: VecDeque::new(),
            config,
            pushed: 0,
            evicted: 0,
        }
    }

    /// Record a new action.
    ///
    /// Always clears the redo sequence: once a new action lands, the old
    /// redo branch is unreachable.
    pub fn push(&mut self, entry: T) {
        if !self.redo.is_empty() {
            debug!(dropped = self.redo.len(), "Clearing redo history on push");
            self.redo.clear();
        }

        while self.undo.len() >= self.config.max_depth {
            self.undo.pop_front();
            self.evicted += 1;
        }

        self.undo.push_back(entry);
        self.pushed += 1;
    }

    /// Take the most recent undo entry.
    ///
    /// Fails with [`UndoError::NotReversible`] when the entry's action does
    /// not support rollback and [`UndoError::EmptyHistory`] when there is
    /// nothing to undo. The stack is untouched in both cases.
    pub fn pop_undo(&mut self) -> UndoResult<T> {
        let top = self.undo.back().ok_or(UndoError::EmptyHistory)?;
        if !top.reversible() {
            return Err(UndoError::NotReversible(top.label()));
        }

        // Checked non-empty above.
        Ok(self.undo.pop_back().expect("undo history non-empty"))
    }

    /// Take the most recent redo entry; symmetric to [`Self::pop_undo`].
    pub fn pop_redo(&mut self) -> UndoResult<T> {
        let top = self.redo.back().ok_or(UndoError::EmptyRedo)?;
        if !top.reversible() {
            return Err(UndoError::NotReversible(top.label()));
        }

        Ok(self.redo.pop_back().expect("redo history non-empty"))
    }

    /// Move a successfully undone entry onto the redo sequence.
    pub fn push_redo(&mut self, entry: T) {
        while self.redo.len() >= self.config.max_depth {
            self.redo.pop_front();
            self.evicted += 1;
        }
        self.redo.push_back(entry);
    }

    /// Put an entry back on top of the undo sequence without clearing redo.
    ///
    /// Used when applying the rollback failed after the entry was popped;
    /// the stack must end up exactly as it was before the attempt.
    pub fn restore_undo(&mut self, entry: T) {
        self.undo.push_back(entry);
    }

    /// Put an entry back on top of the redo sequence.
    pub fn restore_redo(&mut self, entry: T) {
        self.redo.push_back(entry);
    }

    /// Most recent undo entry, if any.
    pub fn peek_undo(&self) -> Option<&T> {
        self.undo.back()
    }

    /// The `n` most recent undo entries, oldest first.
    ///
    /// This is the slice embedding applications mirror to durable storage.
    pub fn recent(&self, n: usize) -> Vec<T> {
        let skip = self.undo.len().saturating_sub(n);
        self.undo.iter().skip(skip).cloned().collect()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.undo.is_empty() && self.redo.is_empty()
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn stats(&self) -> UndoStackStats {
        UndoStackStats {
            undo_depth: self.undo.len(),
            redo_depth: self.redo.len(),
            total_pushed: self.pushed,
            total_evicted: self.evicted,
            max_depth: self.config.max_depth,
        }
    }
}

impl<T: UndoEntry> Default for UndoStack<T> {
    fn default() -> Self {
        Self::new(UndoConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoStackStats {
    pub undo_depth: usize,
    pub redo_depth: usize,
    pub total_pushed: u64,
    pub total_evicted: u64,
    pub max_depth: usize,
}
