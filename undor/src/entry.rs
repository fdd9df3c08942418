use compact_str::CompactString;

/// Contract every stack entry must satisfy.
///
/// The stack itself is agnostic about what an entry undoes; it only needs to
/// know whether the entry can be reversed at all and how to name it in
/// errors and logs.
pub trait UndoEntry: Clone {
    /// Whether this entry's action supports rollback.
    ///
    /// Entries may be recorded for history purposes even when they cannot be
    /// reversed; popping such an entry is rejected without modifying the
    /// stack.
    fn reversible(&self) -> bool;

    /// Short human-readable label (action name, description) used in error
    /// messages and tracing output.
    fn label(&self) -> CompactString;
}
