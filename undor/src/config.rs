use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoConfig {
    /// Maximum depth of each history sequence; inserting beyond this evicts
    /// the oldest entry first
    pub max_depth: usize,

    /// How many of the most recent undo entries are mirrored to durable
    /// storage by embedding applications
    pub persisted_slice: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_depth: 50,
            persisted_slice: 20,
        }
    }
}
