use compact_str::CompactString;
use enum_map::Enum;
use serde::{Deserialize, Serialize};

/// Identifier of one domain item as handed over by the caller.
pub type ItemId = CompactString;

/// Domain category an item belongs to.
///
/// Selection state is namespaced by kind, and at most one bulk operation per
/// kind may be in flight at a time; operations on disjoint kinds run
/// independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Position,
    Trade,
    Alert,
    Order,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Position => "position",
            ItemKind::Trade => "trade",
            ItemKind::Alert => "alert",
            ItemKind::Order => "order",
        }
    }

    /// Plural form for descriptions and log lines.
    pub fn plural(&self) -> &'static str {
        match self {
            ItemKind::Position => "positions",
            ItemKind::Trade => "trades",
            ItemKind::Alert => "alerts",
            ItemKind::Order => "orders",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived selection mode relative to a caller-supplied total-id list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionMode {
    None,
    Partial,
    All,
}
