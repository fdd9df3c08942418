//! Rollback payloads and undoable actions.
//!
//! Payloads are a tagged union keyed by action kind, one shape per undoable
//! kind, built from per-item captures the caller's handler took before the
//! destructive step. The engine never snapshots live objects; everything
//! here is plain serializable data.

use crate::error::{BulkError, BulkResult};
use crate::model::item::{ItemId, ItemKind};
use crate::model::operation::ActionKind;
use chrono::{DateTime, Utc};
use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use undor::UndoEntry;
use uuid::Uuid;

/// Position display state sufficient to restore a closed position locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub item_id: ItemId,
    pub symbol: CompactString,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

/// Full record of a deleted item as the handler captured it.
///
/// The record body is caller-defined structured data; only the envelope
/// shape is validated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeletedRecord {
    pub item_id: ItemId,
    pub record: serde_json::Value,
}

/// Tag set of one item before a tagging action rewrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagSnapshot {
    pub item_id: ItemId,
    pub tags: Vec<CompactString>,
}

/// Pre-action capture for a single item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackItem {
    Close(PositionSnapshot),
    Delete(DeletedRecord),
    Tag(TagSnapshot),
    Enable { item_id: ItemId },
    Disable { item_id: ItemId },
}

impl RollbackItem {
    pub fn action(&self) -> ActionKind {
        match self {
            RollbackItem::Close(_) => ActionKind::Close,
            RollbackItem::Delete(_) => ActionKind::Delete,
            RollbackItem::Tag(_) => ActionKind::Tag,
            RollbackItem::Enable { .. } => ActionKind::Enable,
            RollbackItem::Disable { .. } => ActionKind::Disable,
        }
    }

    pub fn item_id(&self) -> &ItemId {
        match self {
            RollbackItem::Close(snapshot) => &snapshot.item_id,
            RollbackItem::Delete(record) => &record.item_id,
            RollbackItem::Tag(snapshot) => &snapshot.item_id,
            RollbackItem::Enable { item_id } => item_id,
            RollbackItem::Disable { item_id } => item_id,
        }
    }
}

/// Aggregated rollback data for one completed operation.
///
/// One variant per undoable action kind; building a payload from items of a
/// different kind is rejected rather than trusted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RollbackPayload {
    Close { positions: Vec<PositionSnapshot> },
    Delete { records: Vec<DeletedRecord> },
    Tag { previous: Vec<TagSnapshot> },
    Enable { item_ids: Vec<ItemId> },
    Disable { item_ids: Vec<ItemId> },
}

impl RollbackPayload {
    pub fn action(&self) -> ActionKind {
        match self {
            RollbackPayload::Close { .. } => ActionKind::Close,
            RollbackPayload::Delete { .. } => ActionKind::Delete,
            RollbackPayload::Tag { .. } => ActionKind::Tag,
            RollbackPayload::Enable { .. } => ActionKind::Enable,
            RollbackPayload::Disable { .. } => ActionKind::Disable,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RollbackPayload::Close { positions } => positions.len(),
            RollbackPayload::Delete { records } => records.len(),
            RollbackPayload::Tag { previous } => previous.len(),
            RollbackPayload::Enable { item_ids } => item_ids.len(),
            RollbackPayload::Disable { item_ids } => item_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregate per-item captures into one payload for `action`.
    ///
    /// Every capture must carry the same action kind as the operation it
    /// came from; a mismatch means the handler broke its contract.
    pub fn from_items(action: ActionKind, items: Vec<RollbackItem>) -> BulkResult<Self> {
        if let Some(bad) = items.iter().find(|item| item.action() != action) {
            return Err(BulkError::PayloadMismatch {
                expected: action,
                found: bad.action(),
            });
        }

        let payload = match action {
            ActionKind::Close => RollbackPayload::Close {
                positions: items
                    .into_iter()
                    .map(|item| match item {
                        RollbackItem::Close(snapshot) => snapshot,
                        _ => unreachable!("verified above"),
                    })
                    .collect(),
            },
            ActionKind::Delete => RollbackPayload::Delete {
                records: items
                    .into_iter()
                    .map(|item| match item {
                        RollbackItem::Delete(record) => record,
                        _ => unreachable!("verified above"),
                    })
                    .collect(),
            },
            ActionKind::Tag => RollbackPayload::Tag {
                previous: items
                    .into_iter()
                    .map(|item| match item {
                        RollbackItem::Tag(snapshot) => snapshot,
                        _ => unreachable!("verified above"),
                    })
                    .collect(),
            },
            ActionKind::Enable => RollbackPayload::Enable {
                item_ids: items.iter().map(|item| item.item_id().clone()).collect(),
            },
            ActionKind::Disable => RollbackPayload::Disable {
                item_ids: items.iter().map(|item| item.item_id().clone()).collect(),
            },
            other => return Err(BulkError::NotUndoableKind(other)),
        };

        Ok(payload)
    }
}

/// One entry in the undo history.
///
/// Recorded for every completed operation with at least one successful item;
/// `can_undo` is true only when the action kind supports rollback and a
/// payload was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoableAction {
    pub id: Uuid,

    pub action: ActionKind,

    pub item_kind: ItemKind,

    /// Human-readable description ("Closed 3 positions").
    pub description: String,

    /// Ids the action touched successfully.
    pub item_ids: Vec<ItemId>,

    /// Aggregated pre-action captures; `None` for non-undoable kinds.
    pub payload: Option<RollbackPayload>,

    pub created_at: DateTime<Utc>,

    pub can_undo: bool,
}

impl UndoableAction {
    /// Build a history entry, validating payload/action agreement.
    pub fn new(
        action: ActionKind,
        item_kind: ItemKind,
        item_ids: Vec<ItemId>,
        payload: Option<RollbackPayload>,
    ) -> BulkResult<Self> {
        if let Some(ref payload) = payload {
            if payload.action() != action {
                return Err(BulkError::PayloadMismatch {
                    expected: action,
                    found: payload.action(),
                });
            }
        }

        let description = format!(
            "{} {} {}",
            action.past_tense(),
            item_ids.len(),
            if item_ids.len() == 1 {
                item_kind.as_str()
            } else {
                item_kind.plural()
            }
        );

        let can_undo = action.is_undoable() && payload.is_some();

        Ok(Self {
            id: Uuid::new_v4(),
            action,
            item_kind,
            description,
            item_ids,
            payload,
            created_at: Utc::now(),
            can_undo,
        })
    }
}

impl UndoEntry for UndoableAction {
    fn reversible(&self) -> bool {
        self.can_undo
    }

    fn label(&self) -> CompactString {
        CompactString::from(self.action.as_str())
    }
}
