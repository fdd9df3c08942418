use crate::model::item::{ItemId, ItemKind, SelectionMode};
use enum_map::EnumMap;
use indexmap::IndexSet;

/// Selected ids for one item kind.
///
/// Insertion order is preserved; it becomes the target order of a bulk
/// operation started from this selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionState {
    ids: IndexSet<ItemId>,
}

impl SelectionState {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &ItemId> {
        self.ids.iter()
    }
}

/// Per-item-kind selection tracking.
///
/// Every method is scoped by [`ItemKind`]; kinds are independent namespaces.
/// All mutators are idempotent and there are no error conditions — this is
/// pure in-memory set manipulation.
#[derive(Debug, Clone, Default)]
pub struct SelectionRegistry {
    selections: EnumMap<ItemKind, SelectionState>,
}

impl SelectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Select one id; selecting an already-selected id is a no-op.
    pub fn select(&mut self, kind: ItemKind, id: ItemId) {
        self.selections[kind].ids.insert(id);
    }

    /// Deselect one id; deselecting an absent id is a no-op.
    pub fn deselect(&mut self, kind: ItemKind, id: &str) {
        self.selections[kind].ids.shift_remove(id);
    }

    pub fn toggle(&mut self, kind: ItemKind, id: ItemId) {
        if self.selections[kind].ids.contains(id.as_str()) {
            self.selections[kind].ids.shift_remove(id.as_str());
        } else {
            self.selections[kind].ids.insert(id);
        }
    }

    /// Replace the selection with every id the caller currently displays.
    pub fn select_all(&mut self, kind: ItemKind, all_ids: impl IntoIterator<Item = ItemId>) {
        let state = &mut self.selections[kind];
        state.ids.clear();
        state.ids.extend(all_ids);
    }

    /// Empty the selection for one kind.
    pub fn deselect_all(&mut self, kind: ItemKind) {
        self.selections[kind].ids.clear();
    }

    /// Empty the selections of every kind.
    pub fn clear_all(&mut self) {
        for (_, state) in self.selections.iter_mut() {
            state.ids.clear();
        }
    }

    /// Remove a batch of ids, keeping the rest selected. Used after an
    /// operation finishes to drop the ids it satisfied.
    pub fn deselect_many<'a>(&mut self, kind: ItemKind, ids: impl IntoIterator<Item = &'a ItemId>) {
        let state = &mut self.selections[kind];
        for id in ids {
            state.ids.shift_remove(id.as_str());
        }
    }

    pub fn is_selected(&self, kind: ItemKind, id: &str) -> bool {
        self.selections[kind].contains(id)
    }

    /// Selected ids in insertion order.
    pub fn selected_ids(&self, kind: ItemKind) -> Vec<ItemId> {
        self.selections[kind].ids.iter().cloned().collect()
    }

    pub fn selected_count(&self, kind: ItemKind) -> usize {
        self.selections[kind].len()
    }

    /// Selection mode relative to the caller's current total-id list.
    pub fn mode(&self, kind: ItemKind, all_ids: &[ItemId]) -> SelectionMode {
        let state = &self.selections[kind];
        if state.is_empty() {
            return SelectionMode::None;
        }
        if !all_ids.is_empty() && all_ids.iter().all(|id| state.contains(id.as_str())) {
            return SelectionMode::All;
        }
        SelectionMode::Partial
    }

    pub fn state(&self, kind: ItemKind) -> &SelectionState {
        &self.selections[kind]
    }
}
