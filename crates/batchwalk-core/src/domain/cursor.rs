//! Batch cursor: last seen record id + sort direction.

use serde::{Deserialize, Serialize};

use super::ids::RecordId;

/// Direction in which a walk visits record ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    pub fn from_ascending(ascending: bool) -> Self {
        if ascending {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        }
    }
}

/// Position of a walk between two pages.
///
/// The first page has no bound. Every later page only admits ids strictly
/// past `last_seen` in the walk's direction, so a record is never visited
/// twice even when the store is mutated while the walk runs. Records
/// inserted behind the cursor are not visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCursor {
    last_seen: Option<RecordId>,
    order: SortOrder,
}

impl BatchCursor {
    pub fn start(order: SortOrder) -> Self {
        Self {
            last_seen: None,
            order,
        }
    }

    /// Cursor positioned after `id`.
    pub fn advance(self, id: RecordId) -> Self {
        Self {
            last_seen: Some(id),
            order: self.order,
        }
    }

    pub fn last_seen(&self) -> Option<RecordId> {
        self.last_seen
    }

    pub fn order(&self) -> SortOrder {
        self.order
    }

    /// Does `id` lie past this cursor?
    pub fn admits(&self, id: RecordId) -> bool {
        match (self.last_seen, self.order) {
            (None, _) => true,
            (Some(last), SortOrder::Ascending) => id > last,
            (Some(last), SortOrder::Descending) => id < last,
        }
    }
}
