//! Items: the things whose payment split is negotiated

use crate::ItemId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether more than one party owns an item.
///
/// A cache: recomputed every time ownership membership changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ShareStatus {
    #[default]
    NotShared,
    Shared,
}

impl ShareStatus {
    /// Derive the status from the number of owning parties
    pub fn from_owner_count(owners: usize) -> Self {
        if owners > 1 {
            ShareStatus::Shared
        } else {
            ShareStatus::NotShared
        }
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, ShareStatus::Shared)
    }
}

/// An item owned by one or more parties
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub share_status: ShareStatus,
}

impl Item {
    /// Create a new, not-yet-shared item
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ItemId::generate(),
            name: name.into(),
            created_at: Utc::now(),
            share_status: ShareStatus::NotShared,
        }
    }

    pub fn with_id(mut self, id: ItemId) -> Self {
        self.id = id;
        self
    }

    pub fn is_shared(&self) -> bool {
        self.share_status.is_shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_status_follows_owner_count() {
        assert_eq!(ShareStatus::from_owner_count(0), ShareStatus::NotShared);
        assert_eq!(ShareStatus::from_owner_count(1), ShareStatus::NotShared);
        assert_eq!(ShareStatus::from_owner_count(2), ShareStatus::Shared);
        assert_eq!(ShareStatus::from_owner_count(7), ShareStatus::Shared);
    }

    #[test]
    fn new_item_is_not_shared() {
        let item = Item::new("Warehouse").with_id(ItemId::new("item-1"));
        assert_eq!(item.id, ItemId::new("item-1"));
        assert!(!item.is_shared());
    }
}
