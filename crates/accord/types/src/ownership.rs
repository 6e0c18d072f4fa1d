//! Ownership: which parties hold shares of which item

use crate::{ItemId, PartyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The set of parties owning an item, ordered for deterministic output
pub type OwnerSet = BTreeSet<PartyId>;

/// A membership fact keyed by (item, party)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub item_id: ItemId,
    pub party_id: PartyId,
    pub created_at: DateTime<Utc>,
}

impl OwnershipRecord {
    pub fn new(item_id: ItemId, party_id: PartyId) -> Self {
        Self {
            item_id,
            party_id,
            created_at: Utc::now(),
        }
    }
}
