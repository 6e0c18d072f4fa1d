//! Ownership Ledger
//!
//! Tracks which parties own which items and keeps each item's share status
//! in step with its owner count. Removing an owner deletes every proposal
//! whose ratios name that owner in the same transaction.

use crate::error::log_failure;
use crate::{NegotiationError, NegotiationResult};
use accord_storage::{
    IdentityDirectory, ItemStore, NegotiationStore, NegotiationTx, OwnershipStore, ProposalStore,
    QueryWindow,
};
use accord_types::{
    IssueCode, Item, ItemId, OwnerSet, OwnershipRecord, PartyId, ProposalId, ShareStatus,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A party that owns an item, with its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartySummary {
    pub party_id: PartyId,
    pub name: String,
}

/// What an ownership removal changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipRemoval {
    pub share_status: ShareStatus,
    /// Proposals deleted because their ratios named the removed party
    pub removed_proposals: Vec<ProposalId>,
}

/// Item registry and ownership membership.
#[derive(Clone)]
pub struct OwnershipLedger {
    store: Arc<dyn NegotiationStore>,
    directory: Arc<dyn IdentityDirectory>,
}

impl OwnershipLedger {
    pub fn new(store: Arc<dyn NegotiationStore>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { store, directory }
    }

    /// Register a new, not-yet-shared item.
    pub async fn create_item(&self, name: impl Into<String>) -> NegotiationResult<Item> {
        self.create_item_tx(name.into())
            .await
            .inspect_err(|e| log_failure("create_item", e))
    }

    async fn create_item_tx(&self, name: String) -> NegotiationResult<Item> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NegotiationError::bad_request(
                "name",
                IssueCode::InvalidInput,
                "Item name is required",
            ));
        }
        let item = Item::new(name);
        let mut tx = self.store.begin().await?;
        tx.insert_item(&item).await?;
        tx.commit().await?;
        info!(item_id = %item.id, name = %item.name, "Item created");
        Ok(item)
    }

    pub async fn get_item(&self, item_id: &ItemId) -> NegotiationResult<Item> {
        let mut tx = self.store.begin().await?;
        let item = require_item(tx.as_mut(), item_id).await?;
        tx.commit().await?;
        Ok(item)
    }

    pub async fn list_items(&self, window: QueryWindow) -> NegotiationResult<Vec<Item>> {
        let mut tx = self.store.begin().await?;
        let items = tx.list_items(window).await?;
        tx.commit().await?;
        Ok(items)
    }

    /// Make `party_id` an owner of `item_id` and recompute the share status.
    pub async fn add_ownership(
        &self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> NegotiationResult<OwnershipRecord> {
        self.add_ownership_tx(item_id, party_id)
            .await
            .inspect_err(|e| log_failure("add_ownership", e))
    }

    async fn add_ownership_tx(
        &self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> NegotiationResult<OwnershipRecord> {
        let mut tx = self.store.begin().await?;
        lock_existing_item(tx.as_mut(), item_id).await?;

        if self.directory.party_name(party_id).await?.is_none() {
            return Err(NegotiationError::NotFound(format!(
                "party {party_id} not found"
            )));
        }

        if tx.get_ownership(item_id, party_id).await?.is_some() {
            return Err(NegotiationError::bad_request(
                "party_id",
                IssueCode::AlreadyOwned,
                format!("Party {party_id} already owns item {item_id}"),
            ));
        }

        let record = OwnershipRecord::new(item_id.clone(), party_id.clone());
        tx.insert_ownership(&record).await?;
        let share_status = recompute_share_status(tx.as_mut(), item_id).await?;
        tx.commit().await?;

        info!(
            item_id = %item_id,
            party_id = %party_id,
            share_status = ?share_status,
            "Ownership added"
        );
        Ok(record)
    }

    /// Remove `party_id` from the owners of `item_id`.
    ///
    /// Every proposal of the item whose ratios name the party is deleted,
    /// then the share status is recomputed.
    pub async fn remove_ownership(
        &self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> NegotiationResult<OwnershipRemoval> {
        self.remove_ownership_tx(item_id, party_id)
            .await
            .inspect_err(|e| log_failure("remove_ownership", e))
    }

    async fn remove_ownership_tx(
        &self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> NegotiationResult<OwnershipRemoval> {
        let mut tx = self.store.begin().await?;
        lock_existing_item(tx.as_mut(), item_id).await?;

        if !tx.delete_ownership(item_id, party_id).await? {
            return Err(NegotiationError::NotFound(format!(
                "party {party_id} does not own item {item_id}"
            )));
        }

        let mut removed_proposals = Vec::new();
        for proposal in tx.list_proposals_for_item(item_id).await? {
            if proposal.references_party(party_id) && tx.delete_proposal(&proposal.id).await? {
                removed_proposals.push(proposal.id);
            }
        }

        let share_status = recompute_share_status(tx.as_mut(), item_id).await?;
        tx.commit().await?;

        if !removed_proposals.is_empty() {
            warn!(
                item_id = %item_id,
                party_id = %party_id,
                removed = removed_proposals.len(),
                "Proposals deleted with removed ownership"
            );
        }
        info!(
            item_id = %item_id,
            party_id = %party_id,
            share_status = ?share_status,
            "Ownership removed"
        );

        Ok(OwnershipRemoval {
            share_status,
            removed_proposals,
        })
    }

    /// Current owners of an item.
    pub async fn owners_of(&self, item_id: &ItemId) -> NegotiationResult<OwnerSet> {
        let mut tx = self.store.begin().await?;
        require_item(tx.as_mut(), item_id).await?;
        let owners = tx.list_owners(item_id).await?;
        tx.commit().await?;
        Ok(owners)
    }

    /// Owners of an item resolved to party names. Unknown names fall back to the id.
    pub async fn parties_sharing(&self, item_id: &ItemId) -> NegotiationResult<Vec<PartySummary>> {
        let owners = self.owners_of(item_id).await?;
        let mut parties = Vec::with_capacity(owners.len());
        for party_id in owners {
            let name = self
                .directory
                .party_name(&party_id)
                .await?
                .unwrap_or_else(|| party_id.to_string());
            parties.push(PartySummary { party_id, name });
        }
        Ok(parties)
    }
}

pub(crate) async fn require_item(
    tx: &mut dyn NegotiationTx,
    item_id: &ItemId,
) -> NegotiationResult<Item> {
    tx.get_item(item_id)
        .await?
        .ok_or_else(|| NegotiationError::NotFound(format!("item {item_id} not found")))
}

pub(crate) async fn lock_existing_item(
    tx: &mut dyn NegotiationTx,
    item_id: &ItemId,
) -> NegotiationResult<Item> {
    tx.lock_item(item_id)
        .await?
        .ok_or_else(|| NegotiationError::NotFound(format!("item {item_id} not found")))
}

async fn recompute_share_status(
    tx: &mut dyn NegotiationTx,
    item_id: &ItemId,
) -> NegotiationResult<ShareStatus> {
    let owners = tx.list_owners(item_id).await?;
    let status = ShareStatus::from_owner_count(owners.len());
    tx.set_share_status(item_id, status).await?;
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_storage::memory::{InMemoryDirectory, InMemoryNegotiationStore};

    fn setup() -> OwnershipLedger {
        let directory = InMemoryDirectory::new();
        for (id, name) in [("p1", "Acme"), ("p2", "Globex"), ("p3", "Initech")] {
            directory.register_party(PartyId::new(id), name).unwrap();
        }
        OwnershipLedger::new(
            Arc::new(InMemoryNegotiationStore::new()),
            Arc::new(directory),
        )
    }

    #[tokio::test]
    async fn share_status_tracks_owner_count() {
        let ledger = setup();
        let item = ledger.create_item("Warehouse").await.unwrap();
        let p1 = PartyId::new("p1");
        let p2 = PartyId::new("p2");

        ledger.add_ownership(&item.id, &p1).await.unwrap();
        assert!(!ledger.get_item(&item.id).await.unwrap().is_shared());

        ledger.add_ownership(&item.id, &p2).await.unwrap();
        assert!(ledger.get_item(&item.id).await.unwrap().is_shared());

        let removal = ledger.remove_ownership(&item.id, &p2).await.unwrap();
        assert_eq!(removal.share_status, ShareStatus::NotShared);
        assert!(!ledger.get_item(&item.id).await.unwrap().is_shared());
    }

    #[tokio::test]
    async fn duplicate_ownership_is_bad_request() {
        let ledger = setup();
        let item = ledger.create_item("Boat").await.unwrap();
        let p1 = PartyId::new("p1");
        ledger.add_ownership(&item.id, &p1).await.unwrap();

        let err = ledger.add_ownership(&item.id, &p1).await.unwrap_err();
        assert!(err.has_issue(IssueCode::AlreadyOwned));
    }

    #[tokio::test]
    async fn unknown_item_or_party_is_not_found() {
        let ledger = setup();
        let item = ledger.create_item("Boat").await.unwrap();

        let err = ledger
            .add_ownership(&ItemId::new("missing"), &PartyId::new("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NotFound(_)));

        let err = ledger
            .add_ownership(&item.id, &PartyId::new("ghost"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NotFound(_)));

        let err = ledger
            .remove_ownership(&item.id, &PartyId::new("p1"))
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NotFound(_)));
    }

    #[tokio::test]
    async fn missing_item_is_reported_before_missing_party() {
        let ledger = setup();

        let err = ledger
            .add_ownership(&ItemId::new("missing"), &PartyId::new("ghost"))
            .await
            .unwrap_err();
        let NegotiationError::NotFound(message) = err else {
            panic!("expected NotFound, got {err:?}");
        };
        assert!(message.contains("item missing"), "{message}");
    }

    #[tokio::test]
    async fn parties_sharing_resolves_names() {
        let ledger = setup();
        let item = ledger.create_item("Boat").await.unwrap();
        ledger.add_ownership(&item.id, &PartyId::new("p2")).await.unwrap();
        ledger.add_ownership(&item.id, &PartyId::new("p1")).await.unwrap();

        let parties = ledger.parties_sharing(&item.id).await.unwrap();
        let names = parties.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Acme", "Globex"]);
    }

    #[tokio::test]
    async fn blank_item_name_is_rejected() {
        let ledger = setup();
        let err = ledger.create_item("   ").await.unwrap_err();
        assert!(err.has_issue(IssueCode::InvalidInput));
        assert!(ledger.list_items(QueryWindow::default()).await.unwrap().is_empty());
    }
}
