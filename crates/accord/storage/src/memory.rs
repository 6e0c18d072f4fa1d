//! In-memory reference implementation of the negotiation storage traits.
//!
//! One async mutex serialises transactions. Each transaction edits a private
//! copy of the state which replaces the shared state only on commit.
//! Production deployments should use the PostgreSQL adapter.

use crate::traits::{
    apply_window, IdentityDirectory, ItemStore, NegotiationStore, NegotiationTx, OwnershipStore,
    ProposalStore, QueryWindow,
};
use crate::{StorageError, StorageResult};
use accord_types::{
    ActorContext, Item, ItemId, OwnerSet, OwnershipRecord, PartyId, Proposal, ProposalId,
    ProposalStatus, RatioResponse, ShareStatus, UserId,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
struct MemoryState {
    items: HashMap<ItemId, Item>,
    item_order: Vec<ItemId>,
    ownerships: BTreeMap<(ItemId, PartyId), OwnershipRecord>,
    /// Insertion order is preserved; it breaks ties on equal timestamps.
    proposals: Vec<Proposal>,
}

impl MemoryState {
    fn proposal_mut(&mut self, proposal_id: &ProposalId) -> StorageResult<&mut Proposal> {
        self.proposals
            .iter_mut()
            .find(|p| &p.id == proposal_id)
            .ok_or_else(|| StorageError::NotFound(format!("proposal {proposal_id} not found")))
    }
}

/// In-memory negotiation store.
#[derive(Clone, Default)]
pub struct InMemoryNegotiationStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryNegotiationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NegotiationStore for InMemoryNegotiationStore {
    async fn begin(&self) -> StorageResult<Box<dyn NegotiationTx>> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTx { guard, working }))
    }
}

/// Transaction over [`InMemoryNegotiationStore`].
pub struct InMemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl NegotiationTx for InMemoryTx {
    async fn commit(self: Box<Self>) -> StorageResult<()> {
        let InMemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ItemStore for InMemoryTx {
    async fn insert_item(&mut self, item: &Item) -> StorageResult<()> {
        if self.working.items.contains_key(&item.id) {
            return Err(StorageError::Conflict(format!(
                "item {} already exists",
                item.id
            )));
        }
        self.working.item_order.push(item.id.clone());
        self.working.items.insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn get_item(&mut self, item_id: &ItemId) -> StorageResult<Option<Item>> {
        Ok(self.working.items.get(item_id).cloned())
    }

    async fn lock_item(&mut self, item_id: &ItemId) -> StorageResult<Option<Item>> {
        // The whole store is already held by this transaction.
        self.get_item(item_id).await
    }

    async fn set_share_status(
        &mut self,
        item_id: &ItemId,
        status: ShareStatus,
    ) -> StorageResult<()> {
        let item = self
            .working
            .items
            .get_mut(item_id)
            .ok_or_else(|| StorageError::NotFound(format!("item {item_id} not found")))?;
        item.share_status = status;
        Ok(())
    }

    async fn list_items(&mut self, window: QueryWindow) -> StorageResult<Vec<Item>> {
        let values = self
            .working
            .item_order
            .iter()
            .filter_map(|id| self.working.items.get(id).cloned())
            .collect::<Vec<_>>();
        Ok(apply_window(values, window))
    }
}

#[async_trait]
impl OwnershipStore for InMemoryTx {
    async fn list_owners(&mut self, item_id: &ItemId) -> StorageResult<OwnerSet> {
        Ok(self
            .working
            .ownerships
            .keys()
            .filter(|(item, _)| item == item_id)
            .map(|(_, party)| party.clone())
            .collect())
    }

    async fn get_ownership(
        &mut self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> StorageResult<Option<OwnershipRecord>> {
        Ok(self
            .working
            .ownerships
            .get(&(item_id.clone(), party_id.clone()))
            .cloned())
    }

    async fn insert_ownership(&mut self, record: &OwnershipRecord) -> StorageResult<()> {
        if !self.working.items.contains_key(&record.item_id) {
            return Err(StorageError::NotFound(format!(
                "item {} not found",
                record.item_id
            )));
        }
        let key = (record.item_id.clone(), record.party_id.clone());
        if self.working.ownerships.contains_key(&key) {
            return Err(StorageError::Conflict(format!(
                "party {} already owns item {}",
                record.party_id, record.item_id
            )));
        }
        self.working.ownerships.insert(key, record.clone());
        Ok(())
    }

    async fn delete_ownership(
        &mut self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> StorageResult<bool> {
        Ok(self
            .working
            .ownerships
            .remove(&(item_id.clone(), party_id.clone()))
            .is_some())
    }
}

#[async_trait]
impl ProposalStore for InMemoryTx {
    async fn insert_proposal(&mut self, proposal: &Proposal) -> StorageResult<()> {
        if !self.working.items.contains_key(&proposal.item_id) {
            return Err(StorageError::NotFound(format!(
                "item {} not found",
                proposal.item_id
            )));
        }
        if self.working.proposals.iter().any(|p| p.id == proposal.id) {
            return Err(StorageError::Conflict(format!(
                "proposal {} already exists",
                proposal.id
            )));
        }
        if proposal.is_pending()
            && self
                .working
                .proposals
                .iter()
                .any(|p| p.item_id == proposal.item_id && p.is_pending())
        {
            return Err(StorageError::Conflict(format!(
                "item {} already has a pending proposal",
                proposal.item_id
            )));
        }
        self.working.proposals.push(proposal.clone());
        Ok(())
    }

    async fn get_proposal(&mut self, proposal_id: &ProposalId) -> StorageResult<Option<Proposal>> {
        Ok(self
            .working
            .proposals
            .iter()
            .find(|p| &p.id == proposal_id)
            .cloned())
    }

    async fn list_proposals_for_item(&mut self, item_id: &ItemId) -> StorageResult<Vec<Proposal>> {
        let mut values = self
            .working
            .proposals
            .iter()
            .filter(|p| &p.item_id == item_id)
            .cloned()
            .collect::<Vec<_>>();
        // Stable sort keeps insertion order on equal timestamps.
        values.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(values)
    }

    async fn transition_status(
        &mut self,
        proposal_id: &ProposalId,
        expected_from: ProposalStatus,
        to: ProposalStatus,
    ) -> StorageResult<()> {
        let proposal = self.working.proposal_mut(proposal_id)?;
        if proposal.status != expected_from {
            return Err(StorageError::StatusMismatch {
                proposal_id: proposal_id.clone(),
                expected: expected_from,
                found: proposal.status,
            });
        }
        proposal.status = to;
        Ok(())
    }

    async fn set_ratio_response(
        &mut self,
        proposal_id: &ProposalId,
        party_id: &PartyId,
        response: RatioResponse,
        responder: &UserId,
    ) -> StorageResult<()> {
        let proposal = self.working.proposal_mut(proposal_id)?;
        let ratio = proposal.ratio_for_mut(party_id).ok_or_else(|| {
            StorageError::NotFound(format!(
                "proposal {proposal_id} has no ratio for party {party_id}"
            ))
        })?;
        ratio.respond(response, responder.clone());
        Ok(())
    }

    async fn delete_proposal(&mut self, proposal_id: &ProposalId) -> StorageResult<bool> {
        let before = self.working.proposals.len();
        self.working.proposals.retain(|p| &p.id != proposal_id);
        Ok(self.working.proposals.len() != before)
    }

    async fn list_proposals(&mut self, window: QueryWindow) -> StorageResult<Vec<Proposal>> {
        let mut values = self.working.proposals.clone();
        values.reverse();
        values.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apply_window(values, window))
    }
}

/// In-memory identity directory: users, their party, and party names.
#[derive(Default)]
pub struct InMemoryDirectory {
    parties: RwLock<HashMap<PartyId, String>>,
    users: RwLock<HashMap<UserId, ActorContext>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_party(&self, party_id: PartyId, name: impl Into<String>) -> StorageResult<()> {
        let mut guard = self
            .parties
            .write()
            .map_err(|_| StorageError::Backend("parties lock poisoned".to_string()))?;
        guard.insert(party_id, name.into());
        Ok(())
    }

    /// Register a user as a member of a known party.
    pub fn register_user(
        &self,
        user_id: UserId,
        party_id: PartyId,
        username: impl Into<String>,
    ) -> StorageResult<()> {
        {
            let parties = self
                .parties
                .read()
                .map_err(|_| StorageError::Backend("parties lock poisoned".to_string()))?;
            if !parties.contains_key(&party_id) {
                return Err(StorageError::NotFound(format!("party {party_id} not found")));
            }
        }
        let mut guard = self
            .users
            .write()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        guard.insert(
            user_id.clone(),
            ActorContext::new(user_id, party_id, username),
        );
        Ok(())
    }
}

#[async_trait]
impl IdentityDirectory for InMemoryDirectory {
    async fn resolve_user(&self, user_id: &UserId) -> StorageResult<Option<ActorContext>> {
        let guard = self
            .users
            .read()
            .map_err(|_| StorageError::Backend("users lock poisoned".to_string()))?;
        Ok(guard.get(user_id).cloned())
    }

    async fn party_name(&self, party_id: &PartyId) -> StorageResult<Option<String>> {
        let guard = self
            .parties
            .read()
            .map_err(|_| StorageError::Backend("parties lock poisoned".to_string()))?;
        Ok(guard.get(party_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::{RatioTerm, ShareStatus};

    fn actor(user: &str, party: &str) -> ActorContext {
        ActorContext::new(UserId::new(user), PartyId::new(party), user)
    }

    fn pending_proposal(item_id: &ItemId) -> Proposal {
        Proposal::draft(
            item_id.clone(),
            &actor("alice", "p1"),
            None,
            None,
            vec![
                RatioTerm::percentage(PartyId::new("p1"), 50),
                RatioTerm::percentage(PartyId::new("p2"), 50),
            ],
        )
    }

    async fn seeded() -> (InMemoryNegotiationStore, ItemId) {
        let store = InMemoryNegotiationStore::new();
        let item = Item::new("Boat");
        let item_id = item.id.clone();
        let mut tx = store.begin().await.unwrap();
        tx.insert_item(&item).await.unwrap();
        tx.commit().await.unwrap();
        (store, item_id)
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let (store, item_id) = seeded().await;
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_ownership(&OwnershipRecord::new(item_id.clone(), PartyId::new("p1")))
                .await
                .unwrap();
            tx.set_share_status(&item_id, ShareStatus::Shared)
                .await
                .unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.list_owners(&item_id).await.unwrap().is_empty());
        let item = tx.get_item(&item_id).await.unwrap().unwrap();
        assert_eq!(item.share_status, ShareStatus::NotShared);
    }

    #[tokio::test]
    async fn committed_transaction_is_visible() {
        let (store, item_id) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_ownership(&OwnershipRecord::new(item_id.clone(), PartyId::new("p1")))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let owners = tx.list_owners(&item_id).await.unwrap();
        assert!(owners.contains(&PartyId::new("p1")));
    }

    #[tokio::test]
    async fn duplicate_ownership_conflicts() {
        let (store, item_id) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        let record = OwnershipRecord::new(item_id.clone(), PartyId::new("p1"));
        tx.insert_ownership(&record).await.unwrap();
        let result = tx.insert_ownership(&record).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn second_pending_proposal_conflicts() {
        let (store, item_id) = seeded().await;
        let mut tx = store.begin().await.unwrap();
        tx.insert_proposal(&pending_proposal(&item_id)).await.unwrap();
        let result = tx.insert_proposal(&pending_proposal(&item_id)).await;
        assert!(matches!(result, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn transition_checks_expected_status() {
        let (store, item_id) = seeded().await;
        let proposal = pending_proposal(&item_id);
        let mut tx = store.begin().await.unwrap();
        tx.insert_proposal(&proposal).await.unwrap();
        tx.transition_status(&proposal.id, ProposalStatus::Pending, ProposalStatus::Rejected)
            .await
            .unwrap();

        let result = tx
            .transition_status(&proposal.id, ProposalStatus::Pending, ProposalStatus::Accepted)
            .await;
        assert!(matches!(
            result,
            Err(StorageError::StatusMismatch {
                expected: ProposalStatus::Pending,
                found: ProposalStatus::Rejected,
                ..
            })
        ));

        // The item has no pending proposal any more.
        tx.insert_proposal(&pending_proposal(&item_id)).await.unwrap();
    }

    #[tokio::test]
    async fn ratio_response_records_responder() {
        let (store, item_id) = seeded().await;
        let proposal = pending_proposal(&item_id);
        let mut tx = store.begin().await.unwrap();
        tx.insert_proposal(&proposal).await.unwrap();
        tx.set_ratio_response(
            &proposal.id,
            &PartyId::new("p2"),
            RatioResponse::Accepted,
            &UserId::new("bob"),
        )
        .await
        .unwrap();

        let stored = tx.get_proposal(&proposal.id).await.unwrap().unwrap();
        let ratio = stored.ratio_for(&PartyId::new("p2")).unwrap();
        assert_eq!(ratio.response, RatioResponse::Accepted);
        assert_eq!(ratio.responded_by, Some(UserId::new("bob")));
        assert!(stored.all_accepted());
    }

    #[tokio::test]
    async fn delete_proposal_reports_existence() {
        let (store, item_id) = seeded().await;
        let proposal = pending_proposal(&item_id);
        let mut tx = store.begin().await.unwrap();
        tx.insert_proposal(&proposal).await.unwrap();
        assert!(tx.delete_proposal(&proposal.id).await.unwrap());
        assert!(!tx.delete_proposal(&proposal.id).await.unwrap());
        assert!(tx.list_proposals_for_item(&item_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn directory_requires_known_party() {
        let directory = InMemoryDirectory::new();
        let result = directory.register_user(UserId::new("u"), PartyId::new("ghost"), "u");
        assert!(matches!(result, Err(StorageError::NotFound(_))));

        directory
            .register_party(PartyId::new("p1"), "Acme")
            .unwrap();
        directory
            .register_user(UserId::new("u"), PartyId::new("p1"), "una")
            .unwrap();
        let actor = directory
            .resolve_user(&UserId::new("u"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(actor.party_id, PartyId::new("p1"));
        assert_eq!(actor.username, "una");
        assert_eq!(
            directory.party_name(&PartyId::new("p1")).await.unwrap(),
            Some("Acme".to_string())
        );
    }
}
