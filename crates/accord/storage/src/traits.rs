use crate::StorageResult;
use accord_types::{
    ActorContext, Item, ItemId, OwnerSet, OwnershipRecord, PartyId, Proposal, ProposalId,
    ProposalStatus, RatioResponse, ShareStatus, UserId,
};
use async_trait::async_trait;

/// Generic query window for paged reads. A `limit` of zero means "no limit".
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

/// Apply a window to an already ordered result set.
pub fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}

/// Item registry inside a transaction.
#[async_trait]
pub trait ItemStore: Send {
    /// Insert a new item. Fails with `Conflict` if the id is taken.
    async fn insert_item(&mut self, item: &Item) -> StorageResult<()>;

    async fn get_item(&mut self, item_id: &ItemId) -> StorageResult<Option<Item>>;

    /// Read an item and hold its row for the rest of the transaction.
    ///
    /// Every write that depends on an item's owners or open proposal goes
    /// through this first, so two writers on one item are serialised.
    async fn lock_item(&mut self, item_id: &ItemId) -> StorageResult<Option<Item>>;

    async fn set_share_status(&mut self, item_id: &ItemId, status: ShareStatus)
        -> StorageResult<()>;

    /// List items oldest-first.
    async fn list_items(&mut self, window: QueryWindow) -> StorageResult<Vec<Item>>;
}

/// Ownership facts inside a transaction.
#[async_trait]
pub trait OwnershipStore: Send {
    async fn list_owners(&mut self, item_id: &ItemId) -> StorageResult<OwnerSet>;

    async fn get_ownership(
        &mut self,
        item_id: &ItemId,
        party_id: &PartyId,
    ) -> StorageResult<Option<OwnershipRecord>>;

    /// Insert a membership fact. Fails with `Conflict` if it already exists.
    async fn insert_ownership(&mut self, record: &OwnershipRecord) -> StorageResult<()>;

    /// Remove a membership fact, returning whether it existed.
    async fn delete_ownership(&mut self, item_id: &ItemId, party_id: &PartyId)
        -> StorageResult<bool>;
}

/// Proposals and their payment ratios inside a transaction.
#[async_trait]
pub trait ProposalStore: Send {
    /// Insert a proposal together with all of its ratios.
    ///
    /// Fails with `Conflict` if the id is taken or if the proposal is
    /// pending while the item already has a pending proposal.
    async fn insert_proposal(&mut self, proposal: &Proposal) -> StorageResult<()>;

    async fn get_proposal(&mut self, proposal_id: &ProposalId) -> StorageResult<Option<Proposal>>;

    /// All proposals of an item, by creation time ascending (insertion order on ties).
    async fn list_proposals_for_item(&mut self, item_id: &ItemId) -> StorageResult<Vec<Proposal>>;

    /// Move a proposal from `expected_from` to `to`.
    ///
    /// Fails with `StatusMismatch` if the stored status is not `expected_from`.
    async fn transition_status(
        &mut self,
        proposal_id: &ProposalId,
        expected_from: ProposalStatus,
        to: ProposalStatus,
    ) -> StorageResult<()>;

    /// Record one party's response on a proposal's ratio.
    async fn set_ratio_response(
        &mut self,
        proposal_id: &ProposalId,
        party_id: &PartyId,
        response: RatioResponse,
        responder: &UserId,
    ) -> StorageResult<()>;

    /// Delete a proposal and its ratios, returning whether it existed.
    async fn delete_proposal(&mut self, proposal_id: &ProposalId) -> StorageResult<bool>;

    /// List proposals of every item, newest-first.
    async fn list_proposals(&mut self, window: QueryWindow) -> StorageResult<Vec<Proposal>>;
}

/// A scoped unit of work. Dropping it without `commit` rolls back.
#[async_trait]
pub trait NegotiationTx: ItemStore + OwnershipStore + ProposalStore + Send {
    async fn commit(self: Box<Self>) -> StorageResult<()>;

    async fn rollback(self: Box<Self>) -> StorageResult<()>;
}

/// Factory for transactions.
#[async_trait]
pub trait NegotiationStore: Send + Sync {
    async fn begin(&self) -> StorageResult<Box<dyn NegotiationTx>>;
}

/// External identity lookup consumed by the engine.
#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Resolve a user to `(user, party, username)`. `None` if the user is
    /// unknown or belongs to no party.
    async fn resolve_user(&self, user_id: &UserId) -> StorageResult<Option<ActorContext>>;

    async fn party_name(&self, party_id: &PartyId) -> StorageResult<Option<String>>;
}
