//! Negotiation Query Service
//!
//! Reads back the proposals of one item, oldest first, and labels every
//! author and responder for a given viewer: members of the same party see
//! the username, everybody else sees the party name.

use crate::ledger::require_item;
use crate::{NegotiationError, NegotiationResult};
use accord_storage::{IdentityDirectory, NegotiationStore, ProposalStore};
use accord_types::{
    ActorContext, Decimal, Item, ItemId, PartyId, PaymentType, Proposal, ProposalId,
    ProposalStatus, RatioResponse, UserId,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Label shown for a ratio nobody has answered yet.
pub const NOT_RESPONDED: &str = "Not responded";

/// One ratio as shown to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioView {
    pub party_id: PartyId,
    pub party_name: String,
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub response: RatioResponse,
    pub responded_by: String,
}

/// One proposal as shown to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub proposal_id: ProposalId,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub comment: Option<String>,
    pub status: ProposalStatus,
    pub counter_to: Option<ProposalId>,
    pub ratios: Vec<RatioView>,
}

/// The ordered negotiation history of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NegotiationTranscript {
    pub item: Item,
    pub entries: Vec<TranscriptEntry>,
    /// parent id -> ids of the proposals that counter it, oldest first
    pub counters: BTreeMap<ProposalId, Vec<ProposalId>>,
}

impl NegotiationTranscript {
    pub fn entry(&self, proposal_id: &ProposalId) -> Option<&TranscriptEntry> {
        self.entries.iter().find(|e| &e.proposal_id == proposal_id)
    }

    pub fn counters_of(&self, proposal_id: &ProposalId) -> &[ProposalId] {
        self.counters
            .get(proposal_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// The newest proposal that nobody has countered yet.
    pub fn chain_tip(&self) -> Option<&TranscriptEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| self.counters_of(&e.proposal_id).is_empty())
    }
}

/// Builds negotiation transcripts.
#[derive(Clone)]
pub struct TranscriptService {
    store: Arc<dyn NegotiationStore>,
    directory: Arc<dyn IdentityDirectory>,
}

impl TranscriptService {
    pub fn new(store: Arc<dyn NegotiationStore>, directory: Arc<dyn IdentityDirectory>) -> Self {
        Self { store, directory }
    }

    /// Transcript of `item_id` as seen by `viewer`.
    ///
    /// `NotFound` when the item is missing, not shared, or has no proposals.
    pub async fn get_transcript(
        &self,
        item_id: &ItemId,
        viewer: &ActorContext,
    ) -> NegotiationResult<NegotiationTranscript> {
        let mut tx = self.store.begin().await?;
        let item = require_item(tx.as_mut(), item_id).await?;
        if !item.is_shared() {
            return Err(NegotiationError::NotFound(format!(
                "item {item_id} is not shared"
            )));
        }
        let proposals = tx.list_proposals_for_item(item_id).await?;
        tx.commit().await?;

        if proposals.is_empty() {
            return Err(NegotiationError::NotFound(format!(
                "item {item_id} has no proposals"
            )));
        }

        let counters = counter_index(&proposals);
        let mut labels = Labeler::new(self.directory.as_ref(), viewer);
        let mut entries = Vec::with_capacity(proposals.len());
        for proposal in proposals {
            entries.push(labels.entry(proposal).await?);
        }

        Ok(NegotiationTranscript {
            item,
            entries,
            counters,
        })
    }
}

/// Map each parent to the proposals countering it.
pub fn counter_index(proposals: &[Proposal]) -> BTreeMap<ProposalId, Vec<ProposalId>> {
    let mut index: BTreeMap<ProposalId, Vec<ProposalId>> = BTreeMap::new();
    for proposal in proposals {
        if let Some(parent) = &proposal.counter_to {
            index
                .entry(parent.clone())
                .or_default()
                .push(proposal.id.clone());
        }
    }
    index
}

/// Resolves labels with per-transcript caches.
struct Labeler<'a> {
    directory: &'a dyn IdentityDirectory,
    viewer: &'a ActorContext,
    party_names: HashMap<PartyId, String>,
    usernames: HashMap<UserId, String>,
}

impl<'a> Labeler<'a> {
    fn new(directory: &'a dyn IdentityDirectory, viewer: &'a ActorContext) -> Self {
        Self {
            directory,
            viewer,
            party_names: HashMap::new(),
            usernames: HashMap::new(),
        }
    }

    async fn entry(&mut self, proposal: Proposal) -> NegotiationResult<TranscriptEntry> {
        let created_by = self.label(&proposal.author_id, &proposal.author_party).await?;
        let mut ratios = Vec::with_capacity(proposal.ratios.len());
        for ratio in proposal.ratios {
            let responded_by = match &ratio.responded_by {
                Some(user_id) => self.label(user_id, &ratio.party_id).await?,
                None => NOT_RESPONDED.to_string(),
            };
            ratios.push(RatioView {
                party_name: self.party_name(&ratio.party_id).await?,
                party_id: ratio.party_id,
                payment_type: ratio.payment_type,
                amount: ratio.amount,
                response: ratio.response,
                responded_by,
            });
        }

        Ok(TranscriptEntry {
            proposal_id: proposal.id,
            created_at: proposal.created_at,
            created_by,
            comment: proposal.comment,
            status: proposal.status,
            counter_to: proposal.counter_to,
            ratios,
        })
    }

    /// Username for the viewer's own party, party name for every other.
    async fn label(&mut self, user_id: &UserId, party_id: &PartyId) -> NegotiationResult<String> {
        if self.viewer.is_member_of(party_id) {
            self.username(user_id).await
        } else {
            self.party_name(party_id).await
        }
    }

    async fn username(&mut self, user_id: &UserId) -> NegotiationResult<String> {
        if let Some(name) = self.usernames.get(user_id) {
            return Ok(name.clone());
        }
        let name = self
            .directory
            .resolve_user(user_id)
            .await?
            .map(|actor| actor.username)
            .unwrap_or_else(|| user_id.to_string());
        self.usernames.insert(user_id.clone(), name.clone());
        Ok(name)
    }

    async fn party_name(&mut self, party_id: &PartyId) -> NegotiationResult<String> {
        if let Some(name) = self.party_names.get(party_id) {
            return Ok(name.clone());
        }
        let name = self
            .directory
            .party_name(party_id)
            .await?
            .unwrap_or_else(|| party_id.to_string());
        self.party_names.insert(party_id.clone(), name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_types::RatioTerm;

    fn proposal(id: &str, counter_to: Option<&str>) -> Proposal {
        let author = ActorContext::new(UserId::new("u1"), PartyId::new("p1"), "u1");
        let mut proposal = Proposal::draft(
            ItemId::new("item"),
            &author,
            None,
            counter_to.map(ProposalId::new),
            vec![
                RatioTerm::percentage(PartyId::new("p1"), 50),
                RatioTerm::percentage(PartyId::new("p2"), 50),
            ],
        );
        proposal.id = ProposalId::new(id);
        proposal
    }

    #[test]
    fn counter_index_links_parents_to_children() {
        let proposals = vec![
            proposal("a", None),
            proposal("b", Some("a")),
            proposal("c", Some("b")),
        ];
        let index = counter_index(&proposals);
        assert_eq!(index.get(&ProposalId::new("a")), Some(&vec![ProposalId::new("b")]));
        assert_eq!(index.get(&ProposalId::new("b")), Some(&vec![ProposalId::new("c")]));
        assert!(index.get(&ProposalId::new("c")).is_none());
    }
}
