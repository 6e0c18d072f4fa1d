//! Proposals and payment ratios
//!
//! A proposal is one offer of a payment split among all owners of an item.
//! Counter-proposals point back at their predecessor through
//! `counter_to`, forming a singly-linked chain to the initial proposal.

use crate::{ActorContext, ItemId, PartyId, ProposalId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle of a proposal. `Accepted` and `Rejected` are terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProposalStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Pending)
    }

    /// Only `Pending -> Accepted` and `Pending -> Rejected` are legal
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        matches!(
            (self, next),
            (ProposalStatus::Pending, ProposalStatus::Accepted)
                | (ProposalStatus::Pending, ProposalStatus::Rejected)
        )
    }
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "Pending"),
            ProposalStatus::Accepted => write!(f, "Accepted"),
            ProposalStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

/// A party's answer to a proposal, recorded on its payment ratio
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum RatioResponse {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

/// The answer a reviewer gives
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewResponse {
    Accepted,
    Rejected,
}

impl From<ReviewResponse> for RatioResponse {
    fn from(response: ReviewResponse) -> Self {
        match response {
            ReviewResponse::Accepted => RatioResponse::Accepted,
            ReviewResponse::Rejected => RatioResponse::Rejected,
        }
    }
}

/// How a ratio amount is to be read
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    /// Share of the total, in percent; a set must add up to exactly 100
    Percentage,
    /// Absolute amount
    Fixed,
}

impl std::fmt::Display for PaymentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentType::Percentage => write!(f, "Percentage"),
            PaymentType::Fixed => write!(f, "Fixed"),
        }
    }
}

/// One party's proposed terms, as submitted by a caller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatioTerm {
    pub party_id: PartyId,
    pub payment_type: PaymentType,
    pub amount: Decimal,
}

impl RatioTerm {
    pub fn new(party_id: PartyId, payment_type: PaymentType, amount: Decimal) -> Self {
        Self {
            party_id,
            payment_type,
            amount,
        }
    }

    pub fn percentage(party_id: PartyId, amount: impl Into<Decimal>) -> Self {
        Self::new(party_id, PaymentType::Percentage, amount.into())
    }

    pub fn fixed(party_id: PartyId, amount: impl Into<Decimal>) -> Self {
        Self::new(party_id, PaymentType::Fixed, amount.into())
    }
}

/// A stored payment ratio: terms plus the owning party's response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRatio {
    pub party_id: PartyId,
    pub payment_type: PaymentType,
    pub amount: Decimal,
    pub response: RatioResponse,
    /// The user who set `response`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub responded_by: Option<UserId>,
}

impl PaymentRatio {
    pub fn pending(term: RatioTerm) -> Self {
        Self {
            party_id: term.party_id,
            payment_type: term.payment_type,
            amount: term.amount,
            response: RatioResponse::Pending,
            responded_by: None,
        }
    }

    pub fn respond(&mut self, response: RatioResponse, user_id: UserId) {
        self.response = response;
        self.responded_by = Some(user_id);
    }
}

/// A proposal with its payment ratios
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub item_id: ItemId,
    /// The user who submitted the proposal
    pub author_id: UserId,
    /// The author's party at submission time
    pub author_party: PartyId,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub status: ProposalStatus,
    /// `None` for an initial proposal
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counter_to: Option<ProposalId>,
    pub ratios: Vec<PaymentRatio>,
}

impl Proposal {
    /// Build a pending proposal whose author's own ratio is already accepted.
    ///
    /// Self-acceptance is implicit: the author agrees to their own terms.
    pub fn draft(
        item_id: ItemId,
        author: &ActorContext,
        comment: Option<String>,
        counter_to: Option<ProposalId>,
        terms: Vec<RatioTerm>,
    ) -> Self {
        let mut ratios: Vec<PaymentRatio> = terms.into_iter().map(PaymentRatio::pending).collect();
        for ratio in ratios.iter_mut() {
            if ratio.party_id == author.party_id {
                ratio.respond(RatioResponse::Accepted, author.user_id.clone());
            }
        }

        Self {
            id: ProposalId::generate(),
            item_id,
            author_id: author.user_id.clone(),
            author_party: author.party_id.clone(),
            created_at: Utc::now(),
            comment,
            status: ProposalStatus::Pending,
            counter_to,
            ratios,
        }
    }

    pub fn is_counter(&self) -> bool {
        self.counter_to.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    pub fn ratio_for(&self, party_id: &PartyId) -> Option<&PaymentRatio> {
        self.ratios.iter().find(|r| &r.party_id == party_id)
    }

    pub fn ratio_for_mut(&mut self, party_id: &PartyId) -> Option<&mut PaymentRatio> {
        self.ratios.iter_mut().find(|r| &r.party_id == party_id)
    }

    /// Whether any ratio of this proposal names the given party
    pub fn references_party(&self, party_id: &PartyId) -> bool {
        self.ratio_for(party_id).is_some()
    }

    pub fn all_accepted(&self) -> bool {
        !self.ratios.is_empty()
            && self
                .ratios
                .iter()
                .all(|r| r.response == RatioResponse::Accepted)
    }

    /// The parties covered by this proposal's ratios
    pub fn parties(&self) -> impl Iterator<Item = &PartyId> {
        self.ratios.iter().map(|r| &r.party_id)
    }
}
