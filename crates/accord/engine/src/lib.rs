//! Accord Negotiation Engine
//!
//! Multi-party negotiation over the payment split of a jointly owned item.
//!
//! # Components
//!
//! - [`OwnershipLedger`]: which parties own which items; derives share status.
//! - [`validator`]: pure checks of a payment-ratio set against an owner set.
//! - [`ProposalEngine`]: initial proposals, counter-proposals and reviews.
//! - [`TranscriptService`]: the ordered, labelled history of one item.
//!
//! Every operation runs inside one storage transaction and either commits
//! as a whole or leaves no trace. Callers are identified by an explicit
//! [`ActorContext`](accord_types::ActorContext), resolved once through
//! [`AccordEngine::actor`].

#![deny(unsafe_code)]

mod error;
pub mod ledger;
mod policy;
pub mod proposals;
pub mod transcript;
pub mod validator;

pub use error::{NegotiationError, NegotiationResult};
pub use ledger::{OwnershipLedger, OwnershipRemoval, PartySummary};
pub use policy::NegotiationPolicy;
pub use proposals::{ProposalEngine, ReviewOutcome, ReviewRequest};
pub use transcript::{NegotiationTranscript, RatioView, TranscriptEntry, TranscriptService};
pub use validator::{validate_ratio_set, ValidatedRatios};

use accord_storage::memory::InMemoryNegotiationStore;
use accord_storage::{IdentityDirectory, NegotiationStore};
use accord_types::{ActorContext, UserId};
use std::sync::Arc;

/// Facade bundling the four components over one store and directory.
#[derive(Clone)]
pub struct AccordEngine {
    ledger: OwnershipLedger,
    proposals: ProposalEngine,
    transcripts: TranscriptService,
    directory: Arc<dyn IdentityDirectory>,
}

impl AccordEngine {
    pub fn new(
        store: Arc<dyn NegotiationStore>,
        directory: Arc<dyn IdentityDirectory>,
        policy: NegotiationPolicy,
    ) -> Self {
        Self {
            ledger: OwnershipLedger::new(Arc::clone(&store), Arc::clone(&directory)),
            proposals: ProposalEngine::new(Arc::clone(&store), policy),
            transcripts: TranscriptService::new(store, Arc::clone(&directory)),
            directory,
        }
    }

    /// Engine over a fresh in-memory store with the default policy.
    pub fn in_memory(directory: Arc<dyn IdentityDirectory>) -> Self {
        Self::new(
            Arc::new(InMemoryNegotiationStore::new()),
            directory,
            NegotiationPolicy::default(),
        )
    }

    pub fn ledger(&self) -> &OwnershipLedger {
        &self.ledger
    }

    pub fn proposals(&self) -> &ProposalEngine {
        &self.proposals
    }

    pub fn transcripts(&self) -> &TranscriptService {
        &self.transcripts
    }

    /// Resolve a user to the actor context every engine call expects.
    ///
    /// Users that are unknown or belong to no party cannot act.
    pub async fn actor(&self, user_id: &UserId) -> NegotiationResult<ActorContext> {
        self.directory.resolve_user(user_id).await?.ok_or_else(|| {
            NegotiationError::NotFound(format!("user {user_id} not found or not employed by any party"))
        })
    }
}
