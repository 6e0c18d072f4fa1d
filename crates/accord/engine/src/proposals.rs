//! Proposal State Machine
//!
//! Proposals move `Pending -> Accepted` or `Pending -> Rejected` and never
//! leave a terminal state. Every submission path (initial, counter and
//! rejecting review) runs the same ratio-set validation against the item's
//! current owners, inside one transaction that holds the item's lock.

use crate::error::log_failure;
use crate::ledger::lock_existing_item;
use crate::validator::{
    check_comment, normalize_comment, validate_ratio_set, CommentRule, ValidatedRatios,
};
use crate::{NegotiationError, NegotiationPolicy, NegotiationResult};
use accord_storage::{
    ItemStore, NegotiationStore, NegotiationTx, OwnershipStore, ProposalStore, QueryWindow,
};
use accord_types::{
    ActorContext, IssueCode, Item, ItemId, OwnerSet, Proposal, ProposalId, ProposalStatus,
    RatioResponse, RatioTerm, ReviewResponse, ValidationIssue,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// A reviewer's answer to a pending proposal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub response: ReviewResponse,
    #[serde(default)]
    pub comment: Option<String>,
    /// Counter-terms; required when rejecting, refused when accepting
    #[serde(default)]
    pub ratios: Option<Vec<RatioTerm>>,
}

impl ReviewRequest {
    pub fn accept() -> Self {
        Self {
            response: ReviewResponse::Accepted,
            comment: None,
            ratios: None,
        }
    }

    pub fn reject(comment: impl Into<String>, ratios: Vec<RatioTerm>) -> Self {
        Self {
            response: ReviewResponse::Rejected,
            comment: Some(comment.into()),
            ratios: Some(ratios),
        }
    }
}

/// Result of a review: the reviewed proposal as stored afterwards and, for a
/// rejection, the counter-proposal it spawned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub reviewed: Proposal,
    pub counter: Option<Proposal>,
}

/// Submits and reviews proposals.
#[derive(Clone)]
pub struct ProposalEngine {
    store: Arc<dyn NegotiationStore>,
    policy: NegotiationPolicy,
}

impl ProposalEngine {
    pub fn new(store: Arc<dyn NegotiationStore>, policy: NegotiationPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &NegotiationPolicy {
        &self.policy
    }

    /// Open a negotiation on a shared item.
    ///
    /// The author's own ratio is accepted on their behalf.
    pub async fn submit_initial(
        &self,
        item_id: &ItemId,
        actor: &ActorContext,
        comment: Option<String>,
        ratios: Vec<RatioTerm>,
    ) -> NegotiationResult<Proposal> {
        self.submit_initial_tx(item_id, actor, comment, ratios)
            .await
            .inspect_err(|e| log_failure("submit_initial", e))
    }

    async fn submit_initial_tx(
        &self,
        item_id: &ItemId,
        actor: &ActorContext,
        comment: Option<String>,
        ratios: Vec<RatioTerm>,
    ) -> NegotiationResult<Proposal> {
        let comment = normalize_comment(comment);
        let mut issues = check_comment(comment.as_deref(), CommentRule::Optional, &self.policy);

        let mut tx = self.store.begin().await?;
        let item = lock_existing_item(tx.as_mut(), item_id).await?;
        let owners = tx.list_owners(item_id).await?;
        let history = tx.list_proposals_for_item(item_id).await?;

        if !item.is_shared() {
            issues.push(ValidationIssue::new(
                "item_id",
                IssueCode::ItemNotShared,
                format!("Proposal for item {item_id} can't be made, because the item is not shared"),
            ));
        }
        if !owners.contains(&actor.party_id) {
            issues.push(not_owner(actor, item_id));
        }
        if let Some(open) = history.iter().find(|p| p.is_pending()) {
            issues.push(ValidationIssue::new(
                "item_id",
                IssueCode::OpenNegotiationExists,
                format!(
                    "Proposal {} is already open for item {item_id}; submit a counter-proposal instead",
                    open.id
                ),
            ));
        }
        if let Some(agreed) = history
            .iter()
            .find(|p| p.status == ProposalStatus::Accepted && covers_exactly(p, &owners))
        {
            issues.push(ValidationIssue::new(
                "item_id",
                IssueCode::NegotiationConcluded,
                format!("Item {item_id} already has an accepted proposal {}", agreed.id),
            ));
        }

        let validated = merge_issues(issues, validate_ratio_set(&owners, &ratios))?;
        let proposal = Proposal::draft(
            item_id.clone(),
            actor,
            comment,
            None,
            validated.into_terms(),
        );
        tx.insert_proposal(&proposal).await?;
        tx.commit().await?;

        info!(
            proposal_id = %proposal.id,
            item_id = %item_id,
            author = %actor.user_id,
            party = %actor.party_id,
            "Proposal submitted"
        );
        Ok(proposal)
    }

    /// Counter an existing proposal directly.
    ///
    /// Only the latest proposal of a chain can be countered. A pending
    /// parent is rejected on behalf of the author's party.
    pub async fn submit_counter(
        &self,
        parent_id: &ProposalId,
        actor: &ActorContext,
        comment: Option<String>,
        ratios: Vec<RatioTerm>,
    ) -> NegotiationResult<Proposal> {
        self.submit_counter_tx(parent_id, actor, comment, ratios)
            .await
            .inspect_err(|e| log_failure("submit_counter", e))
    }

    async fn submit_counter_tx(
        &self,
        parent_id: &ProposalId,
        actor: &ActorContext,
        comment: Option<String>,
        ratios: Vec<RatioTerm>,
    ) -> NegotiationResult<Proposal> {
        let comment = normalize_comment(comment);
        let mut issues = check_comment(comment.as_deref(), CommentRule::Required, &self.policy);

        let mut tx = self.store.begin().await?;
        let (parent, item) = load_locked(tx.as_mut(), parent_id).await?;
        let owners = tx.list_owners(&item.id).await?;
        let history = tx.list_proposals_for_item(&item.id).await?;

        issues.extend(counter_target_issues(&item, &parent, actor, &owners, &history));
        let validated = merge_issues(issues, validate_ratio_set(&owners, &ratios))?;
        let counter = create_counter(tx.as_mut(), actor, &parent, comment, validated).await?;
        tx.commit().await?;

        info!(
            proposal_id = %counter.id,
            counter_to = %parent.id,
            item_id = %counter.item_id,
            author = %actor.user_id,
            "Counter-proposal submitted"
        );
        Ok(counter)
    }

    /// Accept or reject a pending proposal on behalf of the reviewer's party.
    ///
    /// Accepting marks the party's ratio and concludes the proposal once all
    /// ratios are accepted. Rejecting concludes it as rejected and creates a
    /// counter-proposal with the reviewer's terms, atomically.
    pub async fn review(
        &self,
        proposal_id: &ProposalId,
        actor: &ActorContext,
        request: ReviewRequest,
    ) -> NegotiationResult<ReviewOutcome> {
        self.review_tx(proposal_id, actor, request)
            .await
            .inspect_err(|e| log_failure("review", e))
    }

    async fn review_tx(
        &self,
        proposal_id: &ProposalId,
        actor: &ActorContext,
        request: ReviewRequest,
    ) -> NegotiationResult<ReviewOutcome> {
        let comment = normalize_comment(request.comment);

        let mut tx = self.store.begin().await?;
        let (proposal, item) = load_locked(tx.as_mut(), proposal_id).await?;
        check_reviewable(&proposal, actor, request.response)?;

        let owners = tx.list_owners(&item.id).await?;

        let outcome = match request.response {
            ReviewResponse::Accepted => {
                let mut issues =
                    check_comment(comment.as_deref(), CommentRule::Forbidden, &self.policy);
                // An acceptance could complete a set that no longer matches the owners.
                if !covers_exactly(&proposal, &owners) {
                    issues.push(ValidationIssue::new(
                        "proposal_id",
                        IssueCode::StaleOwnership,
                        format!(
                            "Ownership of item {} changed since proposal {proposal_id} was made; reject it with terms for the current owners",
                            item.id
                        ),
                    ));
                }
                if request.ratios.as_ref().is_some_and(|r| !r.is_empty()) {
                    issues.push(ValidationIssue::new(
                        "ratios",
                        IssueCode::RatiosNotAllowed,
                        "Payment ratios are not allowed when accepting a proposal",
                    ));
                }
                if !issues.is_empty() {
                    return Err(NegotiationError::BadRequest(issues));
                }

                tx.set_ratio_response(
                    proposal_id,
                    &actor.party_id,
                    RatioResponse::Accepted,
                    &actor.user_id,
                )
                .await?;
                debug!(
                    proposal_id = %proposal_id,
                    party = %actor.party_id,
                    reviewer = %actor.user_id,
                    "Ratio accepted"
                );

                let updated = reload(tx.as_mut(), proposal_id).await?;
                let reviewed = if updated.all_accepted() {
                    tx.transition_status(
                        proposal_id,
                        ProposalStatus::Pending,
                        ProposalStatus::Accepted,
                    )
                    .await?;
                    info!(proposal_id = %proposal_id, item_id = %item.id, "Proposal accepted");
                    reload(tx.as_mut(), proposal_id).await?
                } else {
                    updated
                };
                ReviewOutcome {
                    reviewed,
                    counter: None,
                }
            }
            ReviewResponse::Rejected => {
                let issues = check_comment(comment.as_deref(), CommentRule::Required, &self.policy);
                let ratios = request.ratios.unwrap_or_default();
                let validated = merge_issues(issues, validate_ratio_set(&owners, &ratios))?;

                let counter =
                    create_counter(tx.as_mut(), actor, &proposal, comment, validated).await?;
                info!(
                    proposal_id = %proposal_id,
                    counter_id = %counter.id,
                    item_id = %item.id,
                    "Proposal rejected with counter-proposal"
                );
                ReviewOutcome {
                    reviewed: reload(tx.as_mut(), proposal_id).await?,
                    counter: Some(counter),
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    /// One proposal with its ratios.
    pub async fn get_proposal(&self, proposal_id: &ProposalId) -> NegotiationResult<Proposal> {
        let mut tx = self.store.begin().await?;
        let proposal = reload(tx.as_mut(), proposal_id).await?;
        tx.commit().await?;
        Ok(proposal)
    }

    /// Proposals of every item, newest-first.
    pub async fn list_proposals(&self, window: QueryWindow) -> NegotiationResult<Vec<Proposal>> {
        let mut tx = self.store.begin().await?;
        let proposals = tx.list_proposals(window).await?;
        tx.commit().await?;
        Ok(proposals)
    }
}

/// Read a proposal, lock its item, then read it again under the lock.
async fn load_locked(
    tx: &mut dyn NegotiationTx,
    proposal_id: &ProposalId,
) -> NegotiationResult<(Proposal, Item)> {
    let item_id = reload(tx, proposal_id).await?.item_id;
    let item = lock_existing_item(tx, &item_id).await?;
    let proposal = reload(tx, proposal_id).await?;
    Ok((proposal, item))
}

async fn reload(tx: &mut dyn NegotiationTx, proposal_id: &ProposalId) -> NegotiationResult<Proposal> {
    tx.get_proposal(proposal_id)
        .await?
        .ok_or_else(|| NegotiationError::NotFound(format!("proposal {proposal_id} not found")))
}

/// Reject a pending parent if needed, then store the counter-proposal.
async fn create_counter(
    tx: &mut dyn NegotiationTx,
    actor: &ActorContext,
    parent: &Proposal,
    comment: Option<String>,
    validated: ValidatedRatios,
) -> NegotiationResult<Proposal> {
    if parent.is_pending() {
        if parent.references_party(&actor.party_id) {
            tx.set_ratio_response(
                &parent.id,
                &actor.party_id,
                RatioResponse::Rejected,
                &actor.user_id,
            )
            .await?;
            debug!(
                proposal_id = %parent.id,
                party = %actor.party_id,
                reviewer = %actor.user_id,
                "Ratio rejected"
            );
        }
        tx.transition_status(&parent.id, ProposalStatus::Pending, ProposalStatus::Rejected)
            .await?;
        info!(proposal_id = %parent.id, item_id = %parent.item_id, "Proposal rejected");
    }

    let counter = Proposal::draft(
        parent.item_id.clone(),
        actor,
        comment,
        Some(parent.id.clone()),
        validated.into_terms(),
    );
    tx.insert_proposal(&counter).await?;
    Ok(counter)
}

/// State checks for a review. These stop at the first failure.
fn check_reviewable(
    proposal: &Proposal,
    actor: &ActorContext,
    response: ReviewResponse,
) -> NegotiationResult<()> {
    if !proposal.is_pending() {
        return Err(NegotiationError::bad_request(
            "proposal_id",
            IssueCode::NotPending,
            format!(
                "You cannot accept or reject proposal {}, since it is already {}",
                proposal.id, proposal.status
            ),
        ));
    }

    if proposal.author_id == actor.user_id {
        let verb = match response {
            ReviewResponse::Accepted => "accept",
            ReviewResponse::Rejected => "reject",
        };
        return Err(NegotiationError::bad_request(
            "proposal_id",
            IssueCode::SelfAction,
            format!("You cannot {verb} your own proposal"),
        ));
    }

    if proposal.ratio_for(&actor.party_id).is_none() {
        return Err(NegotiationError::bad_request(
            "party_id",
            IssueCode::NotIncluded,
            format!(
                "Party {} is not included in proposal {}",
                actor.party_id, proposal.id
            ),
        ));
    }
    Ok(())
}

fn counter_target_issues(
    item: &Item,
    parent: &Proposal,
    actor: &ActorContext,
    owners: &OwnerSet,
    history: &[Proposal],
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if !item.is_shared() {
        issues.push(ValidationIssue::new(
            "item_id",
            IssueCode::ItemNotShared,
            format!("Item {} is not shared", item.id),
        ));
    }
    if !owners.contains(&actor.party_id) {
        issues.push(not_owner(actor, &item.id));
    }
    if parent.author_id == actor.user_id {
        issues.push(ValidationIssue::new(
            "proposal_id",
            IssueCode::SelfAction,
            "You cannot counter your own proposal",
        ));
    }
    if parent.status == ProposalStatus::Accepted {
        issues.push(ValidationIssue::new(
            "proposal_id",
            IssueCode::NegotiationConcluded,
            format!("Proposal {} was accepted; the negotiation is concluded", parent.id),
        ));
    }
    if let Some(child) = history
        .iter()
        .find(|p| p.counter_to.as_ref() == Some(&parent.id))
    {
        issues.push(ValidationIssue::new(
            "proposal_id",
            IssueCode::AlreadyCountered,
            format!(
                "Proposal {} was already countered by proposal {}",
                parent.id, child.id
            ),
        ));
    }
    if let Some(open) = history
        .iter()
        .find(|p| p.is_pending() && p.id != parent.id)
    {
        issues.push(ValidationIssue::new(
            "proposal_id",
            IssueCode::OpenNegotiationExists,
            format!("Proposal {} is already open for item {}", open.id, item.id),
        ));
    }
    issues
}

fn not_owner(actor: &ActorContext, item_id: &ItemId) -> ValidationIssue {
    ValidationIssue::new(
        "party_id",
        IssueCode::NotOwner,
        format!(
            "Item {item_id} is not owned by party {} of user {}",
            actor.party_id, actor.username
        ),
    )
}

/// Whether a proposal's ratio parties are exactly the given owners.
fn covers_exactly(proposal: &Proposal, owners: &OwnerSet) -> bool {
    proposal.ratios.len() == owners.len() && proposal.parties().cloned().collect::<OwnerSet>() == *owners
}

fn merge_issues(
    mut issues: Vec<ValidationIssue>,
    ratios: Result<ValidatedRatios, Vec<ValidationIssue>>,
) -> NegotiationResult<ValidatedRatios> {
    match ratios {
        Ok(validated) if issues.is_empty() => Ok(validated),
        Ok(_) => Err(NegotiationError::BadRequest(issues)),
        Err(ratio_issues) => {
            issues.extend(ratio_issues);
            Err(NegotiationError::BadRequest(issues))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_storage::memory::InMemoryNegotiationStore;
    use accord_types::{OwnershipRecord, PartyId, ShareStatus, UserId};

    struct Fixture {
        engine: ProposalEngine,
        item_id: ItemId,
        alice: ActorContext,
        bob: ActorContext,
        carol: ActorContext,
    }

    async fn setup() -> Fixture {
        let store = Arc::new(InMemoryNegotiationStore::new());
        let item = Item::new("Truck");
        let mut tx = store.begin().await.unwrap();
        tx.insert_item(&item).await.unwrap();
        for party in ["p1", "p2"] {
            tx.insert_ownership(&OwnershipRecord::new(item.id.clone(), PartyId::new(party)))
                .await
                .unwrap();
        }
        tx.set_share_status(&item.id, ShareStatus::Shared)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        Fixture {
            engine: ProposalEngine::new(store, NegotiationPolicy::default()),
            item_id: item.id,
            alice: ActorContext::new(UserId::new("alice"), PartyId::new("p1"), "alice"),
            bob: ActorContext::new(UserId::new("bob"), PartyId::new("p2"), "bob"),
            carol: ActorContext::new(UserId::new("carol"), PartyId::new("p2"), "carol"),
        }
    }

    fn split(p1: i64, p2: i64) -> Vec<RatioTerm> {
        vec![
            RatioTerm::percentage(PartyId::new("p1"), p1),
            RatioTerm::percentage(PartyId::new("p2"), p2),
        ]
    }

    #[tokio::test]
    async fn second_initial_proposal_is_refused() {
        let f = setup().await;
        f.engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();
        let err = f
            .engine
            .submit_initial(&f.item_id, &f.bob, None, split(50, 50))
            .await
            .unwrap_err();
        assert!(err.has_issue(IssueCode::OpenNegotiationExists));
    }

    #[tokio::test]
    async fn accept_refuses_comment_and_ratios_together() {
        let f = setup().await;
        let proposal = f
            .engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();

        let request = ReviewRequest {
            response: ReviewResponse::Accepted,
            comment: Some("fine by me".into()),
            ratios: Some(split(50, 50)),
        };
        let err = f.engine.review(&proposal.id, &f.bob, request).await.unwrap_err();
        assert!(err.has_issue(IssueCode::CommentNotAllowed));
        assert!(err.has_issue(IssueCode::RatiosNotAllowed));

        let stored = f.engine.get_proposal(&proposal.id).await.unwrap();
        assert!(stored.is_pending());
    }

    #[tokio::test]
    async fn author_cannot_review_own_proposal() {
        let f = setup().await;
        let proposal = f
            .engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();
        let err = f
            .engine
            .review(&proposal.id, &f.alice, ReviewRequest::accept())
            .await
            .unwrap_err();
        assert!(err.has_issue(IssueCode::SelfAction));
    }

    #[tokio::test]
    async fn colleague_of_the_author_may_reject() {
        let f = setup().await;
        let proposal = f
            .engine
            .submit_initial(&f.item_id, &f.bob, None, split(60, 40))
            .await
            .unwrap();

        // p2 accepted through bob; carol answers for p2 again and overrides it.
        let outcome = f
            .engine
            .review(&proposal.id, &f.carol, ReviewRequest::reject("we pay too much", split(70, 30)))
            .await
            .unwrap();

        assert_eq!(outcome.reviewed.status, ProposalStatus::Rejected);
        let ratio = outcome.reviewed.ratio_for(&PartyId::new("p2")).unwrap();
        assert_eq!(ratio.response, RatioResponse::Rejected);
        assert_eq!(ratio.responded_by, Some(UserId::new("carol")));
        let counter = outcome.counter.unwrap();
        assert_eq!(counter.author_id, UserId::new("carol"));
        assert_eq!(counter.counter_to, Some(proposal.id));
    }

    #[tokio::test]
    async fn repeated_acceptance_keeps_the_proposal_open() {
        let f = setup().await;
        let proposal = f
            .engine
            .submit_initial(&f.item_id, &f.bob, None, split(60, 40))
            .await
            .unwrap();

        let outcome = f
            .engine
            .review(&proposal.id, &f.carol, ReviewRequest::accept())
            .await
            .unwrap();
        assert!(outcome.reviewed.is_pending());
        let ratio = outcome.reviewed.ratio_for(&PartyId::new("p2")).unwrap();
        assert_eq!(ratio.responded_by, Some(UserId::new("carol")));
    }

    #[tokio::test]
    async fn rejection_without_terms_changes_nothing() {
        let f = setup().await;
        let proposal = f
            .engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();
        let request = ReviewRequest {
            response: ReviewResponse::Rejected,
            comment: None,
            ratios: None,
        };
        let err = f.engine.review(&proposal.id, &f.bob, request).await.unwrap_err();
        assert!(err.has_issue(IssueCode::CommentRequired));
        assert!(err.has_issue(IssueCode::EmptyRatioSet));

        let stored = f.engine.get_proposal(&proposal.id).await.unwrap();
        assert!(stored.is_pending());
        let ratio = stored.ratio_for(&PartyId::new("p2")).unwrap();
        assert_eq!(ratio.response, RatioResponse::Pending);
    }

    #[tokio::test]
    async fn direct_counter_rejects_pending_parent() {
        let f = setup().await;
        let parent = f
            .engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();
        let counter = f
            .engine
            .submit_counter(&parent.id, &f.bob, Some("meet halfway".into()), split(50, 50))
            .await
            .unwrap();

        assert_eq!(counter.counter_to, Some(parent.id.clone()));
        assert!(counter.is_pending());
        let parent = f.engine.get_proposal(&parent.id).await.unwrap();
        assert_eq!(parent.status, ProposalStatus::Rejected);
        let ratio = parent.ratio_for(&PartyId::new("p2")).unwrap();
        assert_eq!(ratio.response, RatioResponse::Rejected);
        assert_eq!(ratio.responded_by, Some(UserId::new("bob")));
    }

    #[tokio::test]
    async fn only_the_chain_tip_can_be_countered() {
        let f = setup().await;
        let first = f
            .engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();
        let second = f
            .engine
            .review(&first.id, &f.bob, ReviewRequest::reject("too low", split(50, 50)))
            .await
            .unwrap()
            .counter
            .unwrap();

        let err = f
            .engine
            .submit_counter(&first.id, &f.alice, Some("again".into()), split(55, 45))
            .await
            .unwrap_err();
        assert!(err.has_issue(IssueCode::AlreadyCountered));

        f.engine
            .submit_counter(&second.id, &f.alice, Some("55/45?".into()), split(55, 45))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn counter_needs_a_comment_and_another_author() {
        let f = setup().await;
        let parent = f
            .engine
            .submit_initial(&f.item_id, &f.alice, None, split(60, 40))
            .await
            .unwrap();
        let err = f
            .engine
            .submit_counter(&parent.id, &f.alice, Some("   ".into()), split(50, 50))
            .await
            .unwrap_err();
        assert!(err.has_issue(IssueCode::CommentRequired));
        assert!(err.has_issue(IssueCode::SelfAction));
    }

    #[tokio::test]
    async fn missing_proposal_is_not_found() {
        let f = setup().await;
        let err = f
            .engine
            .review(&ProposalId::new("nope"), &f.bob, ReviewRequest::accept())
            .await
            .unwrap_err();
        assert!(matches!(err, NegotiationError::NotFound(_)));
    }
}
