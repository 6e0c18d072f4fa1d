//! Property tests for ratio validation, share status and the proposal lifecycle.

use accord_engine::{validate_ratio_set, AccordEngine, ReviewRequest};
use accord_storage::memory::InMemoryDirectory;
use accord_storage::QueryWindow;
use accord_types::{
    Decimal, IssueCode, OwnerSet, PartyId, PaymentType, ProposalId, ProposalStatus, RatioTerm,
    UserId,
};
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

const USERS: [(&str, &str); 3] = [("alice", "p1"), ("bob", "p2"), ("carl", "p3")];

fn party(index: usize) -> PartyId {
    PartyId::new(format!("p{index}"))
}

fn party_set(max: usize) -> impl Strategy<Value = BTreeSet<usize>> {
    prop::collection::btree_set(0..max, 0..max)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime")
}

fn directory() -> Arc<InMemoryDirectory> {
    let directory = Arc::new(InMemoryDirectory::new());
    for (user, party_id) in USERS {
        directory
            .register_party(PartyId::new(party_id), format!("Party {party_id}"))
            .unwrap();
        directory
            .register_user(UserId::new(user), PartyId::new(party_id), user)
            .unwrap();
    }
    directory
}

#[derive(Debug, Clone)]
enum NegotiationOp {
    Accept(usize),
    Reject(usize),
    Counter(usize),
}

fn op_strategy() -> impl Strategy<Value = Vec<NegotiationOp>> {
    proptest::collection::vec(
        prop_oneof![
            (0..USERS.len()).prop_map(NegotiationOp::Accept),
            (0..USERS.len()).prop_map(NegotiationOp::Reject),
            (0..USERS.len()).prop_map(NegotiationOp::Counter),
        ],
        0..16,
    )
}

#[derive(Debug, Clone)]
enum OwnershipOp {
    Add(usize),
    Remove(usize),
}

fn ownership_strategy() -> impl Strategy<Value = Vec<OwnershipOp>> {
    proptest::collection::vec(
        prop_oneof![
            (1..=USERS.len()).prop_map(OwnershipOp::Add),
            (1..=USERS.len()).prop_map(OwnershipOp::Remove),
        ],
        0..20,
    )
}

fn even_split() -> Vec<RatioTerm> {
    vec![
        RatioTerm::percentage(party(1), 34),
        RatioTerm::percentage(party(2), 33),
        RatioTerm::percentage(party(3), 33),
    ]
}

proptest! {
    #[test]
    fn property_ratio_parties_must_equal_owners(
        owners in party_set(6),
        named in party_set(6),
        amounts in prop::collection::vec(0u32..10_000, 6),
    ) {
        let owner_set: OwnerSet = owners.iter().map(|i| party(*i)).collect();
        let terms: Vec<RatioTerm> = named
            .iter()
            .map(|i| RatioTerm::fixed(party(*i), Decimal::from(amounts[*i])))
            .collect();

        let result = validate_ratio_set(&owner_set, &terms);
        let expected_ok = !named.is_empty() && named == owners;
        prop_assert_eq!(result.is_ok(), expected_ok);

        if let Ok(validated) = result {
            prop_assert_eq!(validated.payment_type(), PaymentType::Fixed);
            let parties: BTreeSet<PartyId> =
                validated.terms().iter().map(|t| t.party_id.clone()).collect();
            prop_assert_eq!(parties, owner_set);
        }
    }

    #[test]
    fn property_percentages_must_total_one_hundred(
        amounts in prop::collection::vec(0u32..=100, 1..6),
    ) {
        let owner_set: OwnerSet = (0..amounts.len()).map(party).collect();
        let terms: Vec<RatioTerm> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| RatioTerm::percentage(party(i), *amount))
            .collect();
        let total: u32 = amounts.iter().sum();

        match validate_ratio_set(&owner_set, &terms) {
            Ok(validated) => {
                prop_assert_eq!(total, 100);
                let sum: Decimal = validated.terms().iter().map(|t| t.amount).sum();
                prop_assert_eq!(sum, Decimal::ONE_HUNDRED);
            }
            Err(issues) => {
                prop_assert_ne!(total, 100);
                prop_assert!(issues
                    .iter()
                    .all(|issue| issue.code == IssueCode::PercentageSumMismatch));
            }
        }
    }

    #[test]
    fn property_share_status_follows_owner_count(ops in ownership_strategy()) {
        let rt = runtime();
        rt.block_on(async move {
            let engine = AccordEngine::in_memory(directory());
            let ledger = engine.ledger();
            let item = ledger.create_item("Tractor").await.unwrap();
            let mut owners = BTreeSet::new();

            for op in ops {
                match op {
                    OwnershipOp::Add(i) => {
                        let added = ledger.add_ownership(&item.id, &party(i)).await.is_ok();
                        assert_eq!(added, owners.insert(i));
                    }
                    OwnershipOp::Remove(i) => {
                        let removed = ledger.remove_ownership(&item.id, &party(i)).await.is_ok();
                        assert_eq!(removed, owners.remove(&i));
                    }
                }
                let current = ledger.get_item(&item.id).await.unwrap();
                assert_eq!(current.is_shared(), owners.len() >= 2);
                assert_eq!(ledger.owners_of(&item.id).await.unwrap().len(), owners.len());
            }
        });
    }

    #[test]
    fn property_negotiation_stays_a_single_chain(ops in op_strategy()) {
        let rt = runtime();
        rt.block_on(async move {
            let engine = AccordEngine::in_memory(directory());
            let item = engine.ledger().create_item("Harvester").await.unwrap();
            for i in 1..=USERS.len() {
                engine.ledger().add_ownership(&item.id, &party(i)).await.unwrap();
            }
            let alice = engine.actor(&UserId::new("alice")).await.unwrap();
            let first = engine
                .proposals()
                .submit_initial(&item.id, &alice, None, even_split())
                .await
                .unwrap();

            let mut tip = first.id;
            let mut concluded = false;

            for op in ops {
                let user = match op {
                    NegotiationOp::Accept(u) | NegotiationOp::Reject(u) | NegotiationOp::Counter(u) => u,
                };
                let actor = engine.actor(&UserId::new(USERS[user].0)).await.unwrap();
                let result = match op {
                    NegotiationOp::Accept(_) => {
                        engine.proposals().review(&tip, &actor, ReviewRequest::accept()).await
                    }
                    NegotiationOp::Reject(_) => {
                        let request = ReviewRequest::reject("not quite", even_split());
                        engine.proposals().review(&tip, &actor, request).await
                    }
                    NegotiationOp::Counter(_) => {
                        match engine
                            .proposals()
                            .submit_counter(&tip, &actor, Some("another idea".into()), even_split())
                            .await
                        {
                            Ok(counter) => {
                                assert!(!concluded, "a concluded negotiation was countered");
                                tip = counter.id;
                            }
                            Err(err) => assert!(err.is_expected()),
                        }
                        continue;
                    }
                };

                match result {
                    Ok(outcome) => {
                        assert!(!concluded, "a concluded negotiation accepted a review");
                        if let Some(counter) = outcome.counter {
                            assert_eq!(outcome.reviewed.status, ProposalStatus::Rejected);
                            assert_eq!(counter.counter_to.as_ref(), Some(&tip));
                            tip = counter.id;
                        } else if outcome.reviewed.status == ProposalStatus::Accepted {
                            assert!(outcome.reviewed.all_accepted());
                            concluded = true;
                        }
                    }
                    Err(err) => {
                        assert!(err.is_expected());
                        if concluded {
                            assert!(err.has_issue(IssueCode::NotPending));
                        }
                    }
                }
            }

            let proposals = engine
                .proposals()
                .list_proposals(QueryWindow::default())
                .await
                .unwrap();
            let pending = proposals.iter().filter(|p| p.is_pending()).count();
            assert!(pending <= 1);
            assert_eq!(pending == 0, concluded);

            let mut children: BTreeMap<ProposalId, usize> = BTreeMap::new();
            for proposal in &proposals {
                if let Some(parent) = &proposal.counter_to {
                    *children.entry(parent.clone()).or_default() += 1;
                }
            }
            for proposal in &proposals {
                let countered = children.get(&proposal.id).copied().unwrap_or(0);
                assert!(countered <= 1);
                match proposal.status {
                    ProposalStatus::Rejected => assert_eq!(countered, 1),
                    ProposalStatus::Accepted => {
                        assert_eq!(countered, 0);
                        assert!(proposal.all_accepted());
                    }
                    ProposalStatus::Pending => assert_eq!(proposal.id, tip),
                }
            }
        });
    }
}
