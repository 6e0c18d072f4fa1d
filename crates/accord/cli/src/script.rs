//! Negotiation scripts
//!
//! A script seeds the identity directory and then runs a list of steps
//! against the engine. Items and proposals get their ids at runtime, so
//! steps refer to them through aliases bound by earlier steps. Every step
//! yields one JSON report; expected failures are reported and the replay
//! carries on.

use accord_engine::{AccordEngine, NegotiationError, ReviewRequest};
use accord_storage::memory::InMemoryDirectory;
use accord_types::{ItemId, PartyId, ProposalId, RatioTerm, ReviewResponse, UserId};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// A party of the directory.
#[derive(Debug, Clone, Deserialize)]
pub struct PartySeed {
    pub id: PartyId,
    pub name: String,
}

/// A user employed by a party.
#[derive(Debug, Clone, Deserialize)]
pub struct UserSeed {
    pub id: UserId,
    pub party: PartyId,
    pub username: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    CreateItem {
        alias: String,
        name: String,
    },
    AddOwner {
        item: String,
        party: PartyId,
    },
    RemoveOwner {
        item: String,
        party: PartyId,
    },
    Propose {
        alias: String,
        item: String,
        user: UserId,
        #[serde(default)]
        comment: Option<String>,
        ratios: Vec<RatioTerm>,
    },
    Counter {
        alias: String,
        parent: String,
        user: UserId,
        #[serde(default)]
        comment: Option<String>,
        ratios: Vec<RatioTerm>,
    },
    Review {
        proposal: String,
        user: UserId,
        response: ReviewResponse,
        #[serde(default)]
        comment: Option<String>,
        #[serde(default)]
        ratios: Option<Vec<RatioTerm>>,
        /// Alias bound to the counter-proposal a rejection creates
        #[serde(default)]
        counter_alias: Option<String>,
    },
    Transcript {
        item: String,
        user: UserId,
    },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::CreateItem { .. } => "create_item",
            Step::AddOwner { .. } => "add_owner",
            Step::RemoveOwner { .. } => "remove_owner",
            Step::Propose { .. } => "propose",
            Step::Counter { .. } => "counter",
            Step::Review { .. } => "review",
            Step::Transcript { .. } => "transcript",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub parties: Vec<PartySeed>,
    #[serde(default)]
    pub users: Vec<UserSeed>,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read script {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("invalid script {}", path.display()))
    }

    /// Register every party and user of the script.
    pub fn seed(&self, directory: &InMemoryDirectory) -> anyhow::Result<()> {
        for party in &self.parties {
            directory.register_party(party.id.clone(), party.name.clone())?;
        }
        for user in &self.users {
            directory.register_user(user.id.clone(), user.party.clone(), user.username.clone())?;
        }
        Ok(())
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: usize,
    pub op: &'static str,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Runs steps and keeps the alias bindings between them.
pub struct Replayer {
    engine: AccordEngine,
    items: HashMap<String, ItemId>,
    proposals: HashMap<String, ProposalId>,
}

impl Replayer {
    pub fn new(engine: AccordEngine) -> Self {
        Self {
            engine,
            items: HashMap::new(),
            proposals: HashMap::new(),
        }
    }

    /// Run every step. Only failures outside the negotiation taxonomy abort.
    pub async fn run(&mut self, steps: Vec<Step>) -> anyhow::Result<Vec<StepReport>> {
        let mut reports = Vec::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            let op = step.name();
            let report = match self.apply(step).await {
                Ok(result) => StepReport {
                    step: index,
                    op,
                    ok: true,
                    result: Some(result),
                    error: None,
                },
                Err(StepError::Negotiation(err)) if err.is_expected() => {
                    debug!(step = index, op, error = %err, "Step refused");
                    StepReport {
                        step: index,
                        op,
                        ok: false,
                        result: None,
                        error: Some(error_json(&err)),
                    }
                }
                Err(StepError::Negotiation(err)) => {
                    return Err(anyhow!(err)).with_context(|| format!("step {index} ({op}) failed"));
                }
                Err(StepError::Script(err)) => {
                    return Err(err.context(format!("step {index} ({op}) is invalid")));
                }
            };
            reports.push(report);
        }
        info!(steps = reports.len(), "Replay finished");
        Ok(reports)
    }

    async fn apply(&mut self, step: Step) -> Result<Value, StepError> {
        let engine = self.engine.clone();
        match step {
            Step::CreateItem { alias, name } => {
                let item = engine.ledger().create_item(name).await?;
                self.items.insert(alias, item.id.clone());
                Ok(to_json(&item)?)
            }
            Step::AddOwner { item, party } => {
                let item_id = self.item(&item)?;
                let record = engine.ledger().add_ownership(&item_id, &party).await?;
                Ok(to_json(&record)?)
            }
            Step::RemoveOwner { item, party } => {
                let item_id = self.item(&item)?;
                let removal = engine.ledger().remove_ownership(&item_id, &party).await?;
                Ok(to_json(&removal)?)
            }
            Step::Propose {
                alias,
                item,
                user,
                comment,
                ratios,
            } => {
                let item_id = self.item(&item)?;
                let actor = engine.actor(&user).await?;
                let proposal = engine
                    .proposals()
                    .submit_initial(&item_id, &actor, comment, ratios)
                    .await?;
                self.proposals.insert(alias, proposal.id.clone());
                Ok(to_json(&proposal)?)
            }
            Step::Counter {
                alias,
                parent,
                user,
                comment,
                ratios,
            } => {
                let parent_id = self.proposal(&parent)?;
                let actor = engine.actor(&user).await?;
                let counter = engine
                    .proposals()
                    .submit_counter(&parent_id, &actor, comment, ratios)
                    .await?;
                self.proposals.insert(alias, counter.id.clone());
                Ok(to_json(&counter)?)
            }
            Step::Review {
                proposal,
                user,
                response,
                comment,
                ratios,
                counter_alias,
            } => {
                let proposal_id = self.proposal(&proposal)?;
                let actor = engine.actor(&user).await?;
                let request = ReviewRequest {
                    response,
                    comment,
                    ratios,
                };
                let outcome = engine
                    .proposals()
                    .review(&proposal_id, &actor, request)
                    .await?;
                if let (Some(alias), Some(counter)) = (counter_alias, &outcome.counter) {
                    self.proposals.insert(alias, counter.id.clone());
                }
                Ok(to_json(&outcome)?)
            }
            Step::Transcript { item, user } => {
                let item_id = self.item(&item)?;
                let viewer = engine.actor(&user).await?;
                let transcript = engine
                    .transcripts()
                    .get_transcript(&item_id, &viewer)
                    .await?;
                Ok(to_json(&transcript)?)
            }
        }
    }

    fn item(&self, alias: &str) -> Result<ItemId, StepError> {
        self.items
            .get(alias)
            .cloned()
            .ok_or_else(|| StepError::Script(anyhow!("unknown item alias '{alias}'")))
    }

    fn proposal(&self, alias: &str) -> Result<ProposalId, StepError> {
        self.proposals
            .get(alias)
            .cloned()
            .ok_or_else(|| StepError::Script(anyhow!("unknown proposal alias '{alias}'")))
    }
}

enum StepError {
    Negotiation(NegotiationError),
    Script(anyhow::Error),
}

impl From<NegotiationError> for StepError {
    fn from(value: NegotiationError) -> Self {
        Self::Negotiation(value)
    }
}

impl From<serde_json::Error> for StepError {
    fn from(value: serde_json::Error) -> Self {
        Self::Script(value.into())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value)
}

fn error_json(err: &NegotiationError) -> Value {
    let kind = match err {
        NegotiationError::NotFound(_) => "not_found",
        NegotiationError::BadRequest(_) => "bad_request",
        NegotiationError::Conflict(_) => "conflict",
        NegotiationError::General(_) => "general",
    };
    if err.issues().is_empty() {
        json!({ "kind": kind, "message": err.to_string() })
    } else {
        json!({ "kind": kind, "issues": err.issues() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const SCRIPT: &str = r#"{
        "parties": [
            { "id": "p1", "name": "Acme" },
            { "id": "p2", "name": "Globex" }
        ],
        "users": [
            { "id": "alice", "party": "p1", "username": "alice" },
            { "id": "bob", "party": "p2", "username": "bob" }
        ],
        "steps": [
            { "op": "create_item", "alias": "van", "name": "Delivery van" },
            { "op": "add_owner", "item": "van", "party": "p1" },
            { "op": "add_owner", "item": "van", "party": "p2" },
            { "op": "propose", "alias": "first", "item": "van", "user": "alice",
              "ratios": [
                { "party_id": "p1", "payment_type": "Percentage", "amount": "60" },
                { "party_id": "p2", "payment_type": "Percentage", "amount": "40" }
              ] },
            { "op": "review", "proposal": "first", "user": "bob", "response": "Rejected",
              "comment": "too low", "counter_alias": "second",
              "ratios": [
                { "party_id": "p1", "payment_type": "Percentage", "amount": "50" },
                { "party_id": "p2", "payment_type": "Percentage", "amount": "50" }
              ] },
            { "op": "review", "proposal": "first", "user": "bob", "response": "Accepted" },
            { "op": "review", "proposal": "second", "user": "alice", "response": "Accepted" },
            { "op": "transcript", "item": "van", "user": "bob" }
        ]
    }"#;

    #[tokio::test]
    async fn replays_a_negotiation() {
        let script: Script = serde_json::from_str(SCRIPT).unwrap();
        let directory = Arc::new(InMemoryDirectory::new());
        script.seed(&directory).unwrap();

        let mut replayer = Replayer::new(AccordEngine::in_memory(directory));
        let reports = replayer.run(script.steps).await.unwrap();

        assert_eq!(reports.len(), 8);
        let oks = reports.iter().map(|r| r.ok).collect::<Vec<_>>();
        assert_eq!(oks, vec![true, true, true, true, true, false, true, true]);
        assert_eq!(reports[5].error.as_ref().unwrap()["kind"], "bad_request");

        let transcript = reports[7].result.as_ref().unwrap();
        assert_eq!(transcript["entries"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_alias_aborts() {
        let directory = Arc::new(InMemoryDirectory::new());
        let mut replayer = Replayer::new(AccordEngine::in_memory(directory));
        let steps = vec![Step::AddOwner {
            item: "missing".into(),
            party: PartyId::new("p1"),
        }];
        assert!(replayer.run(steps).await.is_err());
    }
}
