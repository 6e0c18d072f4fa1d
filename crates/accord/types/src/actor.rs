//! The resolved caller of an engine operation

use crate::{PartyId, UserId};
use serde::{Deserialize, Serialize};

/// Who is acting.
///
/// Resolved once at the boundary (authentication is not this crate's
/// concern) and passed explicitly into every state-machine call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: UserId,
    pub party_id: PartyId,
    pub username: String,
}

impl ActorContext {
    pub fn new(user_id: UserId, party_id: PartyId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            party_id,
            username: username.into(),
        }
    }

    /// Whether this actor belongs to the given party
    pub fn is_member_of(&self, party_id: &PartyId) -> bool {
        &self.party_id == party_id
    }
}
