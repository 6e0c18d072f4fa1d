//! Tunable negotiation rules.

use serde::{Deserialize, Serialize};

/// Rules applied to every proposal, counter-proposal and review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NegotiationPolicy {
    /// Maximum comment length, in characters.
    pub max_comment_len: usize,
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            max_comment_len: default_max_comment_len(),
        }
    }
}

fn default_max_comment_len() -> usize {
    100
}
