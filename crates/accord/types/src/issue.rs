//! Structured validation failures
//!
//! Every user-facing rejection is reported as a list of issues so a caller
//! can render all problems of one request at once.

use serde::{Deserialize, Serialize};

/// Kind of validation failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueCode {
    // --- Ratio set ---
    /// An owner of the item has no payment ratio
    IncompletePartySet,
    /// A party appears more than once in the ratio set
    DuplicateParty,
    /// A ratio names a party that does not own the item
    ExtraParty,
    /// Ratios mix Percentage and Fixed payment types
    MixedPaymentType,
    /// Percentage ratios do not add up to exactly 100
    PercentageSumMismatch,
    /// A ratio carries a negative amount
    NegativeAmount,
    /// No ratios were supplied
    EmptyRatioSet,

    // --- Comment policy ---
    CommentRequired,
    CommentTooLong,
    CommentNotAllowed,
    /// Ratios supplied where none are accepted (e.g. when accepting)
    RatiosNotAllowed,

    // --- Negotiation state ---
    ItemNotShared,
    /// The item already has a pending proposal
    OpenNegotiationExists,
    /// The actor's party does not own the item
    NotOwner,
    /// The actor tried to review or counter their own proposal
    SelfAction,
    /// The actor's party has no ratio on the proposal
    NotIncluded,
    /// The proposal is no longer pending
    NotPending,
    /// The negotiation ended with an accepted proposal
    NegotiationConcluded,
    /// The proposal already has a counter-proposal
    AlreadyCountered,
    /// Ownership changed since the proposal was made, so it cannot be accepted
    StaleOwnership,

    // --- Ownership ---
    AlreadyOwned,

    /// Malformed request that fits no other code
    InvalidInput,
}

/// A single validation failure: which field, what kind, and a readable message
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub code: IssueCode,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Whether any issue in the list carries the given code
pub fn has_issue(issues: &[ValidationIssue], code: IssueCode) -> bool {
    issues.iter().any(|issue| issue.code == code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_display_includes_field() {
        let issue = ValidationIssue::new("comment", IssueCode::CommentRequired, "Comment is required");
        assert_eq!(issue.to_string(), "comment: Comment is required");
    }

    #[test]
    fn has_issue_matches_code() {
        let issues = vec![
            ValidationIssue::new("ratios", IssueCode::DuplicateParty, "dup"),
            ValidationIssue::new("ratios", IssueCode::NegativeAmount, "neg"),
        ];
        assert!(has_issue(&issues, IssueCode::NegativeAmount));
        assert!(!has_issue(&issues, IssueCode::ExtraParty));
    }
}
