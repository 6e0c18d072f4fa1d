//! Payment-Ratio Set Validator
//!
//! Pure checks of a candidate ratio set against the current owner set of an
//! item, plus the comment policy shared by every submission path. Nothing
//! here touches storage; callers pass the owner set in.
//!
//! All applicable issues are collected rather than stopping at the first.

use crate::NegotiationPolicy;
use accord_types::{
    Decimal, IssueCode, OwnerSet, PartyId, PaymentType, RatioTerm, ValidationIssue,
};
use std::collections::BTreeMap;

const RATIOS_FIELD: &str = "ratios";
const COMMENT_FIELD: &str = "comment";

/// A ratio set that passed validation, ordered by party id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRatios {
    payment_type: PaymentType,
    terms: Vec<RatioTerm>,
}

impl ValidatedRatios {
    pub fn payment_type(&self) -> PaymentType {
        self.payment_type
    }

    pub fn terms(&self) -> &[RatioTerm] {
        &self.terms
    }

    pub fn into_terms(self) -> Vec<RatioTerm> {
        self.terms
    }
}

/// Validate a ratio set against the owners of its item.
///
/// The set must name every owner exactly once and nobody else, use one
/// payment type, carry no negative amount, and add up to exactly 100 when
/// that type is `Percentage`.
pub fn validate_ratio_set(
    owners: &OwnerSet,
    terms: &[RatioTerm],
) -> Result<ValidatedRatios, Vec<ValidationIssue>> {
    if terms.is_empty() {
        return Err(vec![ValidationIssue::new(
            RATIOS_FIELD,
            IssueCode::EmptyRatioSet,
            "Payment ratios must be provided",
        )]);
    }

    let mut issues = Vec::new();

    let mut seen: BTreeMap<&PartyId, usize> = BTreeMap::new();
    for term in terms {
        *seen.entry(&term.party_id).or_default() += 1;
    }

    let duplicates = seen
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(party, _)| party.as_str())
        .collect::<Vec<_>>();
    if !duplicates.is_empty() {
        issues.push(ValidationIssue::new(
            RATIOS_FIELD,
            IssueCode::DuplicateParty,
            format!("Parties appear more than once: {}", duplicates.join(", ")),
        ));
    }

    let missing = owners
        .iter()
        .filter(|owner| !seen.contains_key(owner))
        .map(PartyId::as_str)
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        issues.push(ValidationIssue::new(
            RATIOS_FIELD,
            IssueCode::IncompletePartySet,
            format!("Payment ratios are missing for owning parties: {}", missing.join(", ")),
        ));
    }

    let extra = seen
        .keys()
        .filter(|party| !owners.contains(**party))
        .map(|party| party.as_str())
        .collect::<Vec<_>>();
    if !extra.is_empty() {
        issues.push(ValidationIssue::new(
            RATIOS_FIELD,
            IssueCode::ExtraParty,
            format!("Parties do not own the item: {}", extra.join(", ")),
        ));
    }

    let payment_type = terms[0].payment_type;
    let uniform = terms.iter().all(|term| term.payment_type == payment_type);
    if !uniform {
        issues.push(ValidationIssue::new(
            RATIOS_FIELD,
            IssueCode::MixedPaymentType,
            "All payment ratios must have the same payment type (all Fixed or all Percentage)",
        ));
    } else if payment_type == PaymentType::Percentage {
        match percentage_total(terms) {
            Some(total) if total == Decimal::ONE_HUNDRED => {}
            Some(total) => issues.push(ValidationIssue::new(
                RATIOS_FIELD,
                IssueCode::PercentageSumMismatch,
                format!("Percentages must add up to exactly 100, got {total}"),
            )),
            None => issues.push(ValidationIssue::new(
                RATIOS_FIELD,
                IssueCode::PercentageSumMismatch,
                "Percentages overflow when added up",
            )),
        }
    }

    for (index, term) in terms.iter().enumerate() {
        if term.amount < Decimal::ZERO {
            issues.push(ValidationIssue::new(
                format!("{RATIOS_FIELD}[{index}].amount"),
                IssueCode::NegativeAmount,
                format!("Payment amount for party {} cannot be negative", term.party_id),
            ));
        }
    }

    if !issues.is_empty() {
        return Err(issues);
    }

    let mut terms = terms.to_vec();
    terms.sort_by(|a, b| a.party_id.cmp(&b.party_id));
    Ok(ValidatedRatios {
        payment_type,
        terms,
    })
}

fn percentage_total(terms: &[RatioTerm]) -> Option<Decimal> {
    terms
        .iter()
        .try_fold(Decimal::ZERO, |acc, term| acc.checked_add(term.amount))
}

/// Whether a submission path needs, allows or forbids a comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentRule {
    Optional,
    Required,
    Forbidden,
}

/// Trim a comment; blank comments count as absent.
pub fn normalize_comment(comment: Option<String>) -> Option<String> {
    comment
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

/// Check a normalized comment against a rule and the policy's length cap.
pub fn check_comment(
    comment: Option<&str>,
    rule: CommentRule,
    policy: &NegotiationPolicy,
) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    match (rule, comment) {
        (CommentRule::Required, None) => issues.push(ValidationIssue::new(
            COMMENT_FIELD,
            IssueCode::CommentRequired,
            "Comment is required",
        )),
        (CommentRule::Forbidden, Some(_)) => issues.push(ValidationIssue::new(
            COMMENT_FIELD,
            IssueCode::CommentNotAllowed,
            "Comment is not allowed when accepting a proposal",
        )),
        _ => {}
    }

    if let Some(text) = comment {
        if text.chars().count() > policy.max_comment_len {
            issues.push(ValidationIssue::new(
                COMMENT_FIELD,
                IssueCode::CommentTooLong,
                format!("Comment maximum length is {}", policy.max_comment_len),
            ));
        }
    }
    issues
}
