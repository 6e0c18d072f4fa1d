use accord_storage::StorageError;
use accord_types::{IssueCode, ValidationIssue};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Result type for negotiation operations.
pub type NegotiationResult<T> = Result<T, NegotiationError>;

/// Negotiation errors.
///
/// Everything except `General` is an expected, user-facing outcome.
#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {}", join_issues(.0))]
    BadRequest(Vec<ValidationIssue>),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("general error: {0}")]
    General(String),
}

impl NegotiationError {
    /// A bad request carrying a single issue.
    pub fn bad_request(field: impl Into<String>, code: IssueCode, message: impl Into<String>) -> Self {
        Self::BadRequest(vec![ValidationIssue::new(field, code, message)])
    }

    /// Issues of a `BadRequest`; empty for every other variant.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::BadRequest(issues) => issues,
            _ => &[],
        }
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        accord_types::has_issue(self.issues(), code)
    }

    pub fn is_expected(&self) -> bool {
        !matches!(self, Self::General(_))
    }
}

impl From<StorageError> for NegotiationError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::NotFound(msg) => Self::NotFound(msg),
            StorageError::Conflict(msg) => Self::Conflict(msg),
            StorageError::InvalidInput(msg) => Self::bad_request("request", IssueCode::InvalidInput, msg),
            mismatch @ StorageError::StatusMismatch { .. } => Self::General(mismatch.to_string()),
            StorageError::CorruptRow(msg) | StorageError::Backend(msg) => Self::General(msg),
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Log a failed operation at the level its class deserves.
pub(crate) fn log_failure(operation: &'static str, err: &NegotiationError) {
    match err {
        NegotiationError::General(msg) => error!(operation, error = %msg, "Negotiation operation failed"),
        NegotiationError::Conflict(msg) => warn!(operation, error = %msg, "Negotiation operation conflicted"),
        NegotiationError::BadRequest(issues) => {
            debug!(operation, issues = issues.len(), error = %err, "Negotiation request rejected")
        }
        NegotiationError::NotFound(msg) => debug!(operation, error = %msg, "Negotiation target not found"),
    }
}
