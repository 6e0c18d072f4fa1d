use accord_types::{ProposalId, ProposalStatus};
use thiserror::Error;

/// Result type for negotiation storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Failures raised by negotiation stores.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A referenced item, party, ownership or proposal does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A write collided with existing rows: duplicate id or ownership,
    /// or a second pending proposal for the same item.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A status transition found the proposal in another state.
    #[error("proposal {proposal_id} is {found}, expected {expected}")]
    StatusMismatch {
        proposal_id: ProposalId,
        expected: ProposalStatus,
        found: ProposalStatus,
    },

    /// A value the store cannot represent, such as an oversized window.
    #[error("unrepresentable value: {0}")]
    InvalidInput(String),

    /// A stored column held a value no domain type decodes from.
    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("backend error: {0}")]
    Backend(String),
}
