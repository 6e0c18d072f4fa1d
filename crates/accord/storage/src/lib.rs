//! Accord storage abstractions.
//!
//! The negotiation engine treats storage as a transactional repository:
//! every public operation opens one [`NegotiationTx`], works through the
//! item/ownership/proposal stores it exposes, and commits once. Dropping a
//! transaction handle without committing discards all of its writes.
//!
//! Adapters:
//! - [`memory::InMemoryNegotiationStore`]: deterministic, single-writer, test-friendly.
//! - `postgres::PostgresNegotiationStore` (feature `postgres`): row-locking source of truth.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use traits::{
    apply_window, IdentityDirectory, ItemStore, NegotiationStore, NegotiationTx, OwnershipStore,
    ProposalStore, QueryWindow,
};
