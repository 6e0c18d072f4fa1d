//! Accord Domain Types
//!
//! This crate defines the domain types for payment-split negotiation over
//! jointly owned items.
//!
//! # Key Concepts
//!
//! - **Item**: the asset whose payment split is negotiated. Its share status
//!   is a cache derived from the number of owning parties.
//! - **Ownership**: an (item, party) membership fact.
//! - **Proposal**: one offer of a payment split among all owners, chained to
//!   its predecessor when it is a counter-proposal.
//! - **Payment Ratio**: one owning party's share inside a proposal, carrying
//!   that party's own accept/reject response.
//! - **Actor Context**: the resolved caller `(user, party, username)` passed
//!   explicitly into every engine call.
//!
//! # Architecture
//!
//! This is a pure types crate with no runtime dependencies. All types
//! implement `Clone`, `Debug`, `Serialize`, `Deserialize`. IDs use the
//! newtype pattern and implement `Display` and `new()`.

#![deny(unsafe_code)]

mod actor;
mod ids;
mod issue;
mod item;
mod ownership;
mod proposal;

pub use actor::*;
pub use ids::*;
pub use issue::*;
pub use item::*;
pub use ownership::*;
pub use proposal::*;

/// Re-exported so downstream crates agree on the amount type.
pub use rust_decimal::Decimal;
