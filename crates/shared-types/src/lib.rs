//! # Shared Types Crate
//!
//! Identifiers, node roles and the payload types that cross crate
//! boundaries: messages delivered by the message bus, transactions parsed
//! out of ledger blocks, and transactions submitted back to the ledger.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every cross-crate wire shape is defined here.
//! - **Opaque identifiers**: node, request and transaction ids are newtypes
//!   so they cannot be swapped by accident.
//! - **Confidential payloads**: bus payloads are kept as raw JSON and are
//!   never interpreted beyond the routing fields.

pub mod entities;
pub mod errors;
pub mod ipc;

pub use entities::*;
pub use errors::*;
pub use ipc::*;
