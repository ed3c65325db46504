//! # Shared Bus - In-Process Event Bus
//!
//! Carries everything the node hears from the outside world to the
//! orchestration core, and everything the core says back.
//!
//! ```text
//! ┌──────────────┐   MessageReceived    ┌──────────────┐
//! │ Message bus  │ ───────┐             │              │
//! └──────────────┘        │             │ Orchestration│
//!                         ▼             │     core     │
//! ┌──────────────┐  ┌──────────────┐    │              │
//! │    Ledger    │─▶│  Event Bus   │───▶│              │
//! │  connector   │◀─│              │◀───│              │
//! └──────────────┘  └──────────────┘    └──────────────┘
//!   NewBlocks, TransactionResult   TransactionSubmitted,
//!   LedgerQueryResponse            LedgerQuery
//! ```
//!
//! Events are broadcast; each consumer subscribes with an [`EventFilter`].
//! Failures nobody can handle are published on the dead letter topic.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{EventFilter, EventTopic, LedgerQueryError, NodeEvent};
pub use publisher::{BusStats, EventPublisher, InMemoryEventBus};
pub use subscriber::Subscription;

/// Maximum events to buffer per subscriber before it starts lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
