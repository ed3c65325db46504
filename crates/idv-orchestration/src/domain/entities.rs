//! Domain entities for request orchestration.

use serde::{Deserialize, Serialize};
use shared_types::entities::BlockHeight;

/// What the bus-delivery path did with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Another path holds the request; nothing was done
    Duplicate,
    /// Buffered for the block-replay path
    Buffered,
    /// Ledger was already past the origin height
    ProcessedImmediately,
    /// Buffered, but the ledger advanced while buffering, so processed here
    ProcessedAfterRecheck,
}

/// What the block-replay path did for one height window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Lowest origin height replayed (inclusive)
    pub from_height: BlockHeight,
    /// Highest origin height replayed (inclusive)
    pub to_height: BlockHeight,
    /// Requests processed from the buffer
    pub replayed: usize,
    /// Requests skipped because another path held them
    pub skipped_locked: usize,
    /// Index entries with no buffered request behind them
    pub missing: usize,
    /// Requests whose processing failed
    pub failed: usize,
}

/// Origin heights that become ready when blocks `from..=to` are committed.
///
/// A request sent at height `h` is ready once the local height exceeds `h`,
/// so committing `from..=to` readies `from - 1 ..= to - 1`. Returns `None`
/// for an empty range.
pub fn readiness_window(from: BlockHeight, to: BlockHeight) -> Option<(BlockHeight, BlockHeight)> {
    if to == 0 || from > to {
        return None;
    }
    Some((from.saturating_sub(1), to - 1))
}

/// Temporary identity data kept while an accessor is being added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    /// Hashed identity namespace/identifier
    pub hash_id: String,
    /// Identity assurance level; absent when an existing owner adds an accessor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ial: Option<f64>,
    /// Accessor key type
    pub accessor_type: String,
    /// Accessor public key
    pub accessor_public_key: String,
    /// Accessor being added
    pub accessor_id: String,
    /// Namespace-scoped identifier
    #[serde(default)]
    pub sid: String,
    /// Whether this IDP is already associated with the identity
    #[serde(default)]
    pub associated: bool,
    /// Secret handed back to the client
    pub secret: String,
}
