//! # Node Events
//!
//! Every event that flows through the shared bus.
//! Payload types live in `shared-types/src/ipc.rs`.

use serde::{Deserialize, Serialize};
use shared_types::entities::{BlockHeight, NodeId, TxId};
use shared_types::ipc::{BusMessage, LedgerQuery, LedgerTransaction, ParsedBlock, TransactionOutcome};

/// All events that can be published to the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeEvent {
    // =========================================================================
    // MESSAGE BUS
    // =========================================================================
    /// A private message arrived for one of the node identities hosted here.
    /// Source: message bus | Target: orchestration core
    MessageReceived {
        /// Identity the message was addressed to.
        node_id: NodeId,
        /// The message itself.
        message: BusMessage,
    },

    /// The message bus transport failed.
    /// Source: message bus | Target: orchestration core (error callback)
    MessageQueueError {
        /// Identity affected, when known.
        node_id: Option<NodeId>,
        /// Error description.
        error: String,
    },

    // =========================================================================
    // LEDGER
    // =========================================================================
    /// One or more blocks were committed.
    /// Source: ledger connector | Target: orchestration core
    NewBlocks {
        /// First new height (inclusive).
        from_height: BlockHeight,
        /// Last new height (inclusive).
        to_height: BlockHeight,
        /// Parsed transactions of every block in the range.
        blocks: Vec<ParsedBlock>,
    },

    /// A transaction this node submitted has a final outcome.
    /// Source: ledger connector | Target: continuation registry
    TransactionResult {
        /// Id chosen at submission.
        tx_id: TxId,
        /// Committed or rejected.
        outcome: TransactionOutcome,
    },

    /// The core asks the ledger connector to submit a transaction.
    /// Source: orchestration core | Target: ledger connector
    TransactionSubmitted(LedgerTransaction),

    // =========================================================================
    // LEDGER QUERIES
    // =========================================================================
    /// Read-only query against ledger state.
    /// The connector answers with `LedgerQueryResponse`.
    LedgerQuery {
        /// Unique correlation ID to match request/response.
        correlation_id: String,
        /// The query.
        query: LedgerQuery,
    },

    /// Answer to a `LedgerQuery`.
    LedgerQueryResponse {
        /// Correlation ID matching the original query.
        correlation_id: String,
        /// Result (Ok data or Err with code/message).
        result: Result<serde_json::Value, LedgerQueryError>,
    },

    // =========================================================================
    // CRITICAL EVENTS (DLQ)
    // =========================================================================
    /// Error nobody downstream could handle.
    CriticalError {
        /// Component that gave up.
        component: String,
        /// Error description.
        error: String,
    },
}

/// Error type for ledger query responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerQueryError {
    /// Connector-specific error code.
    pub code: i32,
    /// Error message.
    pub message: String,
}

impl NodeEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::MessageReceived { .. } | Self::MessageQueueError { .. } => {
                EventTopic::MessageQueue
            }
            Self::NewBlocks { .. }
            | Self::TransactionResult { .. }
            | Self::LedgerQueryResponse { .. } => EventTopic::Ledger,
            Self::TransactionSubmitted(_) | Self::LedgerQuery { .. } => EventTopic::LedgerRequest,
            Self::CriticalError { .. } => EventTopic::DeadLetterQueue,
        }
    }

    /// Node identity the event is scoped to, if any.
    #[must_use]
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::MessageReceived { node_id, .. } => Some(node_id),
            Self::MessageQueueError { node_id, .. } => node_id.as_ref(),
            Self::TransactionSubmitted(tx) => Some(&tx.node_id),
            _ => None,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::MessageQueueError { .. } => "message_queue_error",
            Self::NewBlocks { .. } => "new_blocks",
            Self::TransactionResult { .. } => "transaction_result",
            Self::TransactionSubmitted(_) => "transaction_submitted",
            Self::LedgerQuery { .. } => "ledger_query",
            Self::LedgerQueryResponse { .. } => "ledger_query_response",
            Self::CriticalError { .. } => "critical_error",
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Message bus deliveries and transport errors.
    MessageQueue,
    /// Connector to core: blocks, transaction outcomes, query answers.
    Ledger,
    /// Core to connector: submissions and queries.
    LedgerRequest,
    /// Dead Letter Queue for critical errors.
    DeadLetterQueue,
    /// All events (no filtering).
    All,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Node identities to include. Empty means all nodes.
    /// Events not scoped to a node always pass this check.
    pub node_ids: Vec<NodeId>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            node_ids: Vec::new(),
        }
    }

    /// Restrict to events scoped to the given node identities.
    #[must_use]
    pub fn for_nodes(mut self, node_ids: Vec<NodeId>) -> Self {
        self.node_ids = node_ids;
        self
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &NodeEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let node_match = self.node_ids.is_empty()
            || event
                .node_id()
                .map_or(true, |node_id| self.node_ids.contains(node_id));

        topic_match && node_match
    }
}
