//! Inbound ports (driving side - API)

use async_trait::async_trait;
use shared_types::entities::{BlockHeight, NodeId, TxId};
use shared_types::ipc::{BusMessage, ParsedBlock, TransactionOutcome};

use crate::error::Result;

/// Entry points the message bus and the ledger connector invoke.
///
/// Errors never escape these methods: they are wrapped with context and
/// handed to the error-reporting port.
#[async_trait]
pub trait NodeEventHandler: Send + Sync {
    /// A private message arrived for `node_id`.
    async fn handle_message_from_queue(&self, message: BusMessage, node_id: NodeId);

    /// Blocks `from_height..=to_height` were committed.
    ///
    /// `node_id` limits handling to one hosted identity; `None` means all.
    async fn handle_new_block(
        &self,
        from_height: BlockHeight,
        to_height: BlockHeight,
        blocks: Vec<ParsedBlock>,
        node_id: Option<NodeId>,
    );

    /// The message bus transport reported a failure.
    async fn handle_message_queue_error(&self, node_id: Option<NodeId>, error: String);
}

/// Receives outcomes of transactions this node submitted.
#[async_trait]
pub trait TransactionResultHandler: Send + Sync {
    /// Resume whatever waits on `tx_id`.
    ///
    /// Returns `Ok(false)` for results nobody waits on (already resumed or
    /// never registered).
    async fn on_transaction_result(&self, tx_id: TxId, outcome: TransactionOutcome)
        -> Result<bool>;
}
