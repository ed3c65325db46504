//! Outbound ports (driven side - SPI)

use async_trait::async_trait;
use serde_json::Value;
use shared_types::entities::{BlockHeight, NodeId, RequestId};
use shared_types::ipc::{BusMessage, LedgerTransaction, RequestDetail};

use crate::domain::{CallbackKind, RetryPolicy};
use crate::error::{KVStoreError, OrchestrationError, Result};

/// Key/value pairs returned by a prefix scan
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Port: byte-level persistent store
///
/// Implementations use interior mutability; every method takes `&self`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &[u8]) -> std::result::Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    async fn put(&self, key: &[u8], value: &[u8]) -> std::result::Result<(), KVStoreError>;

    /// Delete a key. No-op if absent.
    async fn delete(&self, key: &[u8]) -> std::result::Result<(), KVStoreError>;

    /// Apply all operations or none.
    async fn atomic_batch_write(
        &self,
        operations: Vec<BatchOperation>,
    ) -> std::result::Result<(), KVStoreError>;

    /// All pairs whose key starts with `prefix`, in key order.
    async fn prefix_scan(&self, prefix: &[u8]) -> std::result::Result<ScanResult, KVStoreError>;

    /// Make every acknowledged write durable.
    async fn flush(&self) -> std::result::Result<(), KVStoreError> {
        Ok(())
    }
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }
}

/// Port: the ledger
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Latest committed height. Never decreases.
    fn latest_block_height(&self) -> BlockHeight;

    /// Hand a transaction to the ledger. The outcome arrives later through
    /// [`TransactionResultHandler`](crate::ports::TransactionResultHandler).
    async fn submit_transaction(&self, transaction: LedgerTransaction) -> Result<()>;

    /// Accessor group the accessor belongs to
    async fn get_accessor_group_id(&self, accessor_id: &str) -> Result<Option<String>>;

    /// On-ledger detail of a request
    async fn get_request_detail(&self, request_id: &RequestId) -> Result<Option<RequestDetail>>;
}

/// Port: role business logic for a request that is ready
#[async_trait]
pub trait RequestProcessor: Send + Sync {
    /// Process a request whose origin height the ledger has passed.
    async fn process_request(&self, node_id: &NodeId, message: BusMessage) -> Result<()>;
}

/// Port: HTTP POST to a participant endpoint
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    /// POST `body` as JSON and return the response status code.
    ///
    /// `Err` means no response was received.
    async fn post_json(&self, url: &str, body: &Value) -> Result<u16>;
}

/// Port: retry policy per node and callback kind
pub trait RetryPolicyResolver: Send + Sync {
    /// Policy for a job
    fn resolve(&self, node_id: &NodeId, kind: CallbackKind, is_error: bool) -> RetryPolicy;
}

/// Port: sink for errors no caller can handle
#[async_trait]
pub trait ErrorReporter: Send + Sync {
    /// Report an error on behalf of `node_id`.
    async fn report(&self, node_id: &NodeId, error: OrchestrationError);
}

/// Port: cache of data schemas per service
pub trait SchemaCache: Send + Sync {
    /// Drop the cached schema of a service
    fn invalidate(&self, service_id: &str);
}
