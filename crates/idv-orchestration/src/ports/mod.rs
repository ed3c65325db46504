//! Hexagonal ports.
//!
//! - [`inbound`]: what the bus and ledger connectors call into
//! - [`outbound`]: what the core needs from the outside world

pub mod inbound;
pub mod outbound;

pub use inbound::{NodeEventHandler, TransactionResultHandler};
pub use outbound::{
    BatchOperation, CallbackTransport, ErrorReporter, KeyValueStore, LedgerClient,
    RequestProcessor, RetryPolicyResolver, ScanResult, SchemaCache,
};
