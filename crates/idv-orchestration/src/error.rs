//! Error types for the orchestration core

use serde::{Deserialize, Serialize};
use shared_types::entities::{NodeId, RequestId};
use shared_types::errors::MessageError;
use thiserror::Error;

/// Result type alias for orchestration operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Errors raised by the key-value store adapters
#[derive(Debug, Error)]
pub enum KVStoreError {
    /// Filesystem failure
    #[error("IO error: {message}")]
    IOError {
        /// Underlying error text
        message: String,
    },

    /// Snapshot on disk could not be decoded
    #[error("Corrupted store snapshot: {0}")]
    Corrupted(String),
}

/// Errors that can occur in the orchestration core
///
/// Benign race artefacts (lock already held, index entry already consumed,
/// continuation already resumed) are not errors and never show up here.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Persistent store failure
    #[error("Store error: {0}")]
    Store(#[from] KVStoreError),

    /// Ledger submission or query failure
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Ledger did not answer in time
    #[error("Ledger query timed out: {method}")]
    LedgerTimeout {
        /// Query method
        method: String,
    },

    /// Message bus transport failure
    #[error("Message queue error: {0}")]
    MessageQueue(String),

    /// HTTP transport failure while delivering a callback
    #[error("Callback transport error: {0}")]
    Transport(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Workflow step found no identity record for its request
    #[error("Identity record not found for request {request_id}")]
    IdentityNotFound {
        /// Request the workflow runs for
        request_id: RequestId,
    },

    /// Ledger has no accessor group for the accessor
    #[error("Accessor group not found for accessor {accessor_id}")]
    AccessorGroupNotFound {
        /// Accessor looked up
        accessor_id: String,
    },

    /// Ledger rejected a submitted transaction
    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    /// No step registered under this continuation name
    #[error("Unknown continuation: {0}")]
    UnknownContinuation(String),

    /// No terminal callback registered under this name
    #[error("Unknown callback function: {0}")]
    UnknownCallback(String),

    /// Saved arguments do not match the step they were handed to
    #[error("Continuation {continuation} got saved arguments for another step")]
    MismatchedArgs {
        /// Continuation name
        continuation: String,
    },

    /// Node has no callback URL of the needed kind
    #[error("Callback URL not set: node {node_id}, kind {kind}")]
    CallbackUrlNotSet {
        /// Node identity
        node_id: NodeId,
        /// Callback kind
        kind: String,
    },

    /// Message from the bus could not be interpreted
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] MessageError),

    /// Role logic failed while processing a request
    #[error("Request processing failed: {0}")]
    Processing(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Any of the above, annotated with where it happened
    #[error(
        "{action} failed (node {node_id}, request {}): {source}",
        .request_id.as_ref().map_or("-", RequestId::as_str)
    )]
    Context {
        /// Node identity being served
        node_id: NodeId,
        /// Entry point or step that failed
        action: String,
        /// Request being handled, when known
        request_id: Option<RequestId>,
        /// Wrapped error
        #[source]
        source: Box<OrchestrationError>,
    },
}

impl OrchestrationError {
    /// Wrap with node, action and request context.
    ///
    /// Already-wrapped errors keep their innermost context.
    pub fn with_context(
        self,
        node_id: &NodeId,
        action: impl Into<String>,
        request_id: Option<&RequestId>,
    ) -> Self {
        if matches!(self, Self::Context { .. }) {
            return self;
        }
        Self::Context {
            node_id: node_id.clone(),
            action: action.into(),
            request_id: request_id.cloned(),
            source: Box::new(self),
        }
    }

    /// Infrastructure failure that a later retry may get past
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(_)
            | Self::Ledger(_)
            | Self::LedgerTimeout { .. }
            | Self::MessageQueue(_)
            | Self::Transport(_) => true,
            Self::Context { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// Failure that terminates a workflow at the current step
    pub fn is_domain(&self) -> bool {
        match self {
            Self::IdentityNotFound { .. }
            | Self::AccessorGroupNotFound { .. }
            | Self::TransactionRejected(_) => true,
            Self::Context { source, .. } => source.is_domain(),
            _ => false,
        }
    }

    /// Action recorded by [`with_context`](Self::with_context), if any
    pub fn action(&self) -> Option<&str> {
        match self {
            Self::Context { action, .. } => Some(action),
            _ => None,
        }
    }

    /// Request recorded by [`with_context`](Self::with_context), if any
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::Context { request_id, .. } => request_id.as_ref(),
            _ => None,
        }
    }

    /// Serializable form handed to callbacks
    pub fn to_payload(&self) -> ErrorPayload {
        let root = match self {
            Self::Context { source, .. } => source.as_ref(),
            other => other,
        };
        ErrorPayload {
            code: root.code().to_string(),
            message: self.to_string(),
            transient: self.is_transient(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::Store(_) => "store_error",
            Self::Ledger(_) => "ledger_error",
            Self::LedgerTimeout { .. } => "ledger_timeout",
            Self::MessageQueue(_) => "message_queue_error",
            Self::Transport(_) => "transport_error",
            Self::Serialization(_) => "serialization_error",
            Self::IdentityNotFound { .. } => "identity_not_found",
            Self::AccessorGroupNotFound { .. } => "accessor_group_not_found",
            Self::TransactionRejected(_) => "transaction_rejected",
            Self::UnknownContinuation(_) => "unknown_continuation",
            Self::UnknownCallback(_) => "unknown_callback",
            Self::MismatchedArgs { .. } => "mismatched_args",
            Self::CallbackUrlNotSet { .. } => "callback_url_not_set",
            Self::InvalidMessage(_) => "invalid_message",
            Self::Processing(_) => "processing_error",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Context { source, .. } => source.code(),
        }
    }
}

impl From<serde_json::Error> for OrchestrationError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Error as seen by an external participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Stable machine-readable code
    pub code: String,
    /// Human-readable message including context
    pub message: String,
    /// Whether retrying later may succeed
    pub transient: bool,
}

impl ErrorPayload {
    /// Payload for a ledger rejection
    pub fn rejected(reason: impl Into<String>) -> Self {
        OrchestrationError::TransactionRejected(reason.into()).to_payload()
    }
}
