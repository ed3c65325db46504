//! Paused workflow steps.
//!
//! A step that submits a ledger transaction is suspended as a
//! [`ContinuationRecord`]: the name of the step to resume, the arguments it
//! needs, and the terminal callback to eventually invoke. Records are
//! persisted under the transaction id so they survive a restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::entities::{NodeId, RequestId, TxId};

/// Terminal callback named by the workflow's original caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackDescriptor {
    /// Registered callback name
    pub fn_name: String,
    /// Extra arguments forwarded unchanged to the callback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_args: Option<Vec<Value>>,
}

impl CallbackDescriptor {
    pub fn new(fn_name: impl Into<String>) -> Self {
        Self {
            fn_name: fn_name.into(),
            additional_args: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.additional_args = Some(args);
        self
    }
}

/// Arguments saved for a step, one variant per step kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum SavedArgs {
    /// Resume after the accessor was added to the ledger
    AfterAddAccessorMethod {
        request_id: RequestId,
        hash_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ial: Option<f64>,
        secret: String,
        associated: bool,
    },
    /// Resume after the message-bus destination was registered
    AfterRegisterMqDest {
        request_id: RequestId,
        secret: String,
        associated: bool,
    },
    /// Steps registered outside this crate
    Custom { args: Value },
}

impl SavedArgs {
    /// Request the step belongs to, when the variant records one
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::AfterAddAccessorMethod { request_id, .. }
            | Self::AfterRegisterMqDest { request_id, .. } => Some(request_id),
            Self::Custom { .. } => None,
        }
    }
}

/// One suspended step, keyed by the transaction it awaits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuationRecord {
    /// Transaction whose result resumes the step
    pub tx_id: TxId,
    /// Node identity the transaction was submitted as
    pub node_id: NodeId,
    /// Registered name of the step to resume
    pub continuation: String,
    /// Arguments for the step
    pub saved_args: SavedArgs,
    /// Terminal callback of the workflow
    pub callback: CallbackDescriptor,
    /// When the step was suspended
    pub created_at: DateTime<Utc>,
}
