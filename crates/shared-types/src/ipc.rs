//! # Bus and Ledger Payloads
//!
//! Shapes of the data exchanged with the two external event sources:
//!
//! - the **message bus**, which delivers confidential request payloads
//!   point-to-point between nodes (`BusMessage`);
//! - the **ledger**, which delivers parsed transactions per block
//!   (`ParsedBlock`), accepts submitted transactions (`LedgerTransaction`)
//!   and reports their outcome (`TransactionOutcome`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entities::{BlockHeight, NodeId, RequestId, TxId};
use crate::errors::MessageError;

/// Ledger function name that closes a request.
pub const FN_CLOSE_REQUEST: &str = "CloseRequest";
/// Ledger function name emitted when a request times out.
pub const FN_TIMEOUT_REQUEST: &str = "TimeOutRequest";
/// Ledger function name that updates service metadata.
pub const FN_UPDATE_SERVICE: &str = "UpdateService";
/// Ledger function name that adds an accessor to an accessor group.
pub const FN_ADD_ACCESSOR: &str = "AddAccessor";
/// Ledger function name that registers message-bus destinations.
pub const FN_REGISTER_MQ_DESTINATION: &str = "RegisterMsqDestination";

/// Kind of a private (off-ledger) message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateMessageType {
    /// RP asks an IDP for consent.
    ConsentRequest,
    /// IDP challenge exchange.
    ChallengeRequest,
    /// RP asks an AS for data.
    DataRequest,
    /// IDP answers an RP.
    IdpResponse,
    /// AS answers an RP.
    AsDataResponse,
    /// Anything this node does not understand.
    #[serde(other)]
    Unknown,
}

/// A message delivered by the message bus.
///
/// Only the routing fields are typed; everything else stays opaque in
/// `payload` and is handed to role logic untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Message kind.
    #[serde(rename = "type")]
    pub message_type: PrivateMessageType,
    /// Request this message belongs to.
    pub request_id: RequestId,
    /// Ledger height the sender had observed when sending.
    pub height: BlockHeight,
    /// Per-request salt, present on requests that carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_salt: Option<String>,
    /// Remaining message body.
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl BusMessage {
    pub fn new(
        message_type: PrivateMessageType,
        request_id: impl Into<RequestId>,
        height: BlockHeight,
    ) -> Self {
        Self {
            message_type,
            request_id: request_id.into(),
            height,
            initial_salt: None,
            payload: Map::new(),
        }
    }

    /// Parse a raw bus payload.
    pub fn from_json(value: Value) -> Result<Self, MessageError> {
        let Some(object) = value.as_object() else {
            return Err(MessageError::Malformed("expected a JSON object".into()));
        };
        for field in ["type", "request_id", "height"] {
            if !object.contains_key(field) {
                return Err(MessageError::MissingField(field));
            }
        }
        serde_json::from_value(value).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    pub fn with_initial_salt(mut self, salt: impl Into<String>) -> Self {
        self.initial_salt = Some(salt.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        RequestId(value)
    }
}

/// One transaction parsed out of a ledger block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedTransaction {
    /// Ledger function invoked.
    #[serde(rename = "fnName")]
    pub fn_name: String,
    /// Function arguments.
    #[serde(default)]
    pub args: Value,
}

impl ParsedTransaction {
    pub fn new(fn_name: impl Into<String>, args: Value) -> Self {
        Self {
            fn_name: fn_name.into(),
            args,
        }
    }

    /// `args.request_id`, when present.
    pub fn request_id(&self) -> Option<RequestId> {
        self.args
            .get("request_id")
            .and_then(Value::as_str)
            .map(RequestId::from)
    }

    /// `args.service_id`, when present.
    pub fn service_id(&self) -> Option<&str> {
        self.args.get("service_id").and_then(Value::as_str)
    }

    /// Whether this transaction ends the life of a request.
    pub fn closes_request(&self) -> bool {
        self.fn_name == FN_CLOSE_REQUEST || self.fn_name == FN_TIMEOUT_REQUEST
    }
}

/// Parsed transactions of one ledger block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedBlock {
    pub height: BlockHeight,
    pub transactions: Vec<ParsedTransaction>,
}

/// A transaction submitted to the ledger by this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Caller-chosen id echoed back with the outcome.
    pub tx_id: TxId,
    /// Node identity the transaction is signed as.
    pub node_id: NodeId,
    /// Ledger function to invoke.
    pub fn_name: String,
    /// Function arguments.
    pub args: Value,
}

impl LedgerTransaction {
    pub fn new(node_id: NodeId, fn_name: impl Into<String>, args: Value) -> Self {
        Self {
            tx_id: TxId::new(),
            node_id,
            fn_name: fn_name.into(),
            args,
        }
    }
}

/// Outcome of a submitted transaction, as reported by the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransactionOutcome {
    /// Included in a block and executed successfully.
    Committed {
        #[serde(default)]
        result: Value,
    },
    /// Rejected by the ledger (check failed, execution error, timeout).
    Rejected { reason: String },
}

impl TransactionOutcome {
    pub fn committed() -> Self {
        Self::Committed {
            result: Value::Null,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }
}

/// One entry of a request's data request list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequestEntry {
    pub service_id: String,
    #[serde(default)]
    pub as_id_list: Vec<NodeId>,
}

/// On-ledger request detail, as returned by a ledger query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestDetail {
    pub request_id: RequestId,
    #[serde(default)]
    pub data_request_list: Vec<DataRequestEntry>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub timed_out: bool,
}

/// Read-only queries the core issues against the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum LedgerQuery {
    GetAccessorGroupId { accessor_id: String },
    GetRequestDetail { request_id: RequestId },
}

impl LedgerQuery {
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetAccessorGroupId { .. } => "get_accessor_group_id",
            Self::GetRequestDetail { .. } => "get_request_detail",
        }
    }
}
