//! Outbound notifications to participant endpoints.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared_types::entities::NodeId;
use uuid::Uuid;

/// Kind of callback endpoint a participant registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    /// Operational errors
    Error,
    /// New request for an IDP
    IncomingRequest,
    /// IDP/AS responses for an RP
    ResponseResult,
    /// Request status changes for an RP
    RequestStatus,
    /// Outcome of identity workflows for an IDP
    IdentityResult,
    /// New data request for an AS
    DataRequest,
}

impl CallbackKind {
    /// Every kind, in a stable order
    pub const ALL: [CallbackKind; 6] = [
        CallbackKind::Error,
        CallbackKind::IncomingRequest,
        CallbackKind::ResponseResult,
        CallbackKind::RequestStatus,
        CallbackKind::IdentityResult,
        CallbackKind::DataRequest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::IncomingRequest => "incoming_request",
            Self::ResponseResult => "response_result",
            Self::RequestStatus => "request_status",
            Self::IdentityResult => "identity_result",
            Self::DataRequest => "data_request",
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown callback kind: {s}"))
    }
}

/// Delivery state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for (another) attempt
    Pending,
    /// Retry budget spent; kept for inspection only
    Exhausted,
}

/// One notification to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackJob {
    /// Job identifier, also the store key
    pub id: Uuid,
    /// Node identity the notification is sent for
    pub node_id: NodeId,
    /// Target endpoint
    pub url: String,
    /// JSON body
    pub body: Value,
    /// Operational error rather than a domain event
    pub is_error: bool,
    /// Endpoint kind, used to resolve the retry policy
    pub kind: CallbackKind,
    /// Failed attempts so far
    pub attempts: u32,
    /// Earliest time of the next attempt
    pub next_attempt_at: DateTime<Utc>,
    /// Whether the job is kept in the store until it completes
    pub persisted: bool,
    /// Delivery state
    pub status: JobStatus,
    /// Last failure, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl CallbackJob {
    pub fn new(node_id: NodeId, url: impl Into<String>, body: Value, kind: CallbackKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            node_id,
            url: url.into(),
            body,
            is_error: kind == CallbackKind::Error,
            kind,
            attempts: 0,
            next_attempt_at: Utc::now(),
            persisted: true,
            status: JobStatus::Pending,
            last_error: None,
        }
    }

    /// Whether a later attempt is still expected
    pub fn is_pending(&self) -> bool {
        self.status == JobStatus::Pending
    }
}
