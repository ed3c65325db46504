//! # Core Identifiers
//!
//! Identifiers used by every component of the node.
//!
//! ## Clusters
//!
//! - **Participants**: `NodeId`, `NodeRole`
//! - **Requests**: `RequestId`, `BlockHeight`
//! - **Ledger**: `TxId`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ParseRoleError;

/// Ledger block height.
pub type BlockHeight = u64;

/// Identity of a participant node on the network.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of an identity-verification request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Caller-chosen identifier of a submitted ledger transaction.
///
/// The ledger connector echoes it back on the transaction result event,
/// which is how a paused workflow step is found again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub Uuid);

impl TxId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role a node plays on the network.
///
/// A `Proxy` fronts zero or more underlying node identities, each of which
/// has one of the three concrete roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Relying party.
    Rp,
    /// Identity provider.
    Idp,
    /// Accessor / attribute service.
    As,
    /// Proxy for smaller members.
    Proxy,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rp => "rp",
            Self::Idp => "idp",
            Self::As => "as",
            Self::Proxy => "proxy",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rp" => Ok(Self::Rp),
            "idp" => Ok(Self::Idp),
            "as" => Ok(Self::As),
            "proxy" => Ok(Self::Proxy),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}
