//! # Error Types
//!
//! Errors for parsing the shared wire types.

use thiserror::Error;

/// Unknown node role string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown node role: {0}")]
pub struct ParseRoleError(pub String);

/// A bus message that cannot be routed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// Message is missing a field needed for routing.
    #[error("Message missing field: {0}")]
    MissingField(&'static str),

    /// Message body is not valid JSON for the expected shape.
    #[error("Malformed message: {0}")]
    Malformed(String),
}
