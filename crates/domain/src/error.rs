//! Decoder error types.

use common::OrderUid;
use thiserror::Error;

/// Errors that can occur when decoding an order envelope.
///
/// Both variants are permanent: redelivering the same bytes yields the same
/// error.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload is not syntactically valid JSON.
    #[error("Malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The payload is valid JSON but does not describe a valid order.
    #[error("Schema violation: {reason}")]
    SchemaViolation {
        /// The order uid, if it could be recovered from the payload.
        order_uid: Option<OrderUid>,
        reason: String,
    },
}

/// Coarse classification of a [`DecodeError`], used for log fields and
/// metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecodeErrorKind {
    Malformed,
    SchemaViolation,
}

impl DecodeErrorKind {
    /// Returns a stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            DecodeErrorKind::Malformed => "malformed",
            DecodeErrorKind::SchemaViolation => "schema_violation",
        }
    }
}

impl std::fmt::Display for DecodeErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DecodeError {
    /// Creates a schema violation for a known order.
    pub fn schema(order_uid: Option<OrderUid>, reason: impl Into<String>) -> Self {
        DecodeError::SchemaViolation {
            order_uid,
            reason: reason.into(),
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> DecodeErrorKind {
        match self {
            DecodeError::Malformed(_) => DecodeErrorKind::Malformed,
            DecodeError::SchemaViolation { .. } => DecodeErrorKind::SchemaViolation,
        }
    }

    /// Returns the order uid associated with this error, if known.
    pub fn order_uid(&self) -> Option<&OrderUid> {
        match self {
            DecodeError::Malformed(_) => None,
            DecodeError::SchemaViolation { order_uid, .. } => order_uid.as_ref(),
        }
    }
}

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
