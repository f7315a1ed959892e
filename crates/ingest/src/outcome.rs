//! Terminal states of a single delivery attempt.

use domain::DecodeErrorKind;
use order_store::StorageErrorKind;

/// What happened to one delivery of a message.
///
/// ```text
/// Received → Decoding → Persisting → Persisted | Duplicate   (acked)
/// Received → Decoding → Rejected                             (acked, dropped)
/// Received → Decoding → Persisting → Redeliver               (nak'd)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageOutcome {
    /// The order was written by this delivery.
    Persisted,
    /// The order was already stored; nothing was written.
    Duplicate,
    /// The payload can never be decoded; it is acknowledged and dropped.
    Rejected(DecodeErrorKind),
    /// Storage failed; the message is handed back to the bus.
    Redeliver(StorageErrorKind),
}

impl MessageOutcome {
    /// Returns true if the message must be acknowledged.
    pub fn should_ack(&self) -> bool {
        !matches!(self, MessageOutcome::Redeliver(_))
    }

    /// Returns true if the order is durably stored after this outcome.
    pub fn is_stored(&self) -> bool {
        matches!(self, MessageOutcome::Persisted | MessageOutcome::Duplicate)
    }

    /// Returns a stable snake_case name for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageOutcome::Persisted => "persisted",
            MessageOutcome::Duplicate => "duplicate",
            MessageOutcome::Rejected(_) => "rejected",
            MessageOutcome::Redeliver(_) => "redeliver",
        }
    }
}

impl std::fmt::Display for MessageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageOutcome::Rejected(kind) => write!(f, "rejected ({kind})"),
            MessageOutcome::Redeliver(kind) => write!(f, "redeliver ({kind})"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_failures_are_not_acked() {
        assert!(MessageOutcome::Persisted.should_ack());
        assert!(MessageOutcome::Duplicate.should_ack());
        assert!(MessageOutcome::Rejected(DecodeErrorKind::Malformed).should_ack());
        assert!(!MessageOutcome::Redeliver(StorageErrorKind::Timeout).should_ack());
    }

    #[test]
    fn stored_outcomes() {
        assert!(MessageOutcome::Persisted.is_stored());
        assert!(MessageOutcome::Duplicate.is_stored());
        assert!(!MessageOutcome::Rejected(DecodeErrorKind::SchemaViolation).is_stored());
    }

    #[test]
    fn display_includes_kind() {
        assert_eq!(
            MessageOutcome::Redeliver(StorageErrorKind::ConnectivityFailure).to_string(),
            "redeliver (connectivity_failure)"
        );
        assert_eq!(MessageOutcome::Persisted.to_string(), "persisted");
    }
}
