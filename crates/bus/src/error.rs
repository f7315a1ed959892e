use thiserror::Error;

/// Errors that can occur when interacting with the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The channel already has an active subscription.
    #[error("Channel already has a subscriber: {0}")]
    AlreadySubscribed(String),

    /// The channel has no active subscription.
    #[error("Channel has no subscriber: {0}")]
    NotSubscribed(String),

    /// The channel name is empty or contains whitespace or wildcards.
    #[error("Invalid channel name: {0:?}")]
    InvalidChannel(String),

    /// The broker could not be reached.
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    /// The broker rejected or failed a request.
    #[error("Broker error: {0}")]
    Broker(String),
}

impl BusError {
    pub(crate) fn broker(err: impl std::fmt::Display) -> Self {
        BusError::Broker(err.to_string())
    }
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
