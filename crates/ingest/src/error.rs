//! Ingestion error types.

use bus::BusError;
use thiserror::Error;

/// Errors that can occur while setting up or tearing down ingestion.
///
/// Per-message failures are not errors; they surface as a
/// [`MessageOutcome`](crate::MessageOutcome).
#[derive(Debug, Error)]
pub enum IngestError {
    /// The bus rejected a subscription request.
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    /// The ingestion task panicked or was aborted.
    #[error("Ingestion task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Convenience type alias for ingestion results.
pub type Result<T> = std::result::Result<T, IngestError>;
