//! Startup error types.

use std::path::PathBuf;

use bus::BusError;
use ingest::IngestError;
use metrics_exporter_prometheus::BuildError;
use order_store::StorageError;
use thiserror::Error;

/// Failures that stop the service from starting or shutting down cleanly.
///
/// Per-message failures never surface here; they are settled with the bus.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),

    #[error("Storage setup failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Ingestion failed: {0}")]
    Ingest(#[from] IngestError),

    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Failed to read {}: {source}", .path.display())]
    ReadPayload {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[source] std::io::Error),
}
