//! Ingestion settings.

use std::time::Duration;

/// Tunables of one ingestion controller.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Channel to subscribe to.
    pub channel: String,
    /// Time the bus waits for an ack before redelivering.
    pub ack_wait: Duration,
    /// Deadline of one persistence attempt.
    pub persist_timeout: Duration,
    /// Upper bound on concurrently processed messages. Should not exceed the
    /// storage pool size.
    pub max_in_flight: usize,
    /// First backoff delay after a storage failure.
    pub backoff_base: Duration,
    /// Largest backoff delay.
    pub backoff_max: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            channel: "test-channel".to_string(),
            ack_wait: Duration::from_secs(30),
            persist_timeout: Duration::from_secs(5),
            max_in_flight: 10,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_secs(10),
        }
    }
}
