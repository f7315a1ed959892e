//! Per-message processing: decode, persist, settle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bus::Message;
use domain::{ValidationWarning, decode_order};
use order_store::{OrderStore, PersistOutcome, StorageError};

use crate::{Backoff, IngestConfig, MessageOutcome};

/// Drives one message from raw payload to an acknowledgment decision.
///
/// Cloning is cheap; clones share the store and the backoff state, so every
/// worker of a subscription backs off together.
#[derive(Debug, Clone)]
pub struct IngestPipeline<S> {
    store: S,
    persist_timeout: Duration,
    backoff: Arc<Backoff>,
}

impl<S: OrderStore> IngestPipeline<S> {
    /// Creates a pipeline writing to `store`.
    pub fn new(store: S, config: &IngestConfig) -> Self {
        Self {
            store,
            persist_timeout: config.persist_timeout,
            backoff: Arc::new(Backoff::new(config.backoff_base, config.backoff_max)),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Backoff shared by all clones of this pipeline.
    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Decodes and persists a payload without touching the bus.
    #[tracing::instrument(skip_all, fields(payload_len = payload.len()))]
    pub async fn process(&self, payload: &[u8]) -> MessageOutcome {
        let decoded = match decode_order(payload) {
            Ok(decoded) => decoded,
            Err(err) => {
                tracing::warn!(
                    order_uid = err.order_uid().map(|uid| uid.as_str()),
                    kind = %err.kind(),
                    error = %err,
                    "Rejecting undecodable message"
                );
                return MessageOutcome::Rejected(err.kind());
            }
        };

        let order = decoded.order;
        for warning in &decoded.warnings {
            match warning {
                ValidationWarning::AmountMismatch { .. } => {
                    metrics::counter!("ingest_amount_mismatch_total").increment(1);
                }
            }
            tracing::warn!(order_uid = %order.order_uid, %warning, "Order accepted with warning");
        }

        let started = Instant::now();
        let result = match tokio::time::timeout(self.persist_timeout, self.store.persist(&order)).await
        {
            Ok(result) => result,
            // Dropping the persist future rolls back its transaction.
            Err(_) => Err(StorageError::Timeout(self.persist_timeout)),
        };
        metrics::histogram!("ingest_persist_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match result {
            Ok(PersistOutcome::Persisted) => {
                tracing::info!(
                    order_uid = %order.order_uid,
                    items = order.item_count(),
                    "Order persisted"
                );
                MessageOutcome::Persisted
            }
            Ok(PersistOutcome::Duplicate) => {
                tracing::info!(order_uid = %order.order_uid, "Order already stored, skipping");
                MessageOutcome::Duplicate
            }
            Err(err) => {
                tracing::error!(
                    order_uid = %order.order_uid,
                    kind = %err.kind(),
                    error = %err,
                    "Failed to persist order"
                );
                MessageOutcome::Redeliver(err.kind())
            }
        }
    }

    /// Processes a delivered message and settles it with the bus.
    ///
    /// Acks everything except storage failures, which are nak'd so the bus
    /// redelivers them. Storage failures advance the backoff; stored orders
    /// reset it.
    #[tracing::instrument(
        skip_all,
        fields(
            channel = message.channel(),
            sequence = message.sequence(),
            attempt = message.delivery_attempt()
        )
    )]
    pub async fn handle(&self, message: &Message) -> MessageOutcome {
        let outcome = self.process(message.payload()).await;

        match outcome {
            MessageOutcome::Redeliver(_) => {
                let delay = self.backoff.record_failure();
                tracing::warn!(
                    delay_ms = delay.as_millis() as u64,
                    failures = self.backoff.consecutive_failures(),
                    "Storage unavailable, backing off"
                );
            }
            MessageOutcome::Persisted | MessageOutcome::Duplicate => self.backoff.record_success(),
            MessageOutcome::Rejected(_) => {}
        }

        let settled = if outcome.should_ack() {
            message.ack().await
        } else {
            message.nak().await
        };
        if let Err(e) = settled {
            // The bus will redeliver; the next attempt sees a duplicate.
            tracing::warn!(error = %e, %outcome, "Failed to settle message");
        }

        metrics::counter!("ingest_messages_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}
