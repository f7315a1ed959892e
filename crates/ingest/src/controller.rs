//! Subscription loop with a bounded worker pool and graceful shutdown.

use std::sync::Arc;

use bus::{MessageBus, SubscribeOptions, Subscription};
use order_store::OrderStore;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::{IngestConfig, IngestPipeline, MessageOutcome, Result};

/// Counts of settled deliveries over the lifetime of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub persisted: u64,
    pub duplicate: u64,
    pub rejected: u64,
    pub redelivered: u64,
    /// Workers that panicked; their messages stay unacknowledged.
    pub failed: u64,
}

impl IngestStats {
    fn record(&mut self, result: std::result::Result<MessageOutcome, JoinError>) {
        match result {
            Ok(MessageOutcome::Persisted) => self.persisted += 1,
            Ok(MessageOutcome::Duplicate) => self.duplicate += 1,
            Ok(MessageOutcome::Rejected(_)) => self.rejected += 1,
            Ok(MessageOutcome::Redeliver(_)) => self.redelivered += 1,
            Err(e) => {
                tracing::error!(error = %e, "Ingestion worker failed");
                self.failed += 1;
            }
        }
    }

    /// Total deliveries handled.
    pub fn total(&self) -> u64 {
        self.persisted + self.duplicate + self.rejected + self.redelivered + self.failed
    }
}

/// Owns one subscription and feeds its messages through an [`IngestPipeline`].
///
/// At most `max_in_flight` messages are processed concurrently. After a
/// storage failure the loop waits out the pipeline's backoff before
/// dispatching the next message. Cancelling the shutdown token stops intake,
/// waits for in-flight messages to settle, then detaches from the channel.
pub struct IngestionController<S> {
    pipeline: IngestPipeline<S>,
    max_in_flight: usize,
    shutdown: CancellationToken,
}

impl<S> IngestionController<S>
where
    S: OrderStore + Clone + 'static,
{
    /// Creates a controller writing to `store`.
    pub fn new(store: S, config: &IngestConfig, shutdown: CancellationToken) -> Self {
        Self {
            pipeline: IngestPipeline::new(store, config),
            max_in_flight: config.max_in_flight.max(1),
            shutdown,
        }
    }

    /// Subscribes to `config.channel` and runs the loop on a background task.
    pub async fn spawn<B>(self, bus: &B, config: &IngestConfig) -> Result<JoinHandle<IngestStats>>
    where
        B: MessageBus + ?Sized,
    {
        let options = SubscribeOptions::new().ack_wait(config.ack_wait);
        let subscription = bus.subscribe(&config.channel, options).await?;
        tracing::info!(
            channel = %config.channel,
            max_in_flight = self.max_in_flight,
            "Subscribed"
        );
        Ok(tokio::spawn(self.run(subscription)))
    }

    /// Runs until shutdown is requested or the bus closes the subscription.
    #[tracing::instrument(skip_all, fields(channel = subscription.channel()))]
    pub async fn run(self, mut subscription: Subscription) -> IngestStats {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut workers = JoinSet::new();
        let mut stats = IngestStats::default();

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                message = subscription.next() => match message {
                    Some(message) => message,
                    None => {
                        tracing::info!("Subscription closed by bus");
                        break;
                    }
                },
            };

            while let Some(result) = workers.try_join_next() {
                stats.record(result);
            }

            let delay = self.pipeline.backoff().current_delay();
            if !delay.is_zero() {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "Delaying next message");
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = permits.clone().acquire_owned() => permit,
            };
            let Ok(permit) = permit else {
                break;
            };

            let pipeline = self.pipeline.clone();
            workers.spawn(async move {
                let outcome = pipeline.handle(&message).await;
                drop(permit);
                outcome
            });
        }

        // Intake has stopped; let in-flight messages settle before detaching
        // so their acks still count.
        tracing::info!(in_flight = workers.len(), "Draining in-flight messages");
        while let Some(result) = workers.join_next().await {
            stats.record(result);
        }

        // Anything delivered but never dispatched goes back to the channel.
        if let Err(e) = subscription.close().await {
            tracing::warn!(error = %e, "Failed to close subscription");
        }

        tracing::info!(
            persisted = stats.persisted,
            duplicate = stats.duplicate,
            rejected = stats.rejected,
            redelivered = stats.redelivered,
            failed = stats.failed,
            "Ingestion stopped"
        );
        stats
    }
}
