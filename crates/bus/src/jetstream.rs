//! NATS JetStream implementation of [`MessageBus`].
//!
//! Every channel is a subject on one stream. A subscriber is a durable pull
//! consumer with explicit acknowledgment, so messages published while the
//! service is down are delivered once it attaches, and anything left
//! unacknowledged for `ack_wait` is redelivered by the server.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, AckKind, consumer, stream};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    BusError, DeliveryControl, Message, Result,
    bus::{MessageBus, SubscribeOptions, Subscription, validate_channel},
};

/// Default stream holding every channel.
pub const DEFAULT_STREAM: &str = "ORDERS";

/// Default prefix of durable consumer names.
pub const DEFAULT_DURABLE: &str = "test-client";

/// Connection settings for [`JetStreamBus`].
#[derive(Debug, Clone)]
pub struct JetStreamConfig {
    /// Server URL, e.g. `nats://localhost:4222`.
    pub url: String,
    /// Stream that holds the channel subjects. Created if missing.
    pub stream: String,
    /// Durable consumer name prefix; the channel is appended.
    pub durable: String,
    /// Reconnect attempts before the client gives up. `None` retries forever.
    pub max_reconnects: Option<usize>,
}

impl JetStreamConfig {
    /// Settings for `url` with the default stream and durable name.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            stream: DEFAULT_STREAM.to_string(),
            durable: DEFAULT_DURABLE.to_string(),
            max_reconnects: Some(60),
        }
    }

    /// Durable consumer name for `channel`. Consumer names may not contain dots.
    pub fn consumer_name(&self, channel: &str) -> String {
        format!("{}-{}", self.durable, channel.replace('.', "_"))
    }
}

#[derive(Default)]
struct Deliveries {
    /// Messages handed to a subscriber and not yet settled.
    pending: HashMap<(String, u64), jetstream::Message>,
    /// Intake task of each attached channel.
    subscribers: HashMap<String, CancellationToken>,
    /// Subjects known to be bound to the stream.
    subjects: HashSet<String>,
}

/// Message bus backed by a NATS JetStream stream.
///
/// Cloning is cheap; clones share the connection and delivery state.
#[derive(Clone)]
pub struct JetStreamBus {
    context: jetstream::Context,
    config: JetStreamConfig,
    state: Arc<Mutex<Deliveries>>,
}

impl JetStreamBus {
    /// Connects to the server and makes sure the stream exists.
    #[tracing::instrument(skip_all, fields(url = %config.url, stream = %config.stream))]
    pub async fn connect(config: JetStreamConfig) -> Result<Self> {
        let client = async_nats::ConnectOptions::new()
            .name("order-ingest")
            .max_reconnects(config.max_reconnects)
            .reconnect_delay_callback(|attempts| {
                Duration::from_millis(std::cmp::min((attempts as u64) * 100, 5000))
            })
            .connect(config.url.as_str())
            .await
            .map_err(|e| BusError::Connect {
                url: config.url.clone(),
                message: e.to_string(),
            })?;

        let context = jetstream::new(client);
        context
            .get_or_create_stream(stream::Config {
                name: config.stream.clone(),
                subjects: Vec::new(),
                ..Default::default()
            })
            .await
            .map_err(BusError::broker)?;

        tracing::info!("Connected to JetStream");
        Ok(Self {
            context,
            config,
            state: Arc::new(Mutex::new(Deliveries::default())),
        })
    }

    /// The connection settings.
    pub fn config(&self) -> &JetStreamConfig {
        &self.config
    }

    /// Number of deliveries on `channel` handed out and not yet settled.
    pub async fn pending_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .await
            .pending
            .keys()
            .filter(|(c, _)| c == channel)
            .count()
    }

    fn control(&self) -> Arc<dyn DeliveryControl> {
        Arc::new(self.clone())
    }

    /// Binds `channel` to the stream if it is not bound yet.
    async fn ensure_subject(&self, channel: &str) -> Result<()> {
        if self.state.lock().await.subjects.contains(channel) {
            return Ok(());
        }

        let stream = self
            .context
            .get_stream(self.config.stream.as_str())
            .await
            .map_err(BusError::broker)?;
        let mut config = stream.cached_info().config.clone();
        if !config.subjects.iter().any(|s| s == channel) {
            config.subjects.push(channel.to_string());
            self.context
                .update_stream(&config)
                .await
                .map_err(BusError::broker)?;
            tracing::debug!(channel, "Bound channel to stream");
        }

        self.state.lock().await.subjects.insert(channel.to_string());
        Ok(())
    }

    /// Forwards deliveries from the pull consumer to the subscription until
    /// the token is cancelled or the subscription is dropped.
    async fn pump(
        self,
        channel: String,
        mut messages: consumer::pull::Stream,
        sender: mpsc::UnboundedSender<Message>,
        token: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = messages.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    tracing::warn!(channel = %channel, error = %e, "Failed to pull message");
                    continue;
                }
                None => {
                    tracing::info!(channel = %channel, "Consumer stream ended");
                    break;
                }
            };

            let (sequence, attempt) = match delivery.info() {
                Ok(info) => (
                    info.stream_sequence,
                    u32::try_from(info.delivered).unwrap_or(u32::MAX),
                ),
                Err(e) => {
                    tracing::warn!(channel = %channel, error = %e, "Delivery without metadata");
                    continue;
                }
            };
            let payload = delivery.payload.to_vec();

            self.state
                .lock()
                .await
                .pending
                .insert((channel.clone(), sequence), delivery);

            let message = Message::new(channel.clone(), sequence, payload, attempt, self.control());
            if sender.send(message).is_err() {
                tracing::debug!(channel = %channel, "Subscription dropped");
                break;
            }
        }
        token.cancel();
    }

    async fn take_pending(&self, channel: &str, sequence: u64) -> Option<jetstream::Message> {
        self.state
            .lock()
            .await
            .pending
            .remove(&(channel.to_string(), sequence))
    }
}

#[async_trait]
impl DeliveryControl for JetStreamBus {
    async fn ack(&self, channel: &str, sequence: u64) -> Result<()> {
        match self.take_pending(channel, sequence).await {
            Some(delivery) => delivery.ack().await.map_err(BusError::broker),
            None => Ok(()),
        }
    }

    async fn nak(&self, channel: &str, sequence: u64) -> Result<()> {
        match self.take_pending(channel, sequence).await {
            Some(delivery) => delivery
                .ack_with(AckKind::Nak(None))
                .await
                .map_err(BusError::broker),
            None => Ok(()),
        }
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let unsettled = {
            let mut state = self.state.lock().await;
            let token = state
                .subscribers
                .remove(channel)
                .ok_or_else(|| BusError::NotSubscribed(channel.to_string()))?;
            token.cancel();

            let keys: Vec<_> = state
                .pending
                .keys()
                .filter(|(c, _)| c == channel)
                .cloned()
                .collect();
            keys.into_iter()
                .filter_map(|key| state.pending.remove(&key))
                .collect::<Vec<_>>()
        };

        // Handed out but never settled: give them straight back to the stream.
        for delivery in unsettled {
            if let Err(e) = delivery.ack_with(AckKind::Nak(None)).await {
                tracing::warn!(channel, error = %e, "Failed to return delivery");
            }
        }
        tracing::debug!(channel, "Unsubscribed");
        Ok(())
    }
}

#[async_trait]
impl MessageBus for JetStreamBus {
    async fn subscribe(&self, channel: &str, options: SubscribeOptions) -> Result<Subscription> {
        validate_channel(channel)?;
        {
            let state = self.state.lock().await;
            if state
                .subscribers
                .get(channel)
                .is_some_and(|token| !token.is_cancelled())
            {
                return Err(BusError::AlreadySubscribed(channel.to_string()));
            }
        }
        self.ensure_subject(channel).await?;

        let name = self.config.consumer_name(channel);
        let stream = self
            .context
            .get_stream(self.config.stream.as_str())
            .await
            .map_err(BusError::broker)?;
        let consumer = stream
            .get_or_create_consumer(
                &name,
                consumer::pull::Config {
                    durable_name: Some(name.clone()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ack_wait: options.ack_wait,
                    deliver_policy: consumer::DeliverPolicy::All,
                    filter_subject: channel.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(BusError::broker)?;
        let messages = consumer.messages().await.map_err(BusError::broker)?;

        let token = CancellationToken::new();
        {
            let mut state = self.state.lock().await;
            if state
                .subscribers
                .get(channel)
                .is_some_and(|token| !token.is_cancelled())
            {
                return Err(BusError::AlreadySubscribed(channel.to_string()));
            }
            state.subscribers.insert(channel.to_string(), token.clone());
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(
            self.clone()
                .pump(channel.to_string(), messages, sender, token),
        );
        tracing::debug!(channel, consumer = %name, "Subscribed");

        Ok(Subscription::new(channel, receiver, self.control()))
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<u64> {
        validate_channel(channel)?;
        self.ensure_subject(channel).await?;

        let ack = self
            .context
            .publish(channel.to_string(), payload.into())
            .await
            .map_err(BusError::broker)?
            .await
            .map_err(BusError::broker)?;
        Ok(ack.sequence)
    }
}
