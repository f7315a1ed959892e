use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{BusError, DeliveryControl, Message, Result};

/// Default time a delivery may stay unacknowledged before it is redelivered.
pub const DEFAULT_ACK_WAIT: Duration = Duration::from_secs(30);

/// Rejects channel names no implementation can route: empty, containing
/// whitespace, or containing the NATS wildcards `*` and `>`.
pub(crate) fn validate_channel(channel: &str) -> Result<()> {
    if channel.is_empty()
        || channel
            .chars()
            .any(|c| c.is_whitespace() || c == '*' || c == '>')
    {
        return Err(BusError::InvalidChannel(channel.to_string()));
    }
    Ok(())
}

/// Options for subscribing to a channel.
#[derive(Debug, Clone)]
pub struct SubscribeOptions {
    /// How long a delivered message may remain unacknowledged before the bus
    /// delivers it again.
    pub ack_wait: Duration,
}

impl SubscribeOptions {
    /// Creates options with the default ack wait.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ack wait.
    pub fn ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            ack_wait: DEFAULT_ACK_WAIT,
        }
    }
}

/// An active subscription to one channel.
///
/// Messages are pulled with [`Subscription::next`]. Dropping the subscription
/// without [`Subscription::close`] leaves the subscriber slot stale until the
/// bus notices the closed receiver.
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<Message>,
    control: Arc<dyn DeliveryControl>,
}

impl Subscription {
    /// Creates a subscription. Used by bus implementations.
    pub fn new(
        channel: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<Message>,
        control: Arc<dyn DeliveryControl>,
    ) -> Self {
        Self {
            channel: channel.into(),
            receiver,
            control,
        }
    }

    /// The subscribed channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next delivery.
    ///
    /// Returns None once the subscription has been closed by the bus.
    pub async fn next(&mut self) -> Option<Message> {
        self.receiver.recv().await
    }

    /// Stops intake. Undelivered and unacknowledged messages remain on the
    /// channel.
    pub async fn close(mut self) -> Result<()> {
        self.receiver.close();
        self.control.unsubscribe(&self.channel).await
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .finish()
    }
}

/// Client contract of an at-least-once message bus.
///
/// Channels are durable: messages published while nobody is subscribed are
/// delivered once a subscriber attaches. Every channel has at most one
/// subscriber. A delivered message that is neither acknowledged nor rejected
/// within `ack_wait` is delivered again.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Attaches the single subscriber of `channel`.
    async fn subscribe(&self, channel: &str, options: SubscribeOptions) -> Result<Subscription>;

    /// Publishes a payload, returning its sequence number on the channel.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<u64>;
}
