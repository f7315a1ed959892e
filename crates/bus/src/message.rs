use std::sync::Arc;

use async_trait::async_trait;

use crate::Result;

/// Acknowledgment side of a bus client.
///
/// A [`Message`] carries a handle to this so that consumers can settle it
/// without holding a reference to the bus itself.
#[async_trait]
pub trait DeliveryControl: Send + Sync {
    /// Marks the message as processed; it will not be redelivered.
    ///
    /// Acknowledging a message that is no longer outstanding is a no-op.
    async fn ack(&self, channel: &str, sequence: u64) -> Result<()>;

    /// Requests immediate redelivery of the message.
    ///
    /// Rejecting a message that is no longer outstanding is a no-op.
    async fn nak(&self, channel: &str, sequence: u64) -> Result<()>;

    /// Detaches the channel's subscriber. Outstanding messages stay on the
    /// channel for the next subscriber.
    async fn unsubscribe(&self, channel: &str) -> Result<()>;
}

/// A single delivery of a published payload.
///
/// The same sequence number may be delivered more than once; each delivery
/// has a higher `delivery_attempt`.
pub struct Message {
    channel: String,
    sequence: u64,
    payload: Vec<u8>,
    delivery_attempt: u32,
    control: Arc<dyn DeliveryControl>,
}

impl Message {
    /// Creates a delivery. Used by bus implementations.
    pub fn new(
        channel: impl Into<String>,
        sequence: u64,
        payload: Vec<u8>,
        delivery_attempt: u32,
        control: Arc<dyn DeliveryControl>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sequence,
            payload,
            delivery_attempt,
            control,
        }
    }

    /// The channel this message was published to.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Sequence number assigned at publish time, unique per channel.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The raw payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// 1 for the first delivery, incremented on every redelivery.
    pub fn delivery_attempt(&self) -> u32 {
        self.delivery_attempt
    }

    /// Returns true if this message was delivered before.
    pub fn redelivered(&self) -> bool {
        self.delivery_attempt > 1
    }

    /// Acknowledges the message.
    pub async fn ack(&self) -> Result<()> {
        self.control.ack(&self.channel, self.sequence).await
    }

    /// Requests redelivery of the message.
    pub async fn nak(&self) -> Result<()> {
        self.control.nak(&self.channel, self.sequence).await
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel)
            .field("sequence", &self.sequence)
            .field("payload_len", &self.payload.len())
            .field("delivery_attempt", &self.delivery_attempt)
            .finish()
    }
}
