use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::{
    BusError, DeliveryControl, Message, Result,
    bus::{MessageBus, SubscribeOptions, Subscription, validate_channel},
};

/// A published payload and how many times it has been delivered.
#[derive(Debug, Clone)]
struct Pending {
    payload: Vec<u8>,
    deliveries: u32,
}

#[derive(Debug)]
struct SubscriberSlot {
    sender: mpsc::UnboundedSender<Message>,
    ack_wait: Duration,
}

#[derive(Debug, Default)]
struct ChannelState {
    next_sequence: u64,
    /// Messages waiting for a subscriber, in sequence order.
    backlog: VecDeque<(u64, Pending)>,
    /// Messages delivered and awaiting acknowledgment.
    unacked: HashMap<u64, Pending>,
    subscriber: Option<SubscriberSlot>,
}

/// In-process message bus with at-least-once delivery.
///
/// Cloning is cheap; all clones share the same channels.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    channels: Arc<Mutex<HashMap<String, ChannelState>>>,
}

impl InMemoryBus {
    /// Creates a new bus with no channels.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages delivered on `channel` and not yet acknowledged.
    pub async fn unacked_count(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |state| state.unacked.len())
    }

    /// Number of messages on `channel` waiting for a subscriber.
    pub async fn backlog_len(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |state| state.backlog.len())
    }

    /// Number of messages on `channel` that are not yet acknowledged,
    /// delivered or not.
    pub async fn outstanding(&self, channel: &str) -> usize {
        self.channels
            .lock()
            .await
            .get(channel)
            .map_or(0, |state| state.unacked.len() + state.backlog.len())
    }

    fn control(&self) -> Arc<dyn DeliveryControl> {
        Arc::new(self.clone())
    }

    /// Hands a message to the channel's subscriber, or parks it in the
    /// backlog if there is none.
    fn dispatch(&self, state: &mut ChannelState, channel: &str, sequence: u64, mut pending: Pending) {
        let Some(slot) = state.subscriber.as_ref() else {
            state.backlog.push_back((sequence, pending));
            return;
        };
        let ack_wait = slot.ack_wait;

        pending.deliveries += 1;
        let message = Message::new(
            channel,
            sequence,
            pending.payload.clone(),
            pending.deliveries,
            self.control(),
        );

        if slot.sender.send(message).is_err() {
            tracing::debug!(channel, sequence, "subscriber went away, parking message");
            state.subscriber = None;
            pending.deliveries -= 1;
            state.backlog.push_back((sequence, pending));
            return;
        }

        let deliveries = pending.deliveries;
        state.unacked.insert(sequence, pending);
        self.schedule_redelivery(channel.to_string(), sequence, deliveries, ack_wait);
    }

    fn schedule_redelivery(&self, channel: String, sequence: u64, deliveries: u32, ack_wait: Duration) {
        let bus = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ack_wait).await;
            bus.redeliver_if_unacked(&channel, sequence, deliveries).await;
        });
    }

    async fn redeliver_if_unacked(&self, channel: &str, sequence: u64, deliveries: u32) {
        let mut channels = self.channels.lock().await;
        let Some(state) = channels.get_mut(channel) else {
            return;
        };

        // Acked, or already redelivered by a nak or a resubscribe
        let still_waiting = state
            .unacked
            .get(&sequence)
            .is_some_and(|pending| pending.deliveries == deliveries);
        if !still_waiting {
            return;
        }

        if let Some(pending) = state.unacked.remove(&sequence) {
            tracing::debug!(channel, sequence, deliveries, "ack wait elapsed, redelivering");
            self.dispatch(state, channel, sequence, pending);
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn subscribe(&self, channel: &str, options: SubscribeOptions) -> Result<Subscription> {
        validate_channel(channel)?;

        let mut channels = self.channels.lock().await;
        let state = channels.entry(channel.to_string()).or_default();

        if state
            .subscriber
            .as_ref()
            .is_some_and(|slot| !slot.sender.is_closed())
        {
            return Err(BusError::AlreadySubscribed(channel.to_string()));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.subscriber = Some(SubscriberSlot {
            sender,
            ack_wait: options.ack_wait,
        });

        let backlog = std::mem::take(&mut state.backlog);
        for (sequence, pending) in backlog {
            self.dispatch(state, channel, sequence, pending);
        }

        tracing::debug!(channel, "subscriber attached");
        Ok(Subscription::new(channel, receiver, self.control()))
    }

    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<u64> {
        validate_channel(channel)?;

        let mut channels = self.channels.lock().await;
        let state = channels.entry(channel.to_string()).or_default();

        state.next_sequence += 1;
        let sequence = state.next_sequence;
        self.dispatch(
            state,
            channel,
            sequence,
            Pending {
                payload,
                deliveries: 0,
            },
        );

        Ok(sequence)
    }
}

#[async_trait]
impl DeliveryControl for InMemoryBus {
    async fn ack(&self, channel: &str, sequence: u64) -> Result<()> {
        let mut channels = self.channels.lock().await;
        if let Some(state) = channels.get_mut(channel) {
            state.unacked.remove(&sequence);
        }
        Ok(())
    }

    async fn nak(&self, channel: &str, sequence: u64) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let Some(state) = channels.get_mut(channel) else {
            return Ok(());
        };
        if let Some(pending) = state.unacked.remove(&sequence) {
            self.dispatch(state, channel, sequence, pending);
        }
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        let mut channels = self.channels.lock().await;
        let state = channels
            .get_mut(channel)
            .filter(|state| state.subscriber.is_some())
            .ok_or_else(|| BusError::NotSubscribed(channel.to_string()))?;

        state.subscriber = None;

        // Everything in flight goes back to the channel, in sequence order,
        // ahead of anything published since.
        let mut returned: Vec<(u64, Pending)> = state.unacked.drain().collect();
        returned.sort_by_key(|(sequence, _)| *sequence);
        for entry in returned.into_iter().rev() {
            state.backlog.push_front(entry);
        }

        tracing::debug!(channel, parked = state.backlog.len(), "subscriber detached");
        Ok(())
    }
}
