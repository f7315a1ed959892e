//! Message bus collaborator for the ingestion pipeline.
//!
//! - [`MessageBus`] is the client contract: durable channels, explicit
//!   acknowledgment, redelivery of unacknowledged messages after `ack_wait`
//! - [`JetStreamBus`] implements it on a NATS JetStream stream
//! - [`InMemoryBus`] implements it in-process for tests and local runs

pub mod bus;
pub mod error;
pub mod jetstream;
pub mod memory;
pub mod message;

pub use bus::{MessageBus, SubscribeOptions, Subscription};
pub use error::{BusError, Result};
pub use jetstream::{JetStreamBus, JetStreamConfig};
pub use memory::InMemoryBus;
pub use message::{DeliveryControl, Message};
