//! Ingestion controller for order events.
//!
//! Each message received from the bus goes through:
//! 1. Decode: payload to validated order ([`domain::decode_order`])
//! 2. Persist: one transaction, idempotent on `order_uid` ([`order_store::OrderStore`])
//! 3. Settle: ack on persisted, duplicate or undecodable; nak on storage failure
//!
//! Storage failures also push the subscription into exponential backoff so a
//! down store is not hammered with redeliveries.

pub mod backoff;
pub mod config;
pub mod controller;
pub mod error;
pub mod outcome;
pub mod pipeline;

pub use backoff::Backoff;
pub use config::IngestConfig;
pub use controller::{IngestStats, IngestionController};
pub use error::{IngestError, Result};
pub use outcome::MessageOutcome;
pub use pipeline::IngestPipeline;
