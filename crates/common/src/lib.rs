//! Shared types for the order ingestion pipeline.

pub mod types;

pub use types::OrderUid;
