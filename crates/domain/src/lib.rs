//! Domain layer for the order ingestion pipeline.
//!
//! This crate provides:
//! - The order aggregate: [`Order`] with its owned [`Delivery`], [`Payment`]
//!   and [`Item`]s
//! - The envelope decoder, [`decode_order`], turning a raw bus payload into a
//!   validated aggregate
//! - Validation warnings for inconsistencies that are flagged but not rejected

pub mod error;
pub mod order;

pub use common::OrderUid;
pub use error::{DecodeError, DecodeErrorKind, Result};
pub use order::{
    DecodedOrder, Delivery, Item, Order, Payment, ValidationWarning, decode_order,
};
