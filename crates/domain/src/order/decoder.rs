//! Envelope decoder: raw bus payload to validated order aggregate.

use common::OrderUid;
use serde::Deserialize;
use serde_json::error::Category;

use super::Order;
use super::validation::{self, ValidationWarning};
use crate::error::{DecodeError, Result};

/// A decoded order together with any non-fatal warnings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedOrder {
    pub order: Order,
    pub warnings: Vec<ValidationWarning>,
}

impl DecodedOrder {
    /// Returns true if no warnings were raised.
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Decodes and validates an order envelope.
///
/// Syntactically invalid JSON yields [`DecodeError::Malformed`]. Missing or
/// mistyped fields, an empty item list, blank `order_uid`, negative money
/// and out-of-range `sale` yield [`DecodeError::SchemaViolation`].
/// Payment inconsistencies are returned as warnings.
///
/// Performs no I/O; the result depends only on `payload`.
pub fn decode_order(payload: &[u8]) -> Result<DecodedOrder> {
    let order: Order = serde_json::from_slice(payload).map_err(|e| classify(e, payload))?;

    validation::check_schema(&order).map_err(|reason| {
        let order_uid = (!order.order_uid.is_blank()).then(|| order.order_uid.clone());
        DecodeError::schema(order_uid, reason)
    })?;

    let warnings = validation::consistency_warnings(&order);
    Ok(DecodedOrder { order, warnings })
}

fn classify(err: serde_json::Error, payload: &[u8]) -> DecodeError {
    match err.classify() {
        Category::Data => DecodeError::schema(probe_order_uid(payload), err.to_string()),
        Category::Syntax | Category::Eof | Category::Io => DecodeError::Malformed(err),
    }
}

#[derive(Deserialize)]
struct UidProbe {
    order_uid: Option<OrderUid>,
}

/// Best-effort recovery of the order uid from a payload that failed to
/// decode as a full order.
fn probe_order_uid(payload: &[u8]) -> Option<OrderUid> {
    serde_json::from_slice::<UidProbe>(payload)
        .ok()
        .and_then(|probe| probe.order_uid)
        .filter(|uid| !uid.is_blank())
}
