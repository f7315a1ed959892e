//! The order aggregate as it travels on the wire and lands in storage.

use chrono::{DateTime, Utc};
use common::OrderUid;
use serde::{Deserialize, Serialize};

/// Order aggregate root.
///
/// An order owns exactly one [`Delivery`], exactly one [`Payment`] and a
/// non-empty set of [`Item`]s. The whole aggregate is persisted as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_uid: OrderUid,
    pub track_number: String,
    pub entry: String,
    pub delivery: Delivery,
    pub payment: Payment,
    pub items: Vec<Item>,
    pub locale: String,
    #[serde(default)]
    pub internal_signature: String,
    pub customer_id: String,
    pub delivery_service: String,
    pub shardkey: String,
    pub sm_id: i32,
    pub date_created: DateTime<Utc>,
    pub oof_shard: String,
}

impl Order {
    /// Returns the number of line items.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Sum of `total_price` over all items.
    pub fn items_total(&self) -> i64 {
        self.items.iter().map(|item| item.total_price).sum()
    }
}

/// Delivery details of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub name: String,
    pub phone: String,
    pub zip: String,
    pub city: String,
    pub address: String,
    pub region: String,
    pub email: String,
}

/// Payment record of an order. Money fields are in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub transaction: String,
    pub request_id: String,
    pub currency: String,
    pub provider: String,
    pub amount: i64,
    /// Unix epoch seconds.
    pub payment_dt: i64,
    pub bank: String,
    pub delivery_cost: i64,
    pub goods_total: i64,
    pub custom_fee: i64,
}

impl Payment {
    /// The amount implied by the payment's components.
    pub fn expected_amount(&self) -> i64 {
        self.delivery_cost
            .saturating_add(self.goods_total)
            .saturating_add(self.custom_fee)
    }

    /// Returns true if `amount` equals `delivery_cost + goods_total + custom_fee`.
    pub fn is_consistent(&self) -> bool {
        self.amount == self.expected_amount()
    }

    /// Converts `payment_dt` to an absolute timestamp.
    ///
    /// Returns None if the value is outside the representable range.
    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.payment_dt, 0)
    }
}

/// A line item of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub chrt_id: i64,
    pub track_number: String,
    pub price: i64,
    pub rid: String,
    pub name: String,
    /// Discount in percent, 0 to 100.
    pub sale: i32,
    pub size: String,
    pub total_price: i64,
    pub nm_id: i64,
    pub brand: String,
    pub status: i32,
}
