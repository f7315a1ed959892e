use async_trait::async_trait;
use domain::Order;

use crate::{OrderUid, Result};

/// Successful result of persisting an order.
///
/// Both variants are success from the caller's point of view: the aggregate
/// is durably stored once either is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistOutcome {
    /// The aggregate was written by this call.
    Persisted,
    /// An order with the same uid was already stored; nothing was written.
    Duplicate,
}

impl PersistOutcome {
    /// Returns a stable snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PersistOutcome::Persisted => "persisted",
            PersistOutcome::Duplicate => "duplicate",
        }
    }
}

impl std::fmt::Display for PersistOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of stored rows per table for one order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCounts {
    pub orders: u64,
    pub delivery: u64,
    pub payment: u64,
    pub items: u64,
}

impl RowCounts {
    /// Returns true if no row of any table references the order.
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Total number of rows across all tables.
    pub fn total(&self) -> u64 {
        self.orders + self.delivery + self.payment + self.items
    }
}

/// Storage for order aggregates.
///
/// Implementations must write the whole aggregate atomically and must be
/// safe to call concurrently with the same order: exactly one call reports
/// [`PersistOutcome::Persisted`].
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists the aggregate exactly once.
    ///
    /// Writes the order, delivery, payment and item rows in one transaction.
    /// If an order with the same uid already exists nothing is written and
    /// [`PersistOutcome::Duplicate`] is returned. On error nothing is written.
    async fn persist(&self, order: &Order) -> Result<PersistOutcome>;

    /// Loads a stored aggregate.
    ///
    /// Returns None if no order with this uid exists.
    async fn load(&self, order_uid: &OrderUid) -> Result<Option<Order>>;

    /// Counts the rows stored for an order in each table.
    async fn row_counts(&self, order_uid: &OrderUid) -> Result<RowCounts>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Checks if an order with this uid is stored.
    async fn contains(&self, order_uid: &OrderUid) -> Result<bool> {
        Ok(self.row_counts(order_uid).await?.orders > 0)
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
