use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::Order;
use tokio::sync::RwLock;

use crate::{
    OrderUid, Result, StorageError,
    store::{OrderStore, PersistOutcome, RowCounts},
};

#[derive(Debug, Default)]
struct InMemoryState {
    orders: HashMap<OrderUid, Order>,
    fail_on_persist: bool,
    remaining_failures: u32,
    persist_delay: Option<Duration>,
    persist_attempts: u64,
}

impl InMemoryState {
    fn take_failure(&mut self) -> bool {
        if self.fail_on_persist {
            return true;
        }
        if self.remaining_failures > 0 {
            self.remaining_failures -= 1;
            return true;
        }
        false
    }
}

/// In-memory order store implementation for testing.
///
/// Provides the same atomicity and idempotency guarantees as the PostgreSQL
/// implementation: the whole aggregate is inserted under one write lock, so
/// it is either fully visible or not at all. Failures and latency can be
/// injected to simulate a degraded store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<InMemoryState>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every persist call fail with a connectivity failure until reset.
    pub async fn set_fail_on_persist(&self, fail: bool) {
        self.state.write().await.fail_on_persist = fail;
    }

    /// Makes the next `count` persist calls fail with a connectivity failure.
    pub async fn fail_next_persists(&self, count: u32) {
        self.state.write().await.remaining_failures = count;
    }

    /// Delays every persist call before it commits.
    pub async fn set_persist_delay(&self, delay: Option<Duration>) {
        self.state.write().await.persist_delay = delay;
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    /// Returns the number of persist calls that reached the store.
    pub async fn persist_attempts(&self) -> u64 {
        self.state.read().await.persist_attempts
    }

    /// Clears all orders and injected faults.
    pub async fn clear(&self) {
        *self.state.write().await = InMemoryState::default();
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn persist(&self, order: &Order) -> Result<PersistOutcome> {
        let delay = {
            let mut state = self.state.write().await;
            state.persist_attempts += 1;
            if state.take_failure() {
                return Err(StorageError::ConnectivityFailure(
                    "simulated storage outage".to_string(),
                ));
            }
            state.persist_delay
        };

        // Latency sits inside the "transaction": if the caller gives up
        // before it elapses, nothing is committed.
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.write().await;
        if state.orders.contains_key(&order.order_uid) {
            return Ok(PersistOutcome::Duplicate);
        }
        state.orders.insert(order.order_uid.clone(), order.clone());
        Ok(PersistOutcome::Persisted)
    }

    async fn load(&self, order_uid: &OrderUid) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(order_uid).cloned())
    }

    async fn row_counts(&self, order_uid: &OrderUid) -> Result<RowCounts> {
        let state = self.state.read().await;
        Ok(match state.orders.get(order_uid) {
            Some(order) => RowCounts {
                orders: 1,
                delivery: 1,
                payment: 1,
                items: order.items.len() as u64,
            },
            None => RowCounts::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::OrderStoreExt;

    fn create_test_order(order_uid: &str, item_count: usize) -> Order {
        let mut value: serde_json::Value =
            serde_json::from_str(include_str!("../../../fixtures/model.json")).unwrap();
        value["order_uid"] = serde_json::json!(order_uid);
        let item = value["items"][0].clone();
        value["items"] = serde_json::Value::Array(vec![item; item_count]);
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn persist_new_order() {
        let store = InMemoryOrderStore::new();
        let order = create_test_order("order-1", 2);

        let outcome = store.persist(&order).await.unwrap();
        assert_eq!(outcome, PersistOutcome::Persisted);

        let counts = store.row_counts(&order.order_uid).await.unwrap();
        assert_eq!(
            counts,
            RowCounts {
                orders: 1,
                delivery: 1,
                payment: 1,
                items: 2
            }
        );
        assert_eq!(store.load(&order.order_uid).await.unwrap(), Some(order));
    }

    #[tokio::test]
    async fn persist_twice_is_duplicate() {
        let store = InMemoryOrderStore::new();
        let order = create_test_order("order-1", 1);

        store.persist(&order).await.unwrap();
        let outcome = store.persist(&order).await.unwrap();

        assert_eq!(outcome, PersistOutcome::Duplicate);
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_with_different_content_is_not_an_update() {
        let store = InMemoryOrderStore::new();
        let original = create_test_order("order-1", 1);
        let mut changed = original.clone();
        changed.track_number = "CHANGED".to_string();

        store.persist(&original).await.unwrap();
        let outcome = store.persist(&changed).await.unwrap();

        assert_eq!(outcome, PersistOutcome::Duplicate);
        let stored = store.load(&original.order_uid).await.unwrap().unwrap();
        assert_eq!(stored.track_number, original.track_number);
    }

    #[tokio::test]
    async fn injected_failure_leaves_no_rows() {
        let store = InMemoryOrderStore::new();
        store.set_fail_on_persist(true).await;
        let order = create_test_order("order-1", 3);

        let result = store.persist(&order).await;
        assert!(matches!(result, Err(StorageError::ConnectivityFailure(_))));
        assert!(store.row_counts(&order.order_uid).await.unwrap().is_empty());

        store.set_fail_on_persist(false).await;
        assert_eq!(
            store.persist(&order).await.unwrap(),
            PersistOutcome::Persisted
        );
    }

    #[tokio::test]
    async fn fail_next_persists_recovers() {
        let store = InMemoryOrderStore::new();
        store.fail_next_persists(2).await;
        let order = create_test_order("order-1", 1);

        assert!(store.persist(&order).await.is_err());
        assert!(store.persist(&order).await.is_err());
        assert!(store.persist(&order).await.is_ok());
        assert_eq!(store.persist_attempts().await, 3);
    }

    #[tokio::test]
    async fn cancelled_persist_commits_nothing() {
        let store = InMemoryOrderStore::new();
        store
            .set_persist_delay(Some(Duration::from_millis(200)))
            .await;
        let order = create_test_order("order-1", 1);

        let result =
            tokio::time::timeout(Duration::from_millis(10), store.persist(&order)).await;
        assert!(result.is_err());
        assert!(!store.contains(&order.order_uid).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_persist_of_same_order() {
        let store = InMemoryOrderStore::new();
        let order = create_test_order("order-1", 1);

        let (a, b) = tokio::join!(store.persist(&order), store.persist(&order));
        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| o.as_str());

        assert_eq!(
            outcomes,
            vec![PersistOutcome::Duplicate, PersistOutcome::Persisted]
        );
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn load_missing_order() {
        let store = InMemoryOrderStore::new();
        let result = store.load(&OrderUid::new("missing")).await.unwrap();
        assert!(result.is_none());
    }
}
