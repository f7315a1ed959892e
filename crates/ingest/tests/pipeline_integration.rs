//! End-to-end ingestion tests over the in-memory bus and store.

use std::time::{Duration, Instant};

use bus::{BusError, InMemoryBus, MessageBus};
use ingest::{IngestConfig, IngestError, IngestStats, IngestionController};
use order_store::{InMemoryOrderStore, OrderStore, OrderUid};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const CHANNEL: &str = "orders-test";
const MODEL: &[u8] = include_bytes!("../../../fixtures/model.json");
const WAIT_LIMIT: Duration = Duration::from_secs(5);

fn test_config() -> IngestConfig {
    IngestConfig {
        channel: CHANNEL.to_string(),
        persist_timeout: Duration::from_secs(1),
        max_in_flight: 4,
        backoff_base: Duration::from_millis(10),
        backoff_max: Duration::from_millis(50),
        ..IngestConfig::default()
    }
}

fn order_payload(order_uid: &str) -> Vec<u8> {
    let mut value: serde_json::Value = serde_json::from_slice(MODEL).unwrap();
    value["order_uid"] = serde_json::json!(order_uid);
    value["payment"]["transaction"] = serde_json::json!(order_uid);
    serde_json::to_vec(&value).unwrap()
}

struct Harness {
    bus: InMemoryBus,
    store: InMemoryOrderStore,
    shutdown: CancellationToken,
    handle: JoinHandle<IngestStats>,
}

impl Harness {
    async fn start(config: IngestConfig, bus: InMemoryBus, store: InMemoryOrderStore) -> Self {
        let shutdown = CancellationToken::new();
        let controller = IngestionController::new(store.clone(), &config, shutdown.clone());
        let handle = controller.spawn(&bus, &config).await.unwrap();
        Self {
            bus,
            store,
            shutdown,
            handle,
        }
    }

    async fn with_store(store: InMemoryOrderStore) -> Self {
        Self::start(test_config(), InMemoryBus::new(), store).await
    }

    async fn publish(&self, payload: Vec<u8>) {
        self.bus.publish(CHANNEL, payload).await.unwrap();
    }

    async fn wait_for_orders(&self, expected: usize) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while self.store.order_count().await != expected {
            assert!(Instant::now() < deadline, "expected {expected} stored orders");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_for_attempts(&self, expected: u64) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while self.store.persist_attempts().await < expected {
            assert!(Instant::now() < deadline, "expected {expected} persist attempts");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_until_settled(&self) {
        let deadline = Instant::now() + WAIT_LIMIT;
        while self.bus.outstanding(CHANNEL).await != 0 {
            assert!(Instant::now() < deadline, "messages still outstanding");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn stop(self) -> IngestStats {
        self.shutdown.cancel();
        self.handle.await.unwrap()
    }
}

#[tokio::test]
async fn test_canonical_order_is_persisted_and_acked() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    harness.publish(MODEL.to_vec()).await;
    harness.wait_for_orders(1).await;
    harness.wait_until_settled().await;

    let stored = harness
        .store
        .load(&OrderUid::new("b563feb7b2b84b6test"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.items.len(), 1);
    assert_eq!(stored.payment.amount, 1817);

    let stats = harness.stop().await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.total(), 1);
}

#[tokio::test]
async fn test_duplicate_delivery_stores_exactly_once() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    harness.publish(MODEL.to_vec()).await;
    harness.publish(MODEL.to_vec()).await;
    harness.wait_until_settled().await;

    assert_eq!(harness.store.order_count().await, 1);
    let counts = harness
        .store
        .row_counts(&OrderUid::new("b563feb7b2b84b6test"))
        .await
        .unwrap();
    assert_eq!(counts.items, 1);

    let stats = harness.stop().await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.duplicate, 1);
}

#[tokio::test]
async fn test_repeated_deliveries_are_idempotent() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    for _ in 0..20 {
        harness.publish(MODEL.to_vec()).await;
    }
    harness.wait_until_settled().await;

    assert_eq!(harness.store.order_count().await, 1);
    let stats = harness.stop().await;
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.duplicate, 19);
}

#[tokio::test]
async fn test_malformed_payload_is_acked_and_dropped() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    harness.publish(b"this is not json".to_vec()).await;
    harness.wait_until_settled().await;

    assert_eq!(harness.store.persist_attempts().await, 0);
    assert_eq!(harness.store.order_count().await, 0);
    let stats = harness.stop().await;
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_order_without_items_is_rejected() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;
    let mut value: serde_json::Value = serde_json::from_slice(MODEL).unwrap();
    value.as_object_mut().unwrap().remove("items");

    harness.publish(serde_json::to_vec(&value).unwrap()).await;
    harness.wait_until_settled().await;

    assert_eq!(harness.store.order_count().await, 0);
    let stats = harness.stop().await;
    assert_eq!(stats.rejected, 1);
}

#[tokio::test]
async fn test_rejected_message_does_not_block_later_orders() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    harness.publish(b"{\"order_uid\":".to_vec()).await;
    harness.publish(order_payload("after-garbage")).await;
    harness.wait_for_orders(1).await;
    harness.wait_until_settled().await;

    assert!(
        harness
            .store
            .load(&OrderUid::new("after-garbage"))
            .await
            .unwrap()
            .is_some()
    );
    harness.stop().await;
}

#[tokio::test]
async fn test_storage_outage_redelivers_until_recovery() {
    let store = InMemoryOrderStore::new();
    store.fail_next_persists(3).await;
    let harness = Harness::with_store(store).await;

    harness.publish(MODEL.to_vec()).await;
    harness.wait_for_orders(1).await;
    harness.wait_until_settled().await;

    assert_eq!(harness.store.persist_attempts().await, 4);
    let stats = harness.stop().await;
    assert_eq!(stats.redelivered, 3);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test]
async fn test_outage_leaves_message_outstanding_and_store_empty() {
    let store = InMemoryOrderStore::new();
    store.set_fail_on_persist(true).await;
    let harness = Harness::with_store(store).await;

    harness.publish(MODEL.to_vec()).await;
    harness.wait_for_attempts(3).await;

    assert_eq!(harness.store.order_count().await, 0);
    assert_eq!(harness.bus.outstanding(CHANNEL).await, 1);

    harness.store.set_fail_on_persist(false).await;
    harness.wait_for_orders(1).await;
    harness.wait_until_settled().await;

    let stats = harness.stop().await;
    assert!(stats.redelivered >= 3);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_failures_are_retried_at_backoff_pace() {
    let store = InMemoryOrderStore::new();
    store.set_fail_on_persist(true).await;
    let config = IngestConfig {
        backoff_base: Duration::from_millis(100),
        backoff_max: Duration::from_secs(10),
        ..test_config()
    };
    let harness = Harness::start(config, InMemoryBus::new(), store).await;

    harness.publish(MODEL.to_vec()).await;
    // Retries are due at 0, 100, 300, 700 and 1500 ms of virtual time.
    tokio::time::sleep(Duration::from_millis(1400)).await;

    let attempts = harness.store.persist_attempts().await;
    assert!(
        (3..=5).contains(&attempts),
        "expected paced retries, got {attempts} attempts"
    );
    assert_eq!(harness.bus.outstanding(CHANNEL).await, 1);

    let store = harness.store.clone();
    let stats = harness.stop().await;
    assert_eq!(stats.persisted, 0);
    assert_eq!(stats.redelivered, store.persist_attempts().await);
}

#[tokio::test]
async fn test_persist_timeout_leads_to_redelivery() {
    let store = InMemoryOrderStore::new();
    store.set_persist_delay(Some(Duration::from_secs(2))).await;
    let config = IngestConfig {
        persist_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let harness = Harness::start(config, InMemoryBus::new(), store).await;

    harness.publish(MODEL.to_vec()).await;
    harness.wait_for_attempts(2).await;
    assert_eq!(harness.store.order_count().await, 0);

    harness.store.set_persist_delay(None).await;
    harness.wait_for_orders(1).await;
    harness.wait_until_settled().await;

    let stats = harness.stop().await;
    assert!(stats.redelivered >= 1);
    assert_eq!(stats.persisted, 1);
}

#[tokio::test]
async fn test_distinct_orders_are_all_persisted() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    for i in 0..10 {
        harness.publish(order_payload(&format!("order-{i}"))).await;
    }
    harness.wait_for_orders(10).await;
    harness.wait_until_settled().await;

    let stats = harness.stop().await;
    assert_eq!(stats.persisted, 10);
}

#[tokio::test]
async fn test_shutdown_drains_in_flight_messages() {
    let store = InMemoryOrderStore::new();
    store.set_persist_delay(Some(Duration::from_millis(200))).await;
    let harness = Harness::with_store(store).await;

    harness.publish(MODEL.to_vec()).await;
    harness.wait_for_attempts(1).await;

    let bus = harness.bus.clone();
    let store = harness.store.clone();
    let stats = harness.stop().await;

    assert_eq!(stats.persisted, 1);
    assert_eq!(store.order_count().await, 1);
    assert_eq!(bus.outstanding(CHANNEL).await, 0);
}

#[tokio::test]
async fn test_shutdown_returns_undispatched_messages_to_channel() {
    let store = InMemoryOrderStore::new();
    store.set_persist_delay(Some(Duration::from_millis(200))).await;
    let config = IngestConfig {
        max_in_flight: 1,
        ..test_config()
    };
    let bus = InMemoryBus::new();
    let harness = Harness::start(config.clone(), bus.clone(), store.clone()).await;

    for i in 0..3 {
        harness.publish(order_payload(&format!("queued-{i}"))).await;
    }
    harness.wait_for_attempts(1).await;
    let stats = harness.stop().await;

    assert_eq!(stats.persisted, 1);
    assert_eq!(store.order_count().await, 1);
    assert_eq!(bus.outstanding(CHANNEL).await, 2);

    // A fresh controller picks up where the first one stopped.
    store.set_persist_delay(None).await;
    let harness = Harness::start(config, bus, store).await;
    harness.wait_for_orders(3).await;
    harness.wait_until_settled().await;

    let stats = harness.stop().await;
    assert_eq!(stats.persisted, 2);
}

#[tokio::test]
async fn test_second_controller_on_same_channel_is_rejected() {
    let harness = Harness::with_store(InMemoryOrderStore::new()).await;

    let config = test_config();
    let second = IngestionController::new(
        InMemoryOrderStore::new(),
        &config,
        CancellationToken::new(),
    );
    let result = second.spawn(&harness.bus, &config).await;

    assert!(matches!(
        result,
        Err(IngestError::Bus(BusError::AlreadySubscribed(_)))
    ));
    harness.stop().await;
}
