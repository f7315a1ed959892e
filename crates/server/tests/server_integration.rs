//! Integration tests for the HTTP surface of the ingestion service.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bus::{InMemoryBus, MessageBus};
use ingest::{IngestConfig, IngestionController};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderStore;
use server::AppState;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");
            server::routes::metrics::describe();
            handle
        })
        .clone()
}

fn setup(shutdown: CancellationToken) -> axum::Router {
    server::create_app(AppState::new(shutdown), get_metrics_handle())
}

async fn body_string(response: axum::response::Response) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup(CancellationToken::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["ingestion"], "running");
}

#[tokio::test]
async fn test_health_reports_shutdown() {
    let shutdown = CancellationToken::new();
    let app = setup(shutdown.clone());
    shutdown.cancel();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(json["status"], "shutting_down");
}

#[tokio::test]
async fn test_metrics_expose_ingestion_outcomes() {
    let metrics_handle = get_metrics_handle();
    let shutdown = CancellationToken::new();
    let store = InMemoryOrderStore::new();
    let bus = InMemoryBus::new();
    let config = IngestConfig {
        channel: "metrics-test".to_string(),
        ..IngestConfig::default()
    };

    let controller = IngestionController::new(store.clone(), &config, shutdown.clone());
    let ingestion = controller.spawn(&bus, &config).await.unwrap();
    bus.publish(
        "metrics-test",
        include_bytes!("../../../fixtures/model.json").to_vec(),
    )
    .await
    .unwrap();
    bus.publish("metrics-test", b"garbage".to_vec()).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while bus.outstanding("metrics-test").await != 0 {
        assert!(Instant::now() < deadline, "messages were not settled");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.cancel();
    ingestion.await.unwrap();

    let app = server::create_app(AppState::new(CancellationToken::new()), metrics_handle);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("ingest_messages_total"));
    assert!(body.contains("outcome=\"persisted\""));
    assert!(body.contains("outcome=\"rejected\""));
    assert!(body.contains("ingest_persist_duration_seconds"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = setup(CancellationToken::new());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
