//! Prometheus metrics endpoint.

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use ::metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for the ingestion metrics.
pub fn describe() {
    ::metrics::describe_counter!(
        "ingest_messages_total",
        "Delivered messages by outcome (persisted, duplicate, rejected, redeliver)"
    );
    ::metrics::describe_counter!(
        "ingest_amount_mismatch_total",
        "Orders whose payment amount disagrees with its breakdown"
    );
    ::metrics::describe_histogram!(
        "ingest_persist_duration_seconds",
        Unit::Seconds,
        "Duration of one persistence attempt"
    );
    ::metrics::describe_counter!(
        "order_store_persist_total",
        "Committed persist transactions by outcome"
    );
}

/// GET /metrics: Prometheus text exposition.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
