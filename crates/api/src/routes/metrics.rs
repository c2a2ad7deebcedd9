//! Prometheus metrics endpoint and metric descriptions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics::Unit;
use metrics_exporter_prometheus::PrometheusHandle;

/// Registers help text for the metrics the cart engine records.
///
/// Call once after the recorder is installed.
pub fn describe() {
    metrics::describe_counter!(
        "cart_reconciliations_total",
        "Cart reconciliation requests received"
    );
    metrics::describe_counter!(
        "cart_out_of_stock_total",
        "Reconciliations rejected because a book had no stock"
    );
    metrics::describe_counter!("cart_checkouts_total", "Carts checked out");
    metrics::describe_counter!(
        "cart_sweep_released_total",
        "Expired carts released by the sweeper"
    );
    metrics::describe_counter!(
        "cart_sweep_failures_total",
        "Expiration sweeps that rolled back"
    );
    metrics::describe_histogram!(
        "cart_reconcile_duration_seconds",
        Unit::Seconds,
        "Time spent reconciling a cart"
    );
}

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
