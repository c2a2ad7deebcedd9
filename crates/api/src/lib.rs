//! HTTP host for the bookshop cart engine.
//!
//! Exposes cart reconciliation and checkout over REST, with structured
//! logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use cart_store::CartStore;
use metrics_exporter_prometheus::PrometheusHandle;
use reconciler::CartEngine;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::cart::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CartStore>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route(
            "/cart",
            get(routes::cart::get::<S>).post(routes::cart::update::<S>),
        )
        .route("/checkout", post(routes::cart::checkout::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wraps a store in an engine and the shared handler state.
pub fn create_state<S: CartStore>(store: S, backend: &'static str) -> Arc<AppState<S>> {
    Arc::new(AppState {
        engine: CartEngine::new(store),
        backend,
    })
}
