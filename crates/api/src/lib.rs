//! Administrative HTTP surface of the saga orchestrator.
//!
//! Exposes step retries, completion-event ingress and read-only views of
//! the catalog, instances and their audit trail, with structured logging
//! (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post};
use messaging::Producer;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use workflow_store::WorkflowStore;

pub use config::{Config, LogFormat};
pub use routes::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, P>(state: Arc<AppState<S, P>>, metrics_handle: PrometheusHandle) -> Router
where
    S: WorkflowStore + 'static,
    P: Producer + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/events", post(routes::events::publish::<S, P>))
        .route("/retry", patch(routes::retry::retry_step::<S, P>))
        .route("/product-retry", patch(routes::retry::product_retry::<S, P>))
        .route("/workflows/{type}", get(routes::workflows::get::<S, P>))
        .route("/instances/{id}", get(routes::instances::get::<S, P>))
        .route("/instances/{id}/logs", get(routes::instances::logs::<S, P>))
        .route("/steps/stale", get(routes::steps::stale::<S, P>))
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
