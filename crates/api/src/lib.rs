//! HTTP API server with observability for open tabs.
//!
//! Provides company-scoped REST endpoints for building, dividing, settling
//! and closing open tabs, with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod envelope;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use document_store::DocumentStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use routes::open_tabs::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: DocumentStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::open_tabs as tabs;

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/open-tabs", get(tabs::list::<S>).post(tabs::create::<S>))
        .route("/open-tabs/{id}", get(tabs::get::<S>))
        .route("/open-tabs/{id}/products", post(tabs::add_product::<S>))
        .route(
            "/open-tabs/{id}/products/{index}",
            delete(tabs::remove_product::<S>).put(tabs::update_product_units::<S>),
        )
        .route("/open-tabs/{id}/divide-equal", post(tabs::divide_equal::<S>))
        .route(
            "/open-tabs/{id}/divide-products",
            post(tabs::divide_by_products::<S>),
        )
        .route(
            "/open-tabs/{id}/participants/{pid}/products",
            post(tabs::add_participant_product::<S>),
        )
        .route(
            "/open-tabs/{id}/participants/{pid}/products/{index}",
            delete(tabs::remove_participant_product::<S>),
        )
        .route(
            "/open-tabs/{id}/participants/{pid}/payments",
            post(tabs::register_payment::<S>),
        )
        .route("/open-tabs/{id}/transfer", post(tabs::transfer::<S>))
        .route("/open-tabs/{id}/close", post(tabs::close::<S>))
        .route("/open-tabs/{id}/cancel", post(tabs::cancel::<S>))
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

/// Creates the application state over a document store.
pub fn create_state<S: DocumentStore + Clone + 'static>(store: S) -> Arc<AppState<S>> {
    Arc::new(AppState::new(store))
}
