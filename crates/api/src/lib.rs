//! HTTP API for table sessions and bill settlement.
//!
//! REST endpoints drive the engine; a WebSocket stream and a cached kitchen
//! dashboard serve live viewers. Structured logging comes from tracing and
//! counters are exported to Prometheus.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod feed;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use engine::{Collaborators, Engine, EngineConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use session_store::Repository;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<R: Repository + 'static>(
    state: Arc<AppState<R>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::{bills, events, health, orders, restaurants, sessions};

    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(health::check::<R>))
        .route("/sessions", post(sessions::create::<R>))
        .route(
            "/sessions/{id}",
            get(sessions::get::<R>).put(sessions::update::<R>),
        )
        .route("/sessions/{id}/customers", post(sessions::add_customer::<R>))
        .route("/sessions/{id}/waiter", post(sessions::call_waiter::<R>))
        .route(
            "/sessions/{id}/orders",
            get(orders::list_for_session::<R>).post(orders::place::<R>),
        )
        .route(
            "/sessions/{id}/bills",
            get(bills::list_for_session::<R>).post(bills::generate::<R>),
        )
        .route("/orders/{id}", axum::routing::delete(orders::delete::<R>))
        .route("/orders/{id}/status", put(orders::update_status::<R>))
        .route("/orders/{id}/items", put(orders::replace_items::<R>))
        .route("/bills/{id}/pay", put(bills::pay::<R>))
        .route("/bills/{id}/cancel", put(bills::cancel::<R>))
        .route(
            "/restaurants/{id}/sessions",
            get(restaurants::list_sessions::<R>),
        )
        .route(
            "/restaurants/{id}/orders/active",
            get(restaurants::active_orders::<R>),
        )
        .route("/restaurants/{id}/events", get(events::subscribe::<R>))
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

/// Creates application state over `repo` and the given collaborators.
pub fn create_state<R: Repository + 'static>(
    repo: R,
    collaborators: Collaborators,
    config: EngineConfig,
) -> Arc<AppState<R>> {
    let engine = Engine::new(Arc::new(repo), collaborators, config);
    Arc::new(AppState::new(engine))
}

/// Creates application state with in-memory table, payment and menu services.
pub fn create_default_state<R: Repository + 'static>(
    repo: R,
    config: EngineConfig,
) -> Arc<AppState<R>> {
    create_state(repo, Collaborators::in_memory(), config)
}
