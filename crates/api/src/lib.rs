//! HTTP API server for the workflow orchestrator.
//!
//! Thin adapter over the engine: start a workflow, list instances, inspect
//! one instance's history, signal a waiting instance. Observability comes
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use engine::{Compensator, CompensatorEventHandler, Engine, EngineEventHandler, WorkflowRegistry};
use event_bus::{EventBus, InMemoryEventBus};
use metrics_exporter_prometheus::PrometheusHandle;
use order_workflow::services::{
    InMemoryInventoryService, InMemoryNotificationService, InMemoryPaymentService,
    InMemoryShipmentService,
};
use order_workflow::{OrderServices, RefundConfig};
use state_store::{InMemoryStateStore, StateStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use routes::workflows::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: StateStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/workflows/start", post(routes::workflows::start::<S>))
        .route("/workflows", get(routes::workflows::list::<S>))
        .route("/workflows/{id}", get(routes::workflows::get::<S>))
        .route(
            "/workflows/{id}/signal",
            post(routes::workflows::signal::<S>),
        )
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

/// Wires the registry, engine, compensator, and the order-workflow handlers
/// over the given state store.
///
/// Returns the application state and the bus; the caller decides whether to
/// spawn the bus worker (server) or pump it manually (tests).
pub fn create_state<S: StateStore + Clone + 'static>(
    store: S,
) -> (Arc<AppState<S>>, InMemoryEventBus) {
    let registry = Arc::new(WorkflowRegistry::new());
    registry
        .register(order_workflow::definition())
        .expect("order workflow registers once on an empty registry");

    let bus = InMemoryEventBus::new();
    let bus_arc: Arc<dyn EventBus> = Arc::new(bus.clone());

    let engine = Arc::new(Engine::new(registry, store.clone(), bus_arc.clone()));
    let compensator = Arc::new(Compensator::new(store.clone(), bus_arc.clone()));
    bus.subscribe(Arc::new(EngineEventHandler::new(engine.clone())));
    bus.subscribe(Arc::new(CompensatorEventHandler::new(compensator)));

    let services = OrderServices {
        payments: Arc::new(InMemoryPaymentService::new()),
        inventory: Arc::new(InMemoryInventoryService::new()),
        shipments: Arc::new(InMemoryShipmentService::new()),
        notifications: Arc::new(InMemoryNotificationService::new()),
    };
    order_workflow::register_handlers(
        bus_arc,
        &services,
        Arc::new(store),
        RefundConfig::default(),
    );

    (Arc::new(AppState { engine }), bus)
}

/// Creates the default application state over an in-memory store.
pub fn create_default_state() -> (Arc<AppState<InMemoryStateStore>>, InMemoryEventBus) {
    create_state(InMemoryStateStore::new())
}
