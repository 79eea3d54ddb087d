//! Health endpoint reporting orchestrator dependencies.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use common::WorkflowId;
use serde::Serialize;
use state_store::StateStore;

use crate::routes::workflows::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Reachability of the workflow state store.
    pub store: &'static str,
}

/// GET /health — liveness plus a state-store reachability probe.
///
/// The orchestrator cannot make progress without its store, so health
/// performs one point read against it instead of reporting process
/// liveness alone.
pub async fn check<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    // A read of an id that never exists still exercises the full store path.
    let probe = WorkflowId::from_string("health-probe");
    match state.engine.store().get_workflow(&probe).await {
        Ok(_) => Json(HealthResponse {
            status: "ok",
            store: "reachable",
        }),
        Err(err) => {
            tracing::error!(error = %err, "health probe failed against state store");
            Json(HealthResponse {
                status: "degraded",
                store: "unreachable",
            })
        }
    }
}
