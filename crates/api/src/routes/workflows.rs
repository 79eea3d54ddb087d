//! Workflow start, list, inspect, and signal endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Context, WorkflowId};
use engine::{CompensationRecord, Engine, StartWorkflow, StepExecution, WorkflowInstance};
use serde::{Deserialize, Serialize};
use state_store::StateStore;

use crate::error::ApiError;

/// Shared application state accessible from all handlers.
pub struct AppState<S: StateStore> {
    pub engine: Arc<Engine<S>>,
}

// -- Request types --

#[derive(Deserialize)]
pub struct StartWorkflowRequest {
    #[serde(rename = "type")]
    pub workflow_type: String,
    #[serde(default)]
    pub input: Option<Context>,
    #[serde(default)]
    pub workflow_id: Option<String>,
}

#[derive(Deserialize)]
pub struct SignalRequest {
    pub signal: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowResponse {
    pub workflow_id: String,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub status: String,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<WorkflowInstance> for WorkflowSummary {
    fn from(instance: WorkflowInstance) -> Self {
        Self {
            id: instance.id.to_string(),
            workflow_type: instance.workflow_type,
            status: instance.status.to_string(),
            current_step: instance.current_step,
            failed_step: instance.failed_step,
            error: instance.error,
            created_at: instance.created_at,
            updated_at: instance.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct ListWorkflowsResponse {
    pub workflows: Vec<WorkflowSummary>,
    pub count: usize,
}

#[derive(Serialize)]
pub struct WorkflowDetailResponse {
    pub workflow: WorkflowInstance,
    pub steps: Vec<StepExecution>,
    pub compensations: Vec<CompensationRecord>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub workflow_id: String,
    pub signal: String,
    pub message: String,
}

// -- Handlers --

/// POST /workflows/start — start a new workflow instance.
#[tracing::instrument(skip(state, req), fields(workflow_type = %req.workflow_type))]
pub async fn start<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<StartWorkflowRequest>,
) -> Result<(StatusCode, Json<StartWorkflowResponse>), ApiError> {
    if req.workflow_type.trim().is_empty() {
        return Err(ApiError::BadRequest("type must not be empty".to_string()));
    }

    let instance = state
        .engine
        .start_workflow(StartWorkflow {
            workflow_type: req.workflow_type,
            input: req.input.unwrap_or_default(),
            workflow_id: req.workflow_id.map(WorkflowId::from_string),
        })
        .await?;

    let response = StartWorkflowResponse {
        workflow_id: instance.id.to_string(),
        workflow_type: instance.workflow_type,
        status: instance.status.to_string(),
        message: "workflow started".to_string(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /workflows — list workflow instances, newest first.
#[tracing::instrument(skip(state))]
pub async fn list<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<ListWorkflowsResponse>, ApiError> {
    let mut workflows = state.engine.store().list_workflows().await?;
    workflows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let workflows: Vec<WorkflowSummary> =
        workflows.into_iter().map(WorkflowSummary::from).collect();
    let count = workflows.len();
    Ok(Json(ListWorkflowsResponse { workflows, count }))
}

/// GET /workflows/:id — full history of one workflow instance.
#[tracing::instrument(skip(state))]
pub async fn get<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowDetailResponse>, ApiError> {
    let workflow_id = WorkflowId::from_string(&id);
    let history = state
        .engine
        .store()
        .get_workflow_history(&workflow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Workflow {id} not found")))?;

    Ok(Json(WorkflowDetailResponse {
        workflow: history.workflow,
        steps: history.steps,
        compensations: history.compensations,
    }))
}

/// POST /workflows/:id/signal — resume a waiting workflow.
#[tracing::instrument(skip(state, req), fields(signal = %req.signal))]
pub async fn signal<S: StateStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SignalRequest>,
) -> Result<(StatusCode, Json<SignalResponse>), ApiError> {
    let workflow_id = WorkflowId::from_string(&id);
    state
        .engine
        .store()
        .get_workflow(&workflow_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Workflow {id} not found")))?;

    state
        .engine
        .resume_workflow(&workflow_id, req.signal.clone(), req.payload)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SignalResponse {
            workflow_id: id,
            signal: req.signal,
            message: "signal delivered".to_string(),
        }),
    ))
}
