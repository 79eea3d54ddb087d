//! Reserved event topics and their payload shapes.

use common::{Context, WorkflowId};
use event_bus::EventEnvelope;
use serde::{Deserialize, Serialize};

use crate::instance::StepError;

/// Engine: drive one step of a workflow.
pub const EXECUTE_STEP: &str = "flowforge.execute-step";
/// Engine: a forward step handler reported success.
pub const STEP_COMPLETED: &str = "flowforge.step-completed";
/// Engine: a forward step handler reported failure.
pub const STEP_FAILED: &str = "flowforge.step-failed";
/// Engine → compensator: begin the reverse path.
pub const COMPENSATE: &str = "flowforge.compensate";
/// Engine: the last step of a workflow completed.
pub const WORKFLOW_COMPLETED: &str = "flowforge.workflow-completed";
/// Engine: a workflow transitioned to failed.
pub const WORKFLOW_FAILED: &str = "flowforge.workflow-failed";
/// Compensator: drive one compensation.
pub const EXECUTE_COMPENSATION: &str = "flowforge.execute-compensation";
/// Compensator: a compensation handler reported its outcome.
pub const COMPENSATION_COMPLETED: &str = "flowforge.compensation-completed";
/// Compensator: the reverse path finished.
pub const COMPENSATION_FINISHED: &str = "flowforge.compensation-finished";

/// Dispatch topic for a compensation handler.
pub fn compensation_topic(compensation_name: &str) -> String {
    format!("compensate.{compensation_name}")
}

/// Builds an envelope for a serializable payload.
pub fn event<T: Serialize>(
    topic: impl Into<String>,
    payload: &T,
) -> serde_json::Result<EventEnvelope> {
    Ok(EventEnvelope::new(topic, serde_json::to_value(payload)?))
}

/// Payload of [`EXECUTE_STEP`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteStepPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
}

/// Payload emitted on a step definition's forward topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDispatchPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    /// Workflow context at dispatch time.
    pub context: Context,
}

/// Payload of [`STEP_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompletedPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    /// Output merged into the workflow context.
    #[serde(default)]
    pub output: Context,
}

/// Payload of [`STEP_FAILED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepFailedPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub error: StepError,
}

/// Payload of [`COMPENSATE`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensatePayload {
    pub workflow_id: WorkflowId,
}

/// Payload of [`WORKFLOW_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowCompletedPayload {
    pub workflow_id: WorkflowId,
}

/// Payload of [`WORKFLOW_FAILED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowFailedPayload {
    pub workflow_id: WorkflowId,
    pub failed_step: String,
    pub error: String,
}

/// Payload of [`EXECUTE_COMPENSATION`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteCompensationPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub compensation_name: String,
}

/// Payload emitted on `compensate.<compensationName>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationDispatchPayload {
    pub workflow_id: WorkflowId,
    /// Step whose side effect is being undone.
    pub original_step: String,
    /// Handler dispatch key.
    pub compensation_step: String,
    pub context: Context,
    /// Stored output of the original step; most rollback handlers need the
    /// identifiers it carries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_output: Option<Context>,
}

/// Payload of [`COMPENSATION_COMPLETED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationCompletedPayload {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of [`COMPENSATION_FINISHED`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationFinishedPayload {
    pub workflow_id: WorkflowId,
}
