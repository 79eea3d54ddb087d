//! Persistent workflow entity families.

use chrono::{DateTime, Utc};
use common::{Context, WorkflowId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a workflow instance.
///
/// Status transitions:
/// ```text
/// running ──┬──► waiting ──► running
///           ├──► completed
///           └──► failed ──► compensating ──► compensated
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    /// Forward steps are being executed.
    Running,
    /// Paused until an external signal arrives.
    Waiting,
    /// A step failed; compensation has not started yet.
    Failed,
    /// All steps completed successfully (terminal).
    Completed,
    /// Compensations are being executed in reverse order.
    Compensating,
    /// The compensation chain finished (terminal).
    Compensated,
}

impl WorkflowStatus {
    /// Returns true for fully terminal statuses.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowStatus::Completed | WorkflowStatus::Compensated)
    }

    /// Returns true if the transition `self → next` is on the allowed graph.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Running, Running)
                | (Running, Waiting)
                | (Waiting, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Compensating)
                | (Compensating, Compensated)
        )
    }

    /// Returns true if reaching this status clears `current_step`.
    pub fn clears_current_step(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Compensated
        )
    }

    /// Returns the status name as stored on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Running => "running",
            WorkflowStatus::Waiting => "waiting",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Compensating => "compensating",
            WorkflowStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A persisted workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: WorkflowId,
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub status: WorkflowStatus,
    /// Name of the step currently being driven; None once terminal.
    pub current_step: Option<String>,
    /// Opaque string-keyed bag shared across steps.
    pub context: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a step execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Compensated,
}

impl StepStatus {
    /// Terminal step statuses are never demoted or overwritten.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepStatus::Completed
                | StepStatus::Failed
                | StepStatus::Skipped
                | StepStatus::Compensated
        )
    }

    /// Returns the status name as stored on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
            StepStatus::Compensated => "compensated",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Business-level error reported by a step handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl StepError {
    /// Creates an error carrying only a message.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            stack: None,
        }
    }

    /// Creates an error carrying a message and a machine-readable code.
    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
            stack: None,
        }
    }
}

/// Runtime record of one step on one workflow instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    pub status: StepStatus,
    /// Context snapshot at dispatch time.
    pub input: Context,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Context>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub attempt: u32,
}

/// Outcome of an executed compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompensationResult {
    Success,
    Failed,
}

/// Record that a compensable step completed and awaits (or finished)
/// rollback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationRecord {
    pub workflow_id: WorkflowId,
    pub step_name: String,
    /// Handler dispatch key.
    pub compensation_name: String,
    /// Position of the step in the workflow definition; deterministic
    /// tie-break for same-millisecond registrations.
    pub step_index: usize,
    pub registered_at: DateTime<Utc>,
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CompensationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
