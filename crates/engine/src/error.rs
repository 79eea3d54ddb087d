use thiserror::Error;

/// Errors that can occur during workflow orchestration.
///
/// Only registration-time errors surface to callers of `start_workflow`;
/// everything downstream of the first emit is recorded on the workflow
/// records and made visible through the history query instead.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested workflow type is not registered.
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// A workflow type was registered twice.
    #[error("Workflow type already registered: {0}")]
    DuplicateWorkflowType(String),

    /// A workflow definition has no steps.
    #[error("Workflow definition '{0}' has no steps")]
    EmptyWorkflowDefinition(String),

    /// A step name does not exist in the workflow definition.
    #[error("Unknown step '{step}' in workflow type '{workflow_type}'")]
    UnknownStep { workflow_type: String, step: String },

    /// State store error.
    #[error("State store error: {0}")]
    StateStore(#[from] state_store::StateStoreError),

    /// Event bus error.
    #[error("Event bus error: {0}")]
    Bus(#[from] event_bus::BusError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
