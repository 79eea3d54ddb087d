//! Static workflow type definitions.

use serde::{Deserialize, Serialize};

/// Static description of one step in a workflow type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    /// Step name, unique within the workflow type.
    pub name: String,
    /// Topic the step's forward handler subscribes to.
    pub topic: String,
    /// Dispatch key for the rollback handler. Absent when the step has no
    /// side effect to undo.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation_name: Option<String>,
}

impl StepDefinition {
    /// Creates a step definition without a compensation.
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            compensation_name: None,
        }
    }

    /// Attaches a compensation handler key to the step.
    pub fn with_compensation(mut self, compensation_name: impl Into<String>) -> Self {
        self.compensation_name = Some(compensation_name.into());
        self
    }

    /// Returns true if the step registers a compensation on completion.
    pub fn is_compensable(&self) -> bool {
        self.compensation_name.is_some()
    }
}

/// An ordered sequence of step definitions under a unique type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique workflow type identifier.
    #[serde(rename = "type")]
    pub workflow_type: String,
    /// Steps in execution order.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Creates a workflow definition.
    pub fn new(workflow_type: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            steps,
        }
    }

    /// Looks up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns the position of a step within the definition.
    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Returns the first step, if any.
    pub fn first_step(&self) -> Option<&StepDefinition> {
        self.steps.first()
    }

    /// Returns the step after `name`, or None if `name` is last or unknown.
    pub fn next_step(&self, name: &str) -> Option<&StepDefinition> {
        self.step_index(name).and_then(|i| self.steps.get(i + 1))
    }

    /// Returns true if `name` is the final step of the definition.
    pub fn is_last_step(&self, name: &str) -> bool {
        self.step_index(name)
            .is_some_and(|i| i + 1 == self.steps.len())
    }
}
