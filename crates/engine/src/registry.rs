//! Process-wide catalog of workflow types.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::definition::{StepDefinition, WorkflowDefinition};
use crate::error::{EngineError, Result};

/// Catalog mapping workflow types to their ordered step definitions.
///
/// Built explicitly at process start and treated as read-only afterward.
/// The interior lock serializes `register` relative to concurrent reads
/// during init; steady-state reads only ever contend with each other.
#[derive(Default)]
pub struct WorkflowRegistry {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl WorkflowRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a workflow definition.
    ///
    /// Fails with `DuplicateWorkflowType` if the type is already present
    /// and with `EmptyWorkflowDefinition` if the definition has no steps.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<()> {
        if definition.steps.is_empty() {
            return Err(EngineError::EmptyWorkflowDefinition(
                definition.workflow_type,
            ));
        }

        let mut definitions = self.definitions.write().unwrap();
        if definitions.contains_key(&definition.workflow_type) {
            return Err(EngineError::DuplicateWorkflowType(
                definition.workflow_type,
            ));
        }

        definitions.insert(definition.workflow_type.clone(), Arc::new(definition));
        Ok(())
    }

    /// Looks up a workflow definition by type.
    pub fn get(&self, workflow_type: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.read().unwrap().get(workflow_type).cloned()
    }

    /// Looks up a step definition by type and step name.
    pub fn get_step(&self, workflow_type: &str, name: &str) -> Option<StepDefinition> {
        self.get(workflow_type)?.step(name).cloned()
    }

    /// Returns the first step of a workflow type.
    pub fn first_step(&self, workflow_type: &str) -> Option<StepDefinition> {
        self.get(workflow_type)?.first_step().cloned()
    }

    /// Returns the step after `name`, or None if `name` is last or unknown.
    pub fn next_step(&self, workflow_type: &str, name: &str) -> Option<StepDefinition> {
        self.get(workflow_type)?.next_step(name).cloned()
    }

    /// Returns true if `name` is the final step of the workflow type.
    pub fn is_last_step(&self, workflow_type: &str, name: &str) -> bool {
        self.get(workflow_type)
            .is_some_and(|def| def.is_last_step(name))
    }

    /// Returns the position of `name` within the workflow type.
    pub fn step_index(&self, workflow_type: &str, name: &str) -> Option<usize> {
        self.get(workflow_type)?.step_index(name)
    }

    /// Returns, most recent first, the compensable steps up to and
    /// including `name`.
    ///
    /// Debugging aid: the compensator drives rollback from the persisted
    /// compensation records instead, since those reflect what actually
    /// executed.
    pub fn compensable_steps_up_to(
        &self,
        workflow_type: &str,
        name: &str,
    ) -> Vec<StepDefinition> {
        let Some(def) = self.get(workflow_type) else {
            return Vec::new();
        };
        let Some(index) = def.step_index(name) else {
            return Vec::new();
        };

        def.steps[..=index]
            .iter()
            .rev()
            .filter(|s| s.is_compensable())
            .cloned()
            .collect()
    }

    /// Returns the registered workflow type names.
    pub fn types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.definitions.read().unwrap().keys().cloned().collect();
        types.sort();
        types
    }
}
