//! Forward-path orchestration.

use std::sync::Arc;

use common::{Context, WorkflowId};
use event_bus::EventBus;
use serde_json::Value;
use state_store::StateStore;

use crate::error::{EngineError, Result};
use crate::instance::{StepStatus, WorkflowInstance, WorkflowStatus};
use crate::persistence::{StatusUpdate, WorkflowStore};
use crate::registry::WorkflowRegistry;
use crate::topics::{
    self, CompensatePayload, ExecuteStepPayload, StepCompletedPayload, StepDispatchPayload,
    StepFailedPayload, WorkflowCompletedPayload, WorkflowFailedPayload,
};

/// Request to start a workflow instance.
#[derive(Debug, Clone)]
pub struct StartWorkflow {
    pub workflow_type: String,
    pub input: Context,
    /// Caller-provided id; generated when absent. Starting twice with the
    /// same id observes the existing instance.
    pub workflow_id: Option<WorkflowId>,
}

/// Orchestrates forward progress of workflow instances.
///
/// Every decision is derived from the registry plus persisted state; no
/// workflow objects are cached between events, which is what makes crash
/// recovery trivial.
pub struct Engine<S> {
    registry: Arc<WorkflowRegistry>,
    store: WorkflowStore<S>,
    bus: Arc<dyn EventBus>,
}

impl<S: StateStore> Engine<S> {
    /// Creates an engine over the given registry, state store, and bus.
    pub fn new(registry: Arc<WorkflowRegistry>, store: S, bus: Arc<dyn EventBus>) -> Self {
        Self {
            registry,
            store: WorkflowStore::new(store),
            bus,
        }
    }

    /// Gives access to the persistence operations, mainly for queries.
    pub fn store(&self) -> &WorkflowStore<S> {
        &self.store
    }

    /// Starts a workflow instance and dispatches its first step.
    ///
    /// Validates the type against the registry, creates the instance in
    /// status `running`, and emits `execute-step` for the first step.
    /// Idempotent on the workflow id: if an instance already exists, it is
    /// returned unchanged and nothing is emitted.
    #[tracing::instrument(skip(self, request), fields(workflow_type = %request.workflow_type))]
    pub async fn start_workflow(&self, request: StartWorkflow) -> Result<WorkflowInstance> {
        let definition = self
            .registry
            .get(&request.workflow_type)
            .ok_or_else(|| EngineError::UnknownWorkflowType(request.workflow_type.clone()))?;
        let first_step = definition
            .first_step()
            .ok_or_else(|| EngineError::EmptyWorkflowDefinition(request.workflow_type.clone()))?;

        let id = request.workflow_id.unwrap_or_else(WorkflowId::generate);
        let (instance, is_new) = self
            .store
            .create_workflow(&id, &request.workflow_type, &first_step.name, request.input)
            .await?;

        if !is_new {
            tracing::info!(workflow_id = %id, "workflow already exists, returning existing instance");
            return Ok(instance);
        }

        metrics::counter!("workflow_started_total").increment(1);
        tracing::info!(workflow_id = %id, first_step = %first_step.name, "workflow started");

        self.bus
            .emit(topics::event(
                topics::EXECUTE_STEP,
                &ExecuteStepPayload {
                    workflow_id: id,
                    step_name: first_step.name.clone(),
                },
            )?)
            .await?;

        Ok(instance)
    }

    /// Dispatches one step to its forward handler.
    ///
    /// On replay (an execution record already exists) the stored outcome is
    /// re-emitted instead of re-running a finished step; a record still in
    /// `running` is re-dispatched, accepting possible duplicate invocation
    /// of the side-effecting handler.
    #[tracing::instrument(skip(self), fields(workflow_id = %payload.workflow_id, step_name = %payload.step_name))]
    pub async fn execute_step(&self, payload: ExecuteStepPayload) -> Result<()> {
        let Some(instance) = self.store.get_workflow(&payload.workflow_id).await? else {
            tracing::error!("execute-step for unknown workflow");
            return Ok(());
        };

        let Some(step) = self
            .registry
            .get_step(&instance.workflow_type, &payload.step_name)
        else {
            tracing::error!(workflow_type = %instance.workflow_type, "execute-step for unknown step");
            return Ok(());
        };

        let (record, is_new) = self
            .store
            .record_step_start(
                &payload.workflow_id,
                &payload.step_name,
                instance.context.clone(),
                None,
            )
            .await?;

        if !is_new {
            match record.status {
                StepStatus::Completed => {
                    // Replay stored progress without re-running the side effect.
                    self.bus
                        .emit(topics::event(
                            topics::STEP_COMPLETED,
                            &StepCompletedPayload {
                                workflow_id: payload.workflow_id,
                                step_name: payload.step_name,
                                output: record.output.unwrap_or_default(),
                            },
                        )?)
                        .await?;
                    return Ok(());
                }
                StepStatus::Failed => {
                    self.bus
                        .emit(topics::event(
                            topics::STEP_FAILED,
                            &StepFailedPayload {
                                workflow_id: payload.workflow_id,
                                step_name: payload.step_name,
                                error: record.error.unwrap_or_else(|| {
                                    crate::instance::StepError::message("step failed")
                                }),
                            },
                        )?)
                        .await?;
                    return Ok(());
                }
                _ => {
                    tracing::warn!(status = %record.status, "step already started, re-dispatching");
                }
            }
        }

        self.bus
            .emit(topics::event(
                &step.topic,
                &StepDispatchPayload {
                    workflow_id: payload.workflow_id,
                    step_name: payload.step_name,
                    context: instance.context,
                },
            )?)
            .await?;
        Ok(())
    }

    /// Applies a step completion: records it, registers the compensation,
    /// merges the output, and either finishes the workflow or advances to
    /// the next step.
    #[tracing::instrument(skip(self, payload), fields(workflow_id = %payload.workflow_id, step_name = %payload.step_name))]
    pub async fn handle_step_completed(&self, payload: StepCompletedPayload) -> Result<()> {
        let Some((record, applied)) = self
            .store
            .record_step_complete(
                &payload.workflow_id,
                &payload.step_name,
                payload.output.clone(),
            )
            .await?
        else {
            tracing::error!("step-completed for unknown step record");
            return Ok(());
        };
        if !applied && record.status != StepStatus::Completed {
            // Conflicting duplicate: the record's outcome stands.
            tracing::warn!(status = %record.status, "step-completed conflicts with terminal step record");
            return Ok(());
        }
        // On a duplicate the stored output is the outcome of record; keep
        // driving with it so a crash between persist and emit still recovers.
        let output = if applied {
            payload.output
        } else {
            tracing::warn!("duplicate step-completed, replaying stored outcome");
            record.output.unwrap_or_default()
        };

        let Some(instance) = self.store.get_workflow(&payload.workflow_id).await? else {
            tracing::error!("step-completed for unknown workflow");
            return Ok(());
        };

        if let Some(step) = self
            .registry
            .get_step(&instance.workflow_type, &payload.step_name)
            && let Some(compensation_name) = &step.compensation_name
        {
            let index = self
                .registry
                .step_index(&instance.workflow_type, &payload.step_name)
                .unwrap_or(0);
            self.store
                .register_compensation(
                    &payload.workflow_id,
                    &payload.step_name,
                    compensation_name,
                    index,
                )
                .await?;
        }

        if self
            .registry
            .is_last_step(&instance.workflow_type, &payload.step_name)
        {
            self.store
                .update_workflow_status(
                    &payload.workflow_id,
                    WorkflowStatus::Completed,
                    StatusUpdate {
                        context: Some(output),
                        ..Default::default()
                    },
                )
                .await?;

            metrics::counter!("workflow_completed_total").increment(1);
            tracing::info!("workflow completed");

            self.bus
                .emit(topics::event(
                    topics::WORKFLOW_COMPLETED,
                    &WorkflowCompletedPayload {
                        workflow_id: payload.workflow_id,
                    },
                )?)
                .await?;
            return Ok(());
        }

        let Some(next) = self
            .registry
            .next_step(&instance.workflow_type, &payload.step_name)
        else {
            tracing::error!("no next step after non-final step");
            return Ok(());
        };

        self.store
            .advance_to_step(&payload.workflow_id, &next.name, Some(&output))
            .await?;

        self.bus
            .emit(topics::event(
                topics::EXECUTE_STEP,
                &ExecuteStepPayload {
                    workflow_id: payload.workflow_id,
                    step_name: next.name,
                },
            )?)
            .await?;
        Ok(())
    }

    /// Applies a step failure: records it, fails the workflow, and hands
    /// off to the compensator.
    #[tracing::instrument(skip(self, payload), fields(workflow_id = %payload.workflow_id, step_name = %payload.step_name))]
    pub async fn handle_step_failed(&self, payload: StepFailedPayload) -> Result<()> {
        let Some((record, applied)) = self
            .store
            .record_step_failure(
                &payload.workflow_id,
                &payload.step_name,
                payload.error.clone(),
            )
            .await?
        else {
            tracing::error!("step-failed for unknown step record");
            return Ok(());
        };
        if !applied && record.status != StepStatus::Failed {
            tracing::warn!(status = %record.status, "step-failed conflicts with terminal step record");
            return Ok(());
        }
        let error_message = if applied {
            payload.error.message
        } else {
            // Re-drive the failed → compensate handoff; the status guards
            // make the repeated transitions no-ops.
            tracing::warn!("duplicate step-failed, re-driving compensation handoff");
            record
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "step failed".to_string())
        };

        self.store
            .update_workflow_status(
                &payload.workflow_id,
                WorkflowStatus::Failed,
                StatusUpdate {
                    failed_step: Some(payload.step_name.clone()),
                    error: Some(error_message.clone()),
                    ..Default::default()
                },
            )
            .await?;

        metrics::counter!("workflow_failed_total").increment(1);
        tracing::warn!(error = %error_message, "workflow failed, starting compensation");

        self.bus
            .emit(topics::event(
                topics::WORKFLOW_FAILED,
                &WorkflowFailedPayload {
                    workflow_id: payload.workflow_id.clone(),
                    failed_step: payload.step_name,
                    error: error_message,
                },
            )?)
            .await?;
        self.bus
            .emit(topics::event(
                topics::COMPENSATE,
                &CompensatePayload {
                    workflow_id: payload.workflow_id,
                },
            )?)
            .await?;
        Ok(())
    }

    /// Pauses a running workflow until an external signal resumes it.
    #[tracing::instrument(skip(self))]
    pub async fn pause_workflow(
        &self,
        workflow_id: &WorkflowId,
        waiting_for: Option<String>,
    ) -> Result<()> {
        let Some(instance) = self.store.get_workflow(workflow_id).await? else {
            tracing::error!("pause for unknown workflow");
            return Ok(());
        };
        if instance.status != WorkflowStatus::Running {
            tracing::warn!(status = %instance.status, "pause ignored on non-running workflow");
            return Ok(());
        }

        let context = waiting_for.map(|w| {
            let mut delta = Context::new();
            delta.insert("waitingFor".to_string(), Value::String(w));
            delta
        });

        self.store
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Waiting,
                StatusUpdate {
                    context,
                    ..Default::default()
                },
            )
            .await?;
        tracing::info!("workflow paused");
        Ok(())
    }

    /// Resumes a waiting workflow with an external signal, merging the
    /// signal name and payload into the context and re-dispatching the
    /// current step. A no-op with a warning from any other status.
    #[tracing::instrument(skip(self, payload))]
    pub async fn resume_workflow(
        &self,
        workflow_id: &WorkflowId,
        signal: String,
        payload: Option<Value>,
    ) -> Result<()> {
        let Some(instance) = self.store.get_workflow(workflow_id).await? else {
            tracing::error!("resume for unknown workflow");
            return Ok(());
        };
        if instance.status != WorkflowStatus::Waiting {
            tracing::warn!(status = %instance.status, "resume ignored on non-waiting workflow");
            return Ok(());
        }

        let mut delta = Context::new();
        delta.insert("signal".to_string(), Value::String(signal));
        match payload {
            Some(Value::Object(fields)) => {
                for (key, value) in fields {
                    delta.insert(key, value);
                }
            }
            Some(other) => {
                delta.insert("signalPayload".to_string(), other);
            }
            None => {}
        }

        let updated = self
            .store
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Running,
                StatusUpdate {
                    context: Some(delta),
                    ..Default::default()
                },
            )
            .await?;

        let Some(current_step) = updated.and_then(|i| i.current_step) else {
            tracing::error!("waiting workflow has no current step");
            return Ok(());
        };

        tracing::info!(step = %current_step, "workflow resumed");
        self.bus
            .emit(topics::event(
                topics::EXECUTE_STEP,
                &ExecuteStepPayload {
                    workflow_id: workflow_id.clone(),
                    step_name: current_step,
                },
            )?)
            .await?;
        Ok(())
    }
}
