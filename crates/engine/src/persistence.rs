//! Guarded persistence operations over the state store.
//!
//! Every operation reads the current record, applies a guard, and writes
//! the derived record. The store provides point reads/writes by
//! `(group, key)` and group scans; no multi-key transactions. Guards are
//! what keep replayed events after crash recovery harmless: idempotent
//! creates return the existing record, and terminal records are never
//! overwritten.

use chrono::Utc;
use common::{Context, WorkflowId, merge_context};
use serde::{Deserialize, Serialize};
use state_store::StateStore;

use crate::error::Result;
use crate::instance::{
    CompensationRecord, CompensationResult, StepError, StepExecution, StepStatus,
    WorkflowInstance, WorkflowStatus,
};

/// Group holding all workflow instances, keyed by workflow id.
pub const WORKFLOWS_GROUP: &str = "flowforge:workflows";

/// Group holding the step executions of one workflow, keyed by step name.
pub fn steps_group(workflow_id: &WorkflowId) -> String {
    format!("flowforge:steps:{workflow_id}")
}

/// Group holding the compensation records of one workflow, keyed by step name.
pub fn compensations_group(workflow_id: &WorkflowId) -> String {
    format!("flowforge:compensations:{workflow_id}")
}

/// Optional fields accompanying a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    /// Explicit new value for `current_step`. When absent and the new
    /// status clears the pointer, it is set to None; otherwise it is left
    /// unchanged.
    pub current_step: Option<String>,
    /// Context delta merged into the instance context.
    pub context: Option<Context>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
}

/// A workflow instance together with its step and compensation records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowHistory {
    pub workflow: WorkflowInstance,
    pub steps: Vec<StepExecution>,
    pub compensations: Vec<CompensationRecord>,
}

/// Idempotent, guarded CRUD over workflow instances, step executions, and
/// compensation records.
#[derive(Clone)]
pub struct WorkflowStore<S> {
    store: S,
}

impl<S: StateStore> WorkflowStore<S> {
    /// Creates a workflow store over the given state store.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    // -- Workflow instances --

    /// Creates a workflow instance in status `running`.
    ///
    /// Idempotent: if an instance already exists at `id`, returns it
    /// unchanged with `false`.
    pub async fn create_workflow(
        &self,
        id: &WorkflowId,
        workflow_type: &str,
        first_step: &str,
        context: Context,
    ) -> Result<(WorkflowInstance, bool)> {
        if let Some(existing) = self.get_workflow(id).await? {
            return Ok((existing, false));
        }

        let now = Utc::now();
        let instance = WorkflowInstance {
            id: id.clone(),
            workflow_type: workflow_type.to_string(),
            status: WorkflowStatus::Running,
            current_step: Some(first_step.to_string()),
            context,
            failed_step: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.put_workflow(&instance).await?;
        Ok((instance, true))
    }

    /// Loads a workflow instance.
    pub async fn get_workflow(&self, id: &WorkflowId) -> Result<Option<WorkflowInstance>> {
        let value = self.store.get(WORKFLOWS_GROUP, id.as_str()).await?;
        value
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    /// Returns every workflow instance in the store.
    pub async fn list_workflows(&self) -> Result<Vec<WorkflowInstance>> {
        let values = self.store.get_group(WORKFLOWS_GROUP).await?;
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect()
    }

    /// Applies a status transition with its optional fields.
    ///
    /// Transitions outside the allowed graph are rejected silently: the
    /// unchanged record is returned and a warning logged. Returns None when
    /// the instance does not exist.
    pub async fn update_workflow_status(
        &self,
        id: &WorkflowId,
        new_status: WorkflowStatus,
        update: StatusUpdate,
    ) -> Result<Option<WorkflowInstance>> {
        let Some(mut instance) = self.get_workflow(id).await? else {
            return Ok(None);
        };

        if !instance.status.can_transition_to(new_status) {
            tracing::warn!(
                workflow_id = %id,
                from = %instance.status,
                to = %new_status,
                "rejected workflow status transition"
            );
            return Ok(Some(instance));
        }

        if let Some(delta) = &update.context {
            merge_context(&mut instance.context, delta);
        }
        if let Some(step) = update.current_step {
            instance.current_step = Some(step);
        } else if new_status.clears_current_step() {
            instance.current_step = None;
        }
        if let Some(failed_step) = update.failed_step {
            instance.failed_step = Some(failed_step);
        }
        if let Some(error) = update.error {
            instance.error = Some(error);
        }
        instance.status = new_status;
        instance.updated_at = Utc::now();

        self.put_workflow(&instance).await?;
        Ok(Some(instance))
    }

    /// Merges a context delta into a non-terminal workflow.
    pub async fn update_workflow_context(
        &self,
        id: &WorkflowId,
        delta: &Context,
    ) -> Result<Option<WorkflowInstance>> {
        let Some(mut instance) = self.get_workflow(id).await? else {
            return Ok(None);
        };

        if instance.status.is_terminal() {
            tracing::warn!(
                workflow_id = %id,
                status = %instance.status,
                "ignored context update on terminal workflow"
            );
            return Ok(Some(instance));
        }

        merge_context(&mut instance.context, delta);
        instance.updated_at = Utc::now();
        self.put_workflow(&instance).await?;
        Ok(Some(instance))
    }

    /// Moves a running workflow to its next step, merging an optional
    /// context delta. Ignored with a warning unless the status is `running`.
    pub async fn advance_to_step(
        &self,
        id: &WorkflowId,
        next_step: &str,
        context_delta: Option<&Context>,
    ) -> Result<Option<WorkflowInstance>> {
        let Some(mut instance) = self.get_workflow(id).await? else {
            return Ok(None);
        };

        if instance.status != WorkflowStatus::Running {
            tracing::warn!(
                workflow_id = %id,
                status = %instance.status,
                next_step,
                "ignored advance on non-running workflow"
            );
            return Ok(Some(instance));
        }

        if let Some(delta) = context_delta {
            merge_context(&mut instance.context, delta);
        }
        instance.current_step = Some(next_step.to_string());
        instance.updated_at = Utc::now();
        self.put_workflow(&instance).await?;
        Ok(Some(instance))
    }

    async fn put_workflow(&self, instance: &WorkflowInstance) -> Result<()> {
        let value = serde_json::to_value(instance)?;
        self.store
            .set(WORKFLOWS_GROUP, instance.id.as_str(), value)
            .await?;
        Ok(())
    }

    // -- Step executions --

    /// Records the start of a step execution.
    ///
    /// Idempotent create: if the record already exists it is returned
    /// unchanged with `false`; otherwise a `running` record is inserted.
    pub async fn record_step_start(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        input: Context,
        attempt: Option<u32>,
    ) -> Result<(StepExecution, bool)> {
        if let Some(existing) = self.get_step(workflow_id, step_name).await? {
            return Ok((existing, false));
        }

        let record = StepExecution {
            workflow_id: workflow_id.clone(),
            step_name: step_name.to_string(),
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
            attempt: attempt.unwrap_or(1),
        };
        self.put_step(&record).await?;
        Ok((record, true))
    }

    /// Loads a step execution record.
    pub async fn get_step(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let value = self
            .store
            .get(&steps_group(workflow_id), step_name)
            .await?;
        value
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    /// Returns all step executions of a workflow, ordered by start time.
    pub async fn get_steps(&self, workflow_id: &WorkflowId) -> Result<Vec<StepExecution>> {
        let values = self.store.get_group(&steps_group(workflow_id)).await?;
        let mut steps: Vec<StepExecution> = values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect::<Result<_>>()?;
        steps.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(steps)
    }

    /// Transitions a step to `completed`.
    ///
    /// Terminal-overwrite protected: a record already in a terminal status
    /// is returned unchanged with `false`. Returns None when no record
    /// exists.
    pub async fn record_step_complete(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        output: Context,
    ) -> Result<Option<(StepExecution, bool)>> {
        let Some(mut record) = self.get_step(workflow_id, step_name).await? else {
            return Ok(None);
        };

        if record.status.is_terminal() {
            tracing::warn!(
                workflow_id = %workflow_id,
                step_name,
                status = %record.status,
                "ignored completion of terminal step"
            );
            return Ok(Some((record, false)));
        }

        record.status = StepStatus::Completed;
        record.output = Some(output);
        record.completed_at = Some(Utc::now());
        self.put_step(&record).await?;
        Ok(Some((record, true)))
    }

    /// Transitions a step to `failed`. Same guards as
    /// [`record_step_complete`](Self::record_step_complete).
    pub async fn record_step_failure(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        error: StepError,
    ) -> Result<Option<(StepExecution, bool)>> {
        let Some(mut record) = self.get_step(workflow_id, step_name).await? else {
            return Ok(None);
        };

        if record.status.is_terminal() {
            tracing::warn!(
                workflow_id = %workflow_id,
                step_name,
                status = %record.status,
                "ignored failure of terminal step"
            );
            return Ok(Some((record, false)));
        }

        record.status = StepStatus::Failed;
        record.error = Some(error);
        record.completed_at = Some(Utc::now());
        self.put_step(&record).await?;
        Ok(Some((record, true)))
    }

    /// Transitions a step to `compensated` after its rollback ran.
    ///
    /// The completed → compensated move is the one sanctioned transition
    /// out of a terminal step status. Idempotent on replay.
    pub async fn mark_step_compensated(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
    ) -> Result<Option<StepExecution>> {
        let Some(mut record) = self.get_step(workflow_id, step_name).await? else {
            return Ok(None);
        };

        if record.status == StepStatus::Compensated {
            return Ok(Some(record));
        }

        record.status = StepStatus::Compensated;
        record.completed_at = Some(Utc::now());
        self.put_step(&record).await?;
        Ok(Some(record))
    }

    async fn put_step(&self, record: &StepExecution) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store
            .set(&steps_group(&record.workflow_id), &record.step_name, value)
            .await?;
        Ok(())
    }

    // -- Compensation records --

    /// Registers a compensation for a completed compensable step.
    ///
    /// Idempotent create: an existing record is returned unchanged with
    /// `false`.
    pub async fn register_compensation(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        compensation_name: &str,
        step_index: usize,
    ) -> Result<(CompensationRecord, bool)> {
        if let Some(existing) = self.get_compensation(workflow_id, step_name).await? {
            return Ok((existing, false));
        }

        let record = CompensationRecord {
            workflow_id: workflow_id.clone(),
            step_name: step_name.to_string(),
            compensation_name: compensation_name.to_string(),
            step_index,
            registered_at: Utc::now(),
            executed: false,
            executed_at: None,
            result: None,
            error: None,
        };
        self.put_compensation(&record).await?;
        Ok((record, true))
    }

    /// Loads a compensation record.
    pub async fn get_compensation(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
    ) -> Result<Option<CompensationRecord>> {
        let value = self
            .store
            .get(&compensations_group(workflow_id), step_name)
            .await?;
        value
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .transpose()
    }

    /// Returns all compensation records of a workflow in registration order.
    pub async fn get_compensations(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<CompensationRecord>> {
        let values = self
            .store
            .get_group(&compensations_group(workflow_id))
            .await?;
        let mut records: Vec<CompensationRecord> = values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(Into::into))
            .collect::<Result<_>>()?;
        records.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then(a.step_index.cmp(&b.step_index))
        });
        Ok(records)
    }

    /// Returns the not-yet-executed compensations, most recently registered
    /// first. Same-timestamp ties break on step position so the LIFO order
    /// of the definition is preserved.
    pub async fn get_pending_compensations(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<CompensationRecord>> {
        let mut records = self.get_compensations(workflow_id).await?;
        records.retain(|r| !r.executed);
        records.reverse();
        Ok(records)
    }

    /// Marks a compensation as executed with its outcome.
    ///
    /// A record already marked executed is returned unchanged with `false`.
    /// Returns None when no record exists.
    pub async fn mark_compensation_executed(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        result: CompensationResult,
        error: Option<String>,
    ) -> Result<Option<(CompensationRecord, bool)>> {
        let Some(mut record) = self.get_compensation(workflow_id, step_name).await? else {
            return Ok(None);
        };

        if record.executed {
            tracing::warn!(
                workflow_id = %workflow_id,
                step_name,
                "ignored duplicate compensation execution"
            );
            return Ok(Some((record, false)));
        }

        record.executed = true;
        record.executed_at = Some(Utc::now());
        record.result = Some(result);
        record.error = error;
        self.put_compensation(&record).await?;
        Ok(Some((record, true)))
    }

    async fn put_compensation(&self, record: &CompensationRecord) -> Result<()> {
        let value = serde_json::to_value(record)?;
        self.store
            .set(
                &compensations_group(&record.workflow_id),
                &record.step_name,
                value,
            )
            .await?;
        Ok(())
    }

    // -- History --

    /// Returns the instance together with all of its step executions and
    /// compensation records.
    pub async fn get_workflow_history(
        &self,
        id: &WorkflowId,
    ) -> Result<Option<WorkflowHistory>> {
        let Some(workflow) = self.get_workflow(id).await? else {
            return Ok(None);
        };
        let steps = self.get_steps(id).await?;
        let compensations = self.get_compensations(id).await?;
        Ok(Some(WorkflowHistory {
            workflow,
            steps,
            compensations,
        }))
    }
}
