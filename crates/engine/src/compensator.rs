//! Reverse-path orchestration.

use std::sync::Arc;

use common::WorkflowId;
use event_bus::EventBus;
use state_store::StateStore;

use crate::error::Result;
use crate::instance::{CompensationResult, WorkflowStatus};
use crate::persistence::{StatusUpdate, WorkflowStore};
use crate::topics::{
    self, CompensationCompletedPayload, CompensationDispatchPayload,
    CompensationFinishedPayload, ExecuteCompensationPayload,
};

/// Drives the reverse path: one compensation at a time, chained through the
/// bus so each is durable and independently observable.
///
/// Pending compensations are re-read from the store after every completion
/// rather than held in an in-memory cursor, which keeps the chain
/// restart-safe and re-entrant.
pub struct Compensator<S> {
    store: WorkflowStore<S>,
    bus: Arc<dyn EventBus>,
}

impl<S: StateStore> Compensator<S> {
    /// Creates a compensator over the given state store and bus.
    pub fn new(store: S, bus: Arc<dyn EventBus>) -> Self {
        Self {
            store: WorkflowStore::new(store),
            bus,
        }
    }

    /// Begins the reverse path for a failed workflow.
    ///
    /// Transitions the instance to `compensating` and dispatches the most
    /// recently registered pending compensation; with nothing to undo the
    /// workflow goes straight to `compensated`.
    #[tracing::instrument(skip(self))]
    pub async fn start_compensation(&self, workflow_id: &WorkflowId) -> Result<()> {
        let Some(instance) = self.store.get_workflow(workflow_id).await? else {
            tracing::error!("compensate for unknown workflow");
            return Ok(());
        };
        if instance.status != WorkflowStatus::Failed {
            tracing::warn!(status = %instance.status, "compensate ignored on non-failed workflow");
            return Ok(());
        }

        self.store
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Compensating,
                StatusUpdate::default(),
            )
            .await?;
        metrics::counter!("compensation_started_total").increment(1);

        let pending = self.store.get_pending_compensations(workflow_id).await?;
        let Some(head) = pending.first() else {
            tracing::info!("no compensations to run");
            return self.finish_compensation(workflow_id).await;
        };

        tracing::info!(
            pending = pending.len(),
            head = %head.step_name,
            "compensation chain started"
        );
        self.emit_execute(workflow_id, &head.step_name, &head.compensation_name)
            .await
    }

    /// Dispatches one compensation to its handler, attaching the original
    /// step's stored output.
    #[tracing::instrument(skip(self, payload), fields(workflow_id = %payload.workflow_id, step_name = %payload.step_name))]
    pub async fn execute_compensation(
        &self,
        payload: ExecuteCompensationPayload,
    ) -> Result<()> {
        let Some(instance) = self.store.get_workflow(&payload.workflow_id).await? else {
            tracing::error!("execute-compensation for unknown workflow");
            return Ok(());
        };

        let original_output = self
            .store
            .get_step(&payload.workflow_id, &payload.step_name)
            .await?
            .and_then(|step| step.output);

        self.bus
            .emit(topics::event(
                &topics::compensation_topic(&payload.compensation_name),
                &CompensationDispatchPayload {
                    workflow_id: payload.workflow_id,
                    original_step: payload.step_name,
                    compensation_step: payload.compensation_name,
                    context: instance.context,
                    original_output,
                },
            )?)
            .await?;
        Ok(())
    }

    /// Applies a compensation outcome and advances the chain.
    ///
    /// A failed compensation is recorded but does not stop the chain:
    /// abandoning it would leave more inconsistency than best-effort
    /// rollback. Persistently-failed compensations are surfaced through the
    /// workflow history for operators.
    #[tracing::instrument(skip(self, payload), fields(workflow_id = %payload.workflow_id, step_name = %payload.step_name))]
    pub async fn handle_compensation_completed(
        &self,
        payload: CompensationCompletedPayload,
    ) -> Result<()> {
        let result = if payload.success {
            CompensationResult::Success
        } else {
            CompensationResult::Failed
        };

        let Some((_, applied)) = self
            .store
            .mark_compensation_executed(
                &payload.workflow_id,
                &payload.step_name,
                result,
                payload.error,
            )
            .await?
        else {
            tracing::error!("compensation-completed for unknown record");
            return Ok(());
        };
        if !applied {
            // The stored outcome stands; keep driving the chain so a crash
            // between persist and emit still recovers.
            tracing::warn!("duplicate compensation-completed, re-driving chain");
        } else if !payload.success {
            metrics::counter!("compensation_step_failed_total").increment(1);
            tracing::warn!("compensation failed, continuing chain");
        }

        self.store
            .mark_step_compensated(&payload.workflow_id, &payload.step_name)
            .await?;

        let pending = self
            .store
            .get_pending_compensations(&payload.workflow_id)
            .await?;
        match pending.first() {
            None => self.finish_compensation(&payload.workflow_id).await,
            Some(head) => {
                self.emit_execute(&payload.workflow_id, &head.step_name, &head.compensation_name)
                    .await
            }
        }
    }

    /// Marks the workflow `compensated` and announces the end of the chain.
    #[tracing::instrument(skip(self))]
    pub async fn finish_compensation(&self, workflow_id: &WorkflowId) -> Result<()> {
        self.store
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Compensated,
                StatusUpdate::default(),
            )
            .await?;

        metrics::counter!("compensation_finished_total").increment(1);
        tracing::info!("compensation finished");

        self.bus
            .emit(topics::event(
                topics::COMPENSATION_FINISHED,
                &CompensationFinishedPayload {
                    workflow_id: workflow_id.clone(),
                },
            )?)
            .await?;
        Ok(())
    }

    async fn emit_execute(
        &self,
        workflow_id: &WorkflowId,
        step_name: &str,
        compensation_name: &str,
    ) -> Result<()> {
        self.bus
            .emit(topics::event(
                topics::EXECUTE_COMPENSATION,
                &ExecuteCompensationPayload {
                    workflow_id: workflow_id.clone(),
                    step_name: step_name.to_string(),
                    compensation_name: compensation_name.to_string(),
                },
            )?)
            .await?;
        Ok(())
    }
}
