//! Bus glue: routes reserved topics to engine and compensator operations.

use std::sync::Arc;

use async_trait::async_trait;
use event_bus::{BusError, EventEnvelope, EventHandler};
use serde::de::DeserializeOwned;
use state_store::StateStore;

use crate::compensator::Compensator;
use crate::engine::Engine;
use crate::topics;

fn decode<T: DeserializeOwned>(event: &EventEnvelope) -> Result<T, BusError> {
    serde_json::from_value(event.data.clone()).map_err(|e| BusError::Handler {
        topic: event.topic.clone(),
        reason: format!("invalid payload: {e}"),
    })
}

fn internal(topic: &str, err: crate::EngineError) -> BusError {
    BusError::Handler {
        topic: topic.to_string(),
        reason: err.to_string(),
    }
}

/// Consumes the engine's internal topics.
pub struct EngineEventHandler<S> {
    engine: Arc<Engine<S>>,
}

impl<S> EngineEventHandler<S> {
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl<S: StateStore + 'static> EventHandler for EngineEventHandler<S> {
    fn subscriptions(&self) -> Vec<String> {
        vec![
            topics::EXECUTE_STEP.to_string(),
            topics::STEP_COMPLETED.to_string(),
            topics::STEP_FAILED.to_string(),
        ]
    }

    async fn handle(&self, event: EventEnvelope) -> Result<(), BusError> {
        match event.topic.as_str() {
            topics::EXECUTE_STEP => self
                .engine
                .execute_step(decode(&event)?)
                .await
                .map_err(|e| internal(&event.topic, e)),
            topics::STEP_COMPLETED => self
                .engine
                .handle_step_completed(decode(&event)?)
                .await
                .map_err(|e| internal(&event.topic, e)),
            topics::STEP_FAILED => self
                .engine
                .handle_step_failed(decode(&event)?)
                .await
                .map_err(|e| internal(&event.topic, e)),
            other => {
                tracing::error!(topic = other, "engine handler received unexpected topic");
                Ok(())
            }
        }
    }
}

/// Consumes the compensator's internal topics.
pub struct CompensatorEventHandler<S> {
    compensator: Arc<Compensator<S>>,
}

impl<S> CompensatorEventHandler<S> {
    pub fn new(compensator: Arc<Compensator<S>>) -> Self {
        Self { compensator }
    }
}

#[async_trait]
impl<S: StateStore + 'static> EventHandler for CompensatorEventHandler<S> {
    fn subscriptions(&self) -> Vec<String> {
        vec![
            topics::COMPENSATE.to_string(),
            topics::EXECUTE_COMPENSATION.to_string(),
            topics::COMPENSATION_COMPLETED.to_string(),
        ]
    }

    async fn handle(&self, event: EventEnvelope) -> Result<(), BusError> {
        match event.topic.as_str() {
            topics::COMPENSATE => {
                let payload: topics::CompensatePayload = decode(&event)?;
                self.compensator
                    .start_compensation(&payload.workflow_id)
                    .await
                    .map_err(|e| internal(&event.topic, e))
            }
            topics::EXECUTE_COMPENSATION => self
                .compensator
                .execute_compensation(decode(&event)?)
                .await
                .map_err(|e| internal(&event.topic, e)),
            topics::COMPENSATION_COMPLETED => self
                .compensator
                .handle_compensation_completed(decode(&event)?)
                .await
                .map_err(|e| internal(&event.topic, e)),
            other => {
                tracing::error!(topic = other, "compensator handler received unexpected topic");
                Ok(())
            }
        }
    }
}
