//! Compensation handlers.
//!
//! Each handler consumes its `compensate.<name>` topic and emits exactly
//! one `compensation-completed` with a boolean outcome. A reported failure
//! is recorded by the compensator but never stops the chain.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::Context;
use engine::topics::{self, CompensationCompletedPayload, CompensationDispatchPayload};
use event_bus::{EventBus, EventEnvelope, EventHandler};
use serde_json::{Value, json};
use state_store::StateStore;

use crate::services::{InventoryService, PaymentService, ShipmentService};

/// Handler-owned group recording refund idempotency keys.
pub const REFUNDS_GROUP: &str = "flowforge:refunds";

async fn emit_outcome(
    bus: &Arc<dyn EventBus>,
    payload: &CompensationDispatchPayload,
    success: bool,
    error: Option<String>,
) -> event_bus::Result<()> {
    bus.emit(topics::event(
        topics::COMPENSATION_COMPLETED,
        &CompensationCompletedPayload {
            workflow_id: payload.workflow_id.clone(),
            step_name: payload.original_step.clone(),
            success,
            error,
        },
    )?)
    .await
}

fn output_str<'a>(output: &'a Option<Context>, key: &str) -> Option<&'a str> {
    output.as_ref()?.get(key).and_then(Value::as_str)
}

/// Retry and timeout policy of the hardened refund handler.
#[derive(Debug, Clone)]
pub struct RefundConfig {
    /// Per-call timeout on the payment service.
    pub timeout: Duration,
    /// Total attempts before the refund is reported failed.
    pub max_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number.
    pub backoff: Duration,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            backoff: Duration::from_millis(100),
        }
    }
}

/// Undoes a charge through the payment service.
///
/// Refunds move money, so this handler is hardened beyond the basic
/// pattern: every call is bounded by a timeout, transient failures are
/// retried with backoff, and a persisted idempotency key guarantees a
/// redelivered compensation never refunds twice.
pub struct RefundPaymentHandler {
    bus: Arc<dyn EventBus>,
    payments: Arc<dyn PaymentService>,
    store: Arc<dyn StateStore>,
    config: RefundConfig,
}

impl RefundPaymentHandler {
    pub fn new(
        bus: Arc<dyn EventBus>,
        payments: Arc<dyn PaymentService>,
        store: Arc<dyn StateStore>,
        config: RefundConfig,
    ) -> Self {
        Self {
            bus,
            payments,
            store,
            config,
        }
    }

    async fn refund_with_retries(&self, payment_id: &str) -> Result<(), String> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            match tokio::time::timeout(self.config.timeout, self.payments.refund(payment_id)).await
            {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => last_error = err.to_string(),
                Err(_) => last_error = format!("refund timed out after {:?}", self.config.timeout),
            }
            tracing::warn!(payment_id, attempt, error = %last_error, "refund attempt failed");
            if attempt < self.config.max_attempts {
                tokio::time::sleep(self.config.backoff * attempt).await;
            }
        }
        Err(last_error)
    }
}

#[async_trait]
impl EventHandler for RefundPaymentHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![topics::compensation_topic(crate::COMPENSATION_REFUND_PAYMENT)]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: CompensationDispatchPayload = serde_json::from_value(event.data)?;

        let Some(payment_id) = output_str(&payload.original_output, "paymentId") else {
            return emit_outcome(
                &self.bus,
                &payload,
                false,
                Some("no paymentId in original step output".to_string()),
            )
            .await;
        };

        let idempotency_key = format!("{}:{}", payload.workflow_id, payload.original_step);
        match self.store.get(REFUNDS_GROUP, &idempotency_key).await {
            Ok(Some(_)) => {
                tracing::info!(payment_id, "refund already executed, skipping");
                return emit_outcome(&self.bus, &payload, true, None).await;
            }
            Ok(None) => {}
            Err(err) => {
                return emit_outcome(&self.bus, &payload, false, Some(err.to_string())).await;
            }
        }

        match self.refund_with_retries(payment_id).await {
            Ok(()) => {
                let record = json!({
                    "paymentId": payment_id,
                    "refundedAt": Utc::now().to_rfc3339(),
                });
                if let Err(err) = self.store.set(REFUNDS_GROUP, &idempotency_key, record).await {
                    // The refund went through; the missing key only risks a
                    // duplicate attempt on redelivery.
                    tracing::error!(error = %err, "failed to persist refund idempotency key");
                }
                tracing::info!(payment_id, "payment refunded");
                emit_outcome(&self.bus, &payload, true, None).await
            }
            Err(error) => emit_outcome(&self.bus, &payload, false, Some(error)).await,
        }
    }
}

/// Releases a warehouse reservation.
pub struct ReleaseInventoryHandler {
    bus: Arc<dyn EventBus>,
    inventory: Arc<dyn InventoryService>,
}

impl ReleaseInventoryHandler {
    pub fn new(bus: Arc<dyn EventBus>, inventory: Arc<dyn InventoryService>) -> Self {
        Self { bus, inventory }
    }
}

#[async_trait]
impl EventHandler for ReleaseInventoryHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![topics::compensation_topic(
            crate::COMPENSATION_RELEASE_INVENTORY,
        )]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: CompensationDispatchPayload = serde_json::from_value(event.data)?;

        let Some(reservation_id) = output_str(&payload.original_output, "reservationId") else {
            return emit_outcome(
                &self.bus,
                &payload,
                false,
                Some("no reservationId in original step output".to_string()),
            )
            .await;
        };

        match self.inventory.release(reservation_id).await {
            Ok(()) => {
                tracing::info!(reservation_id, "reservation released");
                emit_outcome(&self.bus, &payload, true, None).await
            }
            Err(err) => emit_outcome(&self.bus, &payload, false, Some(err.to_string())).await,
        }
    }
}

/// Cancels a carrier shipment.
pub struct CancelShipmentHandler {
    bus: Arc<dyn EventBus>,
    shipments: Arc<dyn ShipmentService>,
}

impl CancelShipmentHandler {
    pub fn new(bus: Arc<dyn EventBus>, shipments: Arc<dyn ShipmentService>) -> Self {
        Self { bus, shipments }
    }
}

#[async_trait]
impl EventHandler for CancelShipmentHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![topics::compensation_topic(
            crate::COMPENSATION_CANCEL_SHIPMENT,
        )]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: CompensationDispatchPayload = serde_json::from_value(event.data)?;

        let Some(shipment_id) = output_str(&payload.original_output, "shipmentId") else {
            return emit_outcome(
                &self.bus,
                &payload,
                false,
                Some("no shipmentId in original step output".to_string()),
            )
            .await;
        };

        match self.shipments.cancel_shipment(shipment_id).await {
            Ok(()) => {
                tracing::info!(shipment_id, "shipment cancelled");
                emit_outcome(&self.bus, &payload, true, None).await
            }
            Err(err) => emit_outcome(&self.bus, &payload, false, Some(err.to_string())).await,
        }
    }
}
