//! Forward step handlers.
//!
//! Each handler consumes its step's dispatch topic and emits exactly one of
//! `step-completed` or `step-failed` per invocation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::Context;
use engine::topics::{self, StepCompletedPayload, StepDispatchPayload, StepFailedPayload};
use engine::StepError;
use event_bus::{EventBus, EventEnvelope, EventHandler};
use serde_json::{Value, json};

use crate::services::{
    InventoryService, NotificationService, PaymentService, ReservationItem, ServiceError,
    ShipmentService,
};

async fn emit_completed(
    bus: &Arc<dyn EventBus>,
    payload: &StepDispatchPayload,
    output: Context,
) -> event_bus::Result<()> {
    bus.emit(topics::event(
        topics::STEP_COMPLETED,
        &StepCompletedPayload {
            workflow_id: payload.workflow_id.clone(),
            step_name: payload.step_name.clone(),
            output,
        },
    )?)
    .await
}

async fn emit_failed(
    bus: &Arc<dyn EventBus>,
    payload: &StepDispatchPayload,
    error: StepError,
) -> event_bus::Result<()> {
    bus.emit(topics::event(
        topics::STEP_FAILED,
        &StepFailedPayload {
            workflow_id: payload.workflow_id.clone(),
            step_name: payload.step_name.clone(),
            error,
        },
    )?)
    .await
}

fn service_error(err: &ServiceError) -> StepError {
    StepError::with_code(err.to_string(), err.code())
}

fn invalid_input(message: impl Into<String>) -> StepError {
    StepError::with_code(message, "INVALID_INPUT")
}

fn amount(context: &Context) -> Option<f64> {
    context.get("amount").and_then(Value::as_f64)
}

fn weight(context: &Context) -> Option<f64> {
    context.get("weight").and_then(Value::as_f64)
}

fn items(context: &Context) -> Option<Vec<ReservationItem>> {
    context
        .get("items")
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

fn output(value: Value) -> Context {
    value.as_object().cloned().unwrap_or_default()
}

/// Validates the order input before any side effect is made.
pub struct ValidateOrderHandler {
    bus: Arc<dyn EventBus>,
}

impl ValidateOrderHandler {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EventHandler for ValidateOrderHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![crate::TOPIC_VALIDATE_ORDER.to_string()]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;
        let context = &payload.context;

        let error = if !amount(context).is_some_and(|a| a > 0.0) {
            Some(invalid_input("order amount must be a positive number"))
        } else if !items(context).is_some_and(|i| !i.is_empty()) {
            Some(invalid_input("order must contain at least one item"))
        } else if !weight(context).is_some_and(|w| w > 0.0) {
            Some(invalid_input("order weight must be a positive number"))
        } else {
            None
        };

        match error {
            Some(error) => emit_failed(&self.bus, &payload, error).await,
            None => {
                emit_completed(&self.bus, &payload, output(json!({"orderValidated": true}))).await
            }
        }
    }
}

/// Charges the order amount through the payment service.
pub struct ChargePaymentHandler {
    bus: Arc<dyn EventBus>,
    payments: Arc<dyn PaymentService>,
}

impl ChargePaymentHandler {
    pub fn new(bus: Arc<dyn EventBus>, payments: Arc<dyn PaymentService>) -> Self {
        Self { bus, payments }
    }
}

#[async_trait]
impl EventHandler for ChargePaymentHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![crate::TOPIC_CHARGE_PAYMENT.to_string()]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;

        let Some(amount) = amount(&payload.context) else {
            return emit_failed(&self.bus, &payload, invalid_input("missing order amount")).await;
        };

        match self.payments.charge(&payload.workflow_id, amount).await {
            Ok(result) => {
                tracing::info!(payment_id = %result.payment_id, "payment charged");
                emit_completed(
                    &self.bus,
                    &payload,
                    output(json!({"paymentId": result.payment_id})),
                )
                .await
            }
            Err(err) => emit_failed(&self.bus, &payload, service_error(&err)).await,
        }
    }
}

/// Reserves the ordered items in the warehouse.
pub struct ReserveInventoryHandler {
    bus: Arc<dyn EventBus>,
    inventory: Arc<dyn InventoryService>,
}

impl ReserveInventoryHandler {
    pub fn new(bus: Arc<dyn EventBus>, inventory: Arc<dyn InventoryService>) -> Self {
        Self { bus, inventory }
    }
}

#[async_trait]
impl EventHandler for ReserveInventoryHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![crate::TOPIC_RESERVE_INVENTORY.to_string()]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;

        let Some(items) = items(&payload.context) else {
            return emit_failed(&self.bus, &payload, invalid_input("missing order items")).await;
        };

        match self.inventory.reserve(&payload.workflow_id, items).await {
            Ok(result) => {
                tracing::info!(reservation_id = %result.reservation_id, "inventory reserved");
                emit_completed(
                    &self.bus,
                    &payload,
                    output(json!({"reservationId": result.reservation_id})),
                )
                .await
            }
            Err(err) => emit_failed(&self.bus, &payload, service_error(&err)).await,
        }
    }
}

/// Creates the shipment with the carrier.
pub struct CreateShipmentHandler {
    bus: Arc<dyn EventBus>,
    shipments: Arc<dyn ShipmentService>,
}

impl CreateShipmentHandler {
    pub fn new(bus: Arc<dyn EventBus>, shipments: Arc<dyn ShipmentService>) -> Self {
        Self { bus, shipments }
    }
}

#[async_trait]
impl EventHandler for CreateShipmentHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![crate::TOPIC_CREATE_SHIPMENT.to_string()]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;

        let Some(weight) = weight(&payload.context) else {
            return emit_failed(&self.bus, &payload, invalid_input("missing order weight")).await;
        };

        match self
            .shipments
            .create_shipment(&payload.workflow_id, weight)
            .await
        {
            Ok(result) => {
                tracing::info!(
                    shipment_id = %result.shipment_id,
                    tracking_number = %result.tracking_number,
                    "shipment created"
                );
                emit_completed(
                    &self.bus,
                    &payload,
                    output(json!({
                        "shipmentId": result.shipment_id,
                        "trackingNumber": result.tracking_number,
                    })),
                )
                .await
            }
            Err(err) => emit_failed(&self.bus, &payload, service_error(&err)).await,
        }
    }
}

/// Notifies the user that the order is on its way.
pub struct NotifyUserHandler {
    bus: Arc<dyn EventBus>,
    notifications: Arc<dyn NotificationService>,
}

impl NotifyUserHandler {
    pub fn new(bus: Arc<dyn EventBus>, notifications: Arc<dyn NotificationService>) -> Self {
        Self { bus, notifications }
    }
}

#[async_trait]
impl EventHandler for NotifyUserHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![crate::TOPIC_NOTIFY_USER.to_string()]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;

        let user_id = payload
            .context
            .get("userId")
            .and_then(Value::as_str)
            .unwrap_or("anonymous");
        let message = match payload.context.get("trackingNumber").and_then(Value::as_str) {
            Some(tracking) => format!("Your order is on its way ({tracking})"),
            None => "Your order is on its way".to_string(),
        };

        match self
            .notifications
            .notify(&payload.workflow_id, user_id, &message)
            .await
        {
            Ok(()) => {
                emit_completed(&self.bus, &payload, output(json!({"userNotified": true}))).await
            }
            Err(err) => emit_failed(&self.bus, &payload, service_error(&err)).await,
        }
    }
}

/// Final bookkeeping step: stamps the completion time.
pub struct CompleteHandler {
    bus: Arc<dyn EventBus>,
}

impl CompleteHandler {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl EventHandler for CompleteHandler {
    fn subscriptions(&self) -> Vec<String> {
        vec![crate::TOPIC_COMPLETE.to_string()]
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;
        emit_completed(
            &self.bus,
            &payload,
            output(json!({"completedAt": Utc::now().to_rfc3339()})),
        )
        .await
    }
}
