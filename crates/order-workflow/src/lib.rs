//! Reference order-fulfillment workflow.
//!
//! Steps: validate the order, charge payment, reserve inventory, create the
//! shipment, notify the user, complete. Payment, inventory, and shipment
//! register compensations so a failure partway through unwinds the side
//! effects already made.
//!
//! The external services are deterministic fakes: payment declines at
//! `amount >= 500`, inventory fails at total quantity `>= 10`, shipment
//! fails at `weight >= 50`, which makes every failure scenario reproducible
//! from the start input alone.

pub mod compensations;
pub mod services;
pub mod steps;

use std::sync::Arc;

use engine::{StepDefinition, WorkflowDefinition};
use event_bus::EventBus;
use state_store::StateStore;

use compensations::{CancelShipmentHandler, RefundPaymentHandler, ReleaseInventoryHandler};
pub use compensations::RefundConfig;
use services::{InventoryService, NotificationService, PaymentService, ShipmentService};
use steps::{
    ChargePaymentHandler, CompleteHandler, CreateShipmentHandler, NotifyUserHandler,
    ReserveInventoryHandler, ValidateOrderHandler,
};

pub const WORKFLOW_TYPE: &str = "order-fulfillment";

pub const STEP_VALIDATE_ORDER: &str = "ValidateOrder";
pub const STEP_CHARGE_PAYMENT: &str = "ChargePayment";
pub const STEP_RESERVE_INVENTORY: &str = "ReserveInventory";
pub const STEP_CREATE_SHIPMENT: &str = "CreateShipment";
pub const STEP_NOTIFY_USER: &str = "NotifyUser";
pub const STEP_COMPLETE: &str = "Complete";

pub const COMPENSATION_REFUND_PAYMENT: &str = "RefundPayment";
pub const COMPENSATION_RELEASE_INVENTORY: &str = "ReleaseInventory";
pub const COMPENSATION_CANCEL_SHIPMENT: &str = "CancelShipment";

pub const TOPIC_VALIDATE_ORDER: &str = "order.validate-order";
pub const TOPIC_CHARGE_PAYMENT: &str = "order.charge-payment";
pub const TOPIC_RESERVE_INVENTORY: &str = "order.reserve-inventory";
pub const TOPIC_CREATE_SHIPMENT: &str = "order.create-shipment";
pub const TOPIC_NOTIFY_USER: &str = "order.notify-user";
pub const TOPIC_COMPLETE: &str = "order.complete";

/// Builds the order-fulfillment workflow definition.
pub fn definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        WORKFLOW_TYPE,
        vec![
            StepDefinition::new(STEP_VALIDATE_ORDER, TOPIC_VALIDATE_ORDER),
            StepDefinition::new(STEP_CHARGE_PAYMENT, TOPIC_CHARGE_PAYMENT)
                .with_compensation(COMPENSATION_REFUND_PAYMENT),
            StepDefinition::new(STEP_RESERVE_INVENTORY, TOPIC_RESERVE_INVENTORY)
                .with_compensation(COMPENSATION_RELEASE_INVENTORY),
            StepDefinition::new(STEP_CREATE_SHIPMENT, TOPIC_CREATE_SHIPMENT)
                .with_compensation(COMPENSATION_CANCEL_SHIPMENT),
            StepDefinition::new(STEP_NOTIFY_USER, TOPIC_NOTIFY_USER),
            StepDefinition::new(STEP_COMPLETE, TOPIC_COMPLETE),
        ],
    )
}

/// The external services the workflow's handlers call.
pub struct OrderServices {
    pub payments: Arc<dyn PaymentService>,
    pub inventory: Arc<dyn InventoryService>,
    pub shipments: Arc<dyn ShipmentService>,
    pub notifications: Arc<dyn NotificationService>,
}

/// Subscribes every forward step handler and compensation handler of the
/// order workflow on the bus.
pub fn register_handlers(
    bus: Arc<dyn EventBus>,
    services: &OrderServices,
    store: Arc<dyn StateStore>,
    refund_config: RefundConfig,
) {
    bus.subscribe(Arc::new(ValidateOrderHandler::new(bus.clone())));
    bus.subscribe(Arc::new(ChargePaymentHandler::new(
        bus.clone(),
        services.payments.clone(),
    )));
    bus.subscribe(Arc::new(ReserveInventoryHandler::new(
        bus.clone(),
        services.inventory.clone(),
    )));
    bus.subscribe(Arc::new(CreateShipmentHandler::new(
        bus.clone(),
        services.shipments.clone(),
    )));
    bus.subscribe(Arc::new(NotifyUserHandler::new(
        bus.clone(),
        services.notifications.clone(),
    )));
    bus.subscribe(Arc::new(CompleteHandler::new(bus.clone())));

    bus.subscribe(Arc::new(RefundPaymentHandler::new(
        bus.clone(),
        services.payments.clone(),
        store,
        refund_config,
    )));
    bus.subscribe(Arc::new(ReleaseInventoryHandler::new(
        bus.clone(),
        services.inventory.clone(),
    )));
    bus.subscribe(Arc::new(CancelShipmentHandler::new(
        bus.clone(),
        services.shipments.clone(),
    )));
}
