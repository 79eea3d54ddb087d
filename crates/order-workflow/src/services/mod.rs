//! External service traits and their deterministic in-memory fakes.

pub mod inventory;
pub mod notification;
pub mod payment;
pub mod shipment;

use thiserror::Error;

pub use inventory::{
    InMemoryInventoryService, InventoryService, ReservationItem, ReservationResult,
};
pub use notification::{InMemoryNotificationService, NotificationService};
pub use payment::{ChargeResult, InMemoryPaymentService, PaymentService};
pub use shipment::{InMemoryShipmentService, ShipmentResult, ShipmentService};

/// Business-level failures reported by the external services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The payment provider declined the charge.
    #[error("Payment declined: {0}")]
    PaymentDeclined(String),

    /// Not enough stock to reserve the requested items.
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// The carrier rejected the shipment.
    #[error("Shipment rejected: {0}")]
    ShipmentRejected(String),

    /// The service could not be reached or errored internally.
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl ServiceError {
    /// Machine-readable error code recorded on the step execution.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::PaymentDeclined(_) => "PAYMENT_DECLINED",
            ServiceError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            ServiceError::ShipmentRejected(_) => "SHIPMENT_REJECTED",
            ServiceError::Unavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}
