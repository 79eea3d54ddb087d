//! Shipment service trait and deterministic in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::WorkflowId;

use super::ServiceError;

/// Package weight at which the fake carrier refuses the shipment.
pub const MAX_WEIGHT: f64 = 50.0;

/// Result of a successfully created shipment.
#[derive(Debug, Clone)]
pub struct ShipmentResult {
    /// The shipment ID assigned by the carrier.
    pub shipment_id: String,
    /// Carrier tracking number.
    pub tracking_number: String,
}

/// Trait for shipment operations.
#[async_trait]
pub trait ShipmentService: Send + Sync {
    /// Creates a shipment for a workflow's order.
    async fn create_shipment(
        &self,
        workflow_id: &WorkflowId,
        weight: f64,
    ) -> Result<ShipmentResult, ServiceError>;

    /// Cancels a previously created shipment.
    async fn cancel_shipment(&self, shipment_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct ShipmentState {
    shipments: HashMap<String, f64>,
    next_id: u32,
    cancel_calls: u32,
}

/// Deterministic in-memory carrier.
///
/// Rejects any shipment with `weight >= 50`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryShipmentService {
    state: Arc<RwLock<ShipmentState>>,
}

impl InMemoryShipmentService {
    /// Creates a new in-memory shipment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of active shipments.
    pub fn shipment_count(&self) -> usize {
        self.state.read().unwrap().shipments.len()
    }

    /// Returns how many cancel calls were made.
    pub fn cancel_call_count(&self) -> u32 {
        self.state.read().unwrap().cancel_calls
    }
}

#[async_trait]
impl ShipmentService for InMemoryShipmentService {
    async fn create_shipment(
        &self,
        _workflow_id: &WorkflowId,
        weight: f64,
    ) -> Result<ShipmentResult, ServiceError> {
        let mut state = self.state.write().unwrap();

        if weight >= MAX_WEIGHT {
            return Err(ServiceError::ShipmentRejected(format!(
                "weight {weight} exceeds carrier limit"
            )));
        }

        state.next_id += 1;
        let shipment_id = format!("SHP-{:04}", state.next_id);
        let tracking_number = format!("TRACK-{:06}", state.next_id * 7);
        state.shipments.insert(shipment_id.clone(), weight);

        Ok(ShipmentResult {
            shipment_id,
            tracking_number,
        })
    }

    async fn cancel_shipment(&self, shipment_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state.cancel_calls += 1;
        state.shipments.remove(shipment_id);
        Ok(())
    }
}
