//! Inventory service trait and deterministic in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::WorkflowId;
use serde::{Deserialize, Serialize};

use super::ServiceError;

/// Total quantity at which the fake warehouse runs out of stock.
pub const OUT_OF_STOCK_QUANTITY: u32 = 10;

/// One line of a reservation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationItem {
    pub sku: String,
    pub quantity: u32,
}

/// Result of a successful reservation.
#[derive(Debug, Clone)]
pub struct ReservationResult {
    /// The reservation ID assigned by the warehouse.
    pub reservation_id: String,
}

/// Trait for inventory operations.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Reserves the given items for a workflow's order.
    async fn reserve(
        &self,
        workflow_id: &WorkflowId,
        items: Vec<ReservationItem>,
    ) -> Result<ReservationResult, ServiceError>;

    /// Releases a previously made reservation.
    async fn release(&self, reservation_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct InventoryState {
    reservations: HashMap<String, Vec<ReservationItem>>,
    next_id: u32,
    release_calls: u32,
}

/// Deterministic in-memory warehouse.
///
/// Fails any reservation whose total quantity reaches 10.
#[derive(Debug, Clone, Default)]
pub struct InMemoryInventoryService {
    state: Arc<RwLock<InventoryState>>,
}

impl InMemoryInventoryService {
    /// Creates a new in-memory inventory service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.state.read().unwrap().reservations.len()
    }

    /// Returns how many release calls were made.
    pub fn release_call_count(&self) -> u32 {
        self.state.read().unwrap().release_calls
    }
}

#[async_trait]
impl InventoryService for InMemoryInventoryService {
    async fn reserve(
        &self,
        _workflow_id: &WorkflowId,
        items: Vec<ReservationItem>,
    ) -> Result<ReservationResult, ServiceError> {
        let mut state = self.state.write().unwrap();

        let total: u32 = items.iter().map(|i| i.quantity).sum();
        if total >= OUT_OF_STOCK_QUANTITY {
            return Err(ServiceError::InsufficientStock(format!(
                "requested {total} units"
            )));
        }

        state.next_id += 1;
        let reservation_id = format!("RES-{:04}", state.next_id);
        state.reservations.insert(reservation_id.clone(), items);

        Ok(ReservationResult { reservation_id })
    }

    async fn release(&self, reservation_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state.release_calls += 1;
        state.reservations.remove(reservation_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(quantities: &[u32]) -> Vec<ReservationItem> {
        quantities
            .iter()
            .enumerate()
            .map(|(i, q)| ReservationItem {
                sku: format!("SKU-{i:03}"),
                quantity: *q,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let service = InMemoryInventoryService::new();
        let id = WorkflowId::from_string("wf-1");

        let result = service.reserve(&id, items(&[2, 3])).await.unwrap();
        assert!(result.reservation_id.starts_with("RES-"));
        assert_eq!(service.reservation_count(), 1);

        service.release(&result.reservation_id).await.unwrap();
        assert_eq!(service.reservation_count(), 0);
        assert_eq!(service.release_call_count(), 1);
    }

    #[tokio::test]
    async fn test_fails_at_quantity_threshold() {
        let service = InMemoryInventoryService::new();
        let id = WorkflowId::from_string("wf-1");

        let result = service.reserve(&id, items(&[4, 6])).await;
        assert!(matches!(result, Err(ServiceError::InsufficientStock(_))));
        assert_eq!(service.reservation_count(), 0);

        assert!(service.reserve(&id, items(&[4, 5])).await.is_ok());
    }

    #[tokio::test]
    async fn test_release_of_unknown_reservation_is_noop() {
        let service = InMemoryInventoryService::new();
        service.release("RES-9999").await.unwrap();
        assert_eq!(service.release_call_count(), 1);
    }
}
