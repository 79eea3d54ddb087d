//! Payment service trait and deterministic in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::WorkflowId;

use super::ServiceError;

/// Charge threshold at which the fake provider declines.
pub const DECLINE_AMOUNT: f64 = 500.0;

/// Result of a successful charge.
#[derive(Debug, Clone)]
pub struct ChargeResult {
    /// The payment ID assigned by the provider.
    pub payment_id: String,
}

/// Trait for payment operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Charges the given amount for a workflow's order.
    async fn charge(
        &self,
        workflow_id: &WorkflowId,
        amount: f64,
    ) -> Result<ChargeResult, ServiceError>;

    /// Refunds a previously made payment.
    async fn refund(&self, payment_id: &str) -> Result<(), ServiceError>;
}

#[derive(Debug, Default)]
struct PaymentState {
    payments: HashMap<String, f64>,
    next_id: u32,
    refund_calls: u32,
    fail_on_refund: bool,
}

/// Deterministic in-memory payment provider.
///
/// Declines any charge with `amount >= 500`; refunds succeed unless the
/// failure switch is set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<RwLock<PaymentState>>,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures refunds to fail.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Returns the number of active (not refunded) payments.
    pub fn payment_count(&self) -> usize {
        self.state.read().unwrap().payments.len()
    }

    /// Returns true if a payment exists with the given ID.
    pub fn has_payment(&self, payment_id: &str) -> bool {
        self.state.read().unwrap().payments.contains_key(payment_id)
    }

    /// Returns how many refund calls were made.
    pub fn refund_call_count(&self) -> u32 {
        self.state.read().unwrap().refund_calls
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn charge(
        &self,
        _workflow_id: &WorkflowId,
        amount: f64,
    ) -> Result<ChargeResult, ServiceError> {
        let mut state = self.state.write().unwrap();

        if amount >= DECLINE_AMOUNT {
            return Err(ServiceError::PaymentDeclined(format!(
                "amount {amount} exceeds limit"
            )));
        }

        state.next_id += 1;
        let payment_id = format!("PAY-{:04}", state.next_id);
        state.payments.insert(payment_id.clone(), amount);

        Ok(ChargeResult { payment_id })
    }

    async fn refund(&self, payment_id: &str) -> Result<(), ServiceError> {
        let mut state = self.state.write().unwrap();
        state.refund_calls += 1;

        if state.fail_on_refund {
            return Err(ServiceError::Unavailable(
                "refund endpoint unreachable".to_string(),
            ));
        }

        state.payments.remove(payment_id);
        Ok(())
    }
}
