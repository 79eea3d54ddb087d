//! Notification service trait and in-memory implementation.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use common::WorkflowId;

use super::ServiceError;

/// Trait for user notification delivery.
#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Sends a notification to the user of a workflow's order.
    async fn notify(
        &self,
        workflow_id: &WorkflowId,
        user_id: &str,
        message: &str,
    ) -> Result<(), ServiceError>;
}

/// In-memory notification sink recording every delivery.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationService {
    sent: Arc<RwLock<Vec<(String, String)>>>,
}

impl InMemoryNotificationService {
    /// Creates a new in-memory notification service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of notifications sent.
    pub fn notification_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }

    /// Returns the recipients notified so far.
    pub fn recipients(&self) -> Vec<String> {
        self.sent.read().unwrap().iter().map(|(u, _)| u.clone()).collect()
    }
}

#[async_trait]
impl NotificationService for InMemoryNotificationService {
    async fn notify(
        &self,
        _workflow_id: &WorkflowId,
        user_id: &str,
        message: &str,
    ) -> Result<(), ServiceError> {
        self.sent
            .write()
            .unwrap()
            .push((user_id.to_string(), message.to_string()));
        Ok(())
    }
}
