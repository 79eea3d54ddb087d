use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A published event: a topic name plus a JSON-shaped payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// The topic the event was published on.
    pub topic: String,
    /// The event payload.
    pub data: serde_json::Value,
}

impl EventEnvelope {
    /// Creates a new envelope.
    pub fn new(topic: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }
}

/// Trait for publishing events and routing them to subscribed handlers.
///
/// Delivery is at-least-once: consumers must tolerate duplicates.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publishes an event to the bus.
    async fn emit(&self, event: EventEnvelope) -> Result<()>;

    /// Registers a handler for every topic it declares in `subscriptions`.
    fn subscribe(&self, handler: Arc<dyn EventHandler>);
}

/// A consumer of bus events.
///
/// Handler errors are logged by the bus and never propagated back to the
/// emitter; a handler that needs to signal failure does so by emitting its
/// own event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// The topics this handler consumes.
    fn subscriptions(&self) -> Vec<String>;

    /// Handles a single delivered event.
    async fn handle(&self, event: EventEnvelope) -> Result<()>;
}

/// Errors that can occur during event publishing or handling.
#[derive(Debug, Error)]
pub enum BusError {
    /// Error publishing an event.
    #[error("Publish error: {0}")]
    Publish(String),

    /// A handler rejected the event payload.
    #[error("Handler error on topic '{topic}': {reason}")]
    Handler { topic: String, reason: String },

    /// Payload serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;
