use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::bus::{EventBus, EventEnvelope, EventHandler, Result};

/// In-memory event bus for testing and single-process deployments.
///
/// Events are queued in FIFO order and dispatched serially, one at a time.
/// Serial dispatch is what gives workflows their per-instance delivery
/// ordering: the engine emits exactly one follow-up event per handled
/// event, so a single consumer drains each workflow's chain in order.
///
/// Tests drive the bus with [`pump_until_idle`](Self::pump_until_idle);
/// servers spawn [`run`](Self::run) as a background task.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
    queue: Mutex<VecDeque<EventEnvelope>>,
    notify: Notify,
}

impl InMemoryEventBus {
    /// Creates a new bus with no subscriptions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of events waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// Dispatches queued events serially until the queue is empty.
    ///
    /// Events emitted by handlers during dispatch are appended to the queue
    /// and processed in the same call, so on return every causal chain has
    /// run to completion.
    pub async fn pump_until_idle(&self) {
        loop {
            let event = self.inner.queue.lock().unwrap().pop_front();
            let Some(event) = event else { break };
            self.dispatch(event).await;
        }
    }

    /// Runs the dispatch loop forever. Intended for `tokio::spawn`.
    pub async fn run(&self) {
        loop {
            self.pump_until_idle().await;
            self.inner.notify.notified().await;
        }
    }

    async fn dispatch(&self, event: EventEnvelope) {
        let handlers: Vec<Arc<dyn EventHandler>> = {
            let map = self.inner.handlers.read().unwrap();
            map.get(&event.topic).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            tracing::debug!(topic = %event.topic, "no subscribers for topic");
            return;
        }

        for handler in handlers {
            if let Err(err) = handler.handle(event.clone()).await {
                tracing::error!(topic = %event.topic, error = %err, "event handler failed");
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn emit(&self, event: EventEnvelope) -> Result<()> {
        tracing::debug!(topic = %event.topic, "event emitted");
        self.inner.queue.lock().unwrap().push_back(event);
        self.inner.notify.notify_one();
        Ok(())
    }

    fn subscribe(&self, handler: Arc<dyn EventHandler>) {
        let mut map = self.inner.handlers.write().unwrap();
        for topic in handler.subscriptions() {
            map.entry(topic).or_default().push(handler.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusError;
    use serde_json::json;

    struct Recording {
        topics: Vec<String>,
        seen: Mutex<Vec<EventEnvelope>>,
        /// When set, re-emits this event once on first delivery.
        chain: Mutex<Option<(InMemoryEventBus, EventEnvelope)>>,
        fail: bool,
    }

    impl Recording {
        fn new(topics: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                topics: topics.iter().map(|t| t.to_string()).collect(),
                seen: Mutex::new(Vec::new()),
                chain: Mutex::new(None),
                fail: false,
            })
        }

        fn seen_topics(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.topic.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventHandler for Recording {
        fn subscriptions(&self) -> Vec<String> {
            self.topics.clone()
        }

        async fn handle(&self, event: EventEnvelope) -> Result<()> {
            self.seen.lock().unwrap().push(event.clone());
            if let Some((bus, follow_up)) = self.chain.lock().unwrap().take() {
                bus.inner.queue.lock().unwrap().push_back(follow_up);
            }
            if self.fail {
                return Err(BusError::Handler {
                    topic: event.topic,
                    reason: "boom".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn emit_and_pump_delivers_to_subscriber() {
        let bus = InMemoryEventBus::new();
        let handler = Recording::new(&["orders.created"]);
        bus.subscribe(handler.clone());

        bus.emit(EventEnvelope::new("orders.created", json!({"id": 1})))
            .await
            .unwrap();
        assert_eq!(bus.pending(), 1);

        bus.pump_until_idle().await;

        assert_eq!(bus.pending(), 0);
        assert_eq!(handler.seen_topics(), vec!["orders.created"]);
    }

    #[tokio::test]
    async fn events_without_subscribers_are_dropped() {
        let bus = InMemoryEventBus::new();
        bus.emit(EventEnvelope::new("nobody.home", json!({})))
            .await
            .unwrap();
        bus.pump_until_idle().await;
        assert_eq!(bus.pending(), 0);
    }

    #[tokio::test]
    async fn handler_subscribes_to_multiple_topics() {
        let bus = InMemoryEventBus::new();
        let handler = Recording::new(&["a", "b"]);
        bus.subscribe(handler.clone());

        bus.emit(EventEnvelope::new("a", json!(1))).await.unwrap();
        bus.emit(EventEnvelope::new("b", json!(2))).await.unwrap();
        bus.pump_until_idle().await;

        assert_eq!(handler.seen_topics(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn events_emitted_during_dispatch_are_processed_in_same_pump() {
        let bus = InMemoryEventBus::new();
        let first = Recording::new(&["first"]);
        let second = Recording::new(&["second"]);
        *first.chain.lock().unwrap() = Some((
            bus.clone(),
            EventEnvelope::new("second", json!({"chained": true})),
        ));

        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        bus.emit(EventEnvelope::new("first", json!({}))).await.unwrap();
        bus.pump_until_idle().await;

        assert_eq!(first.seen_topics(), vec!["first"]);
        assert_eq!(second.seen_topics(), vec!["second"]);
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_dispatch() {
        let bus = InMemoryEventBus::new();
        let failing = Arc::new(Recording {
            topics: vec!["t".to_string()],
            seen: Mutex::new(Vec::new()),
            chain: Mutex::new(None),
            fail: true,
        });
        let healthy = Recording::new(&["t"]);
        bus.subscribe(failing.clone());
        bus.subscribe(healthy.clone());

        bus.emit(EventEnvelope::new("t", json!({}))).await.unwrap();
        bus.emit(EventEnvelope::new("t", json!({}))).await.unwrap();
        bus.pump_until_idle().await;

        assert_eq!(failing.seen.lock().unwrap().len(), 2);
        assert_eq!(healthy.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let bus = InMemoryEventBus::new();
        let handler = Recording::new(&["seq"]);
        bus.subscribe(handler.clone());

        for i in 0..5 {
            bus.emit(EventEnvelope::new("seq", json!(i))).await.unwrap();
        }
        bus.pump_until_idle().await;

        let seen = handler.seen.lock().unwrap();
        let order: Vec<i64> = seen.iter().map(|e| e.data.as_i64().unwrap()).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
    }
}
