//! Observer bus: lifecycle events, state persistence, streaming fan-out
//!
//! The engine publishes every lifecycle transition to an [`ObserverBus`].
//! Two observer families subscribe:
//!
//! - [`StateStoreObserver`] writes events through the
//!   [`StateStore`](diaflow_state::StateStore) port, with an idempotent
//!   `create_execution` and a durability barrier before acknowledging an
//!   execution-terminal event
//! - [`StreamingObserver`] fans events out to per-execution bounded
//!   queues subscribed by arbitrary consumers (CLI, web UI)
//!
//! # Ordering
//!
//! Within a single execution, events are published in the scheduler's
//! commit order; the bus awaits each observer sequentially so observers
//! see that same order. Cross-execution ordering is not guaranteed.
//!
//! # Overflow
//!
//! Subscription queues are bounded. On overflow the oldest event is
//! dropped and the subscriber receives a `queue_overflow` marker event
//! carrying the drop count before the next regular event.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diaflow_state::{
    ExecutionStatus, NodeExecutionStatus, SkipReason, StateStore, TokenUsage,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

/// Lifecycle event published on the bus. The serde representation is the
/// external wire shape consumed off the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStart {
        execution_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagram_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    NodeUpdate {
        execution_id: String,
        node_id: String,
        state: NodeExecutionStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<serde_json::Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        skip_reason: Option<SkipReason>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        started_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ended_at: Option<DateTime<Utc>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token_usage: Option<TokenUsage>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry_count: Option<usize>,
        timestamp: DateTime<Utc>,
    },
    NodeError {
        execution_id: String,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionComplete {
        execution_id: String,
        status: ExecutionStatus,
    },
    ExecutionError {
        execution_id: String,
        error: String,
    },
    InteractivePrompt {
        execution_id: String,
        node_id: String,
        prompt: String,
        context: serde_json::Value,
    },
    InteractiveResponse {
        execution_id: String,
        node_id: String,
        response: String,
    },
    /// Marker injected when a subscription queue dropped events.
    QueueOverflow {
        execution_id: String,
        dropped: u64,
    },
}

impl ExecutionEvent {
    /// The execution this event belongs to.
    pub fn execution_id(&self) -> &str {
        match self {
            Self::ExecutionStart { execution_id, .. }
            | Self::NodeUpdate { execution_id, .. }
            | Self::NodeError { execution_id, .. }
            | Self::ExecutionComplete { execution_id, .. }
            | Self::ExecutionError { execution_id, .. }
            | Self::InteractivePrompt { execution_id, .. }
            | Self::InteractiveResponse { execution_id, .. }
            | Self::QueueOverflow { execution_id, .. } => execution_id,
        }
    }

    /// Whether this event terminates its execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionComplete { .. } | Self::ExecutionError { .. }
        )
    }
}

/// A lifecycle event subscriber.
#[async_trait]
pub trait ExecutionObserver: Send + Sync {
    async fn on_event(&self, event: &ExecutionEvent);
}

/// Publishes events to observers in commit order.
pub struct ObserverBus {
    observers: Vec<Arc<dyn ExecutionObserver>>,
}

impl ObserverBus {
    pub fn new(observers: Vec<Arc<dyn ExecutionObserver>>) -> Self {
        Self { observers }
    }

    /// Bus with no observers (tests, dry runs).
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Publish one event to every observer, sequentially, preserving
    /// per-execution ordering.
    pub async fn publish(&self, event: ExecutionEvent) {
        for observer in &self.observers {
            observer.on_event(&event).await;
        }
    }
}

/// Observer persisting every event through the [`StateStore`] port.
pub struct StateStoreObserver {
    store: Arc<dyn StateStore>,
}

impl StateStoreObserver {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    async fn apply(&self, event: &ExecutionEvent) -> Result<()> {
        match event {
            ExecutionEvent::ExecutionStart {
                execution_id,
                diagram_id,
                ..
            } => {
                self.store
                    .create_execution(execution_id, diagram_id.as_deref())
                    .await?;
            }
            ExecutionEvent::NodeUpdate {
                execution_id,
                node_id,
                state,
                output,
                skip_reason,
                token_usage,
                ..
            } => match (state, output) {
                (NodeExecutionStatus::Completed, Some(output)) => {
                    self.store
                        .update_node_output(execution_id, node_id, output.clone(), *token_usage)
                        .await?;
                }
                _ => {
                    self.store
                        .update_node_status(execution_id, node_id, *state, None, *skip_reason)
                        .await?;
                }
            },
            ExecutionEvent::NodeError {
                execution_id,
                node_id,
                error,
                ..
            } => {
                self.store
                    .update_node_status(
                        execution_id,
                        node_id,
                        NodeExecutionStatus::Failed,
                        Some(error.clone()),
                        None,
                    )
                    .await?;
            }
            ExecutionEvent::ExecutionComplete {
                execution_id,
                status,
            } => {
                self.store.update_status(execution_id, *status, None).await?;
                // Durable write before the terminal event is acknowledged.
                self.store.persist(execution_id).await?;
            }
            ExecutionEvent::ExecutionError {
                execution_id,
                error,
            } => {
                self.store
                    .update_status(execution_id, ExecutionStatus::Failed, Some(error.clone()))
                    .await?;
                self.store.persist(execution_id).await?;
            }
            ExecutionEvent::InteractivePrompt { .. }
            | ExecutionEvent::InteractiveResponse { .. }
            | ExecutionEvent::QueueOverflow { .. } => {}
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionObserver for StateStoreObserver {
    async fn on_event(&self, event: &ExecutionEvent) {
        if let Err(error) = self.apply(event).await {
            tracing::error!(
                execution_id = event.execution_id(),
                %error,
                "state store observer failed to persist event"
            );
        }
    }
}

/// Default capacity of a subscription queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct QueueInner {
    events: VecDeque<ExecutionEvent>,
    dropped: u64,
    closed: bool,
}

/// Bounded per-subscription event queue with drop-oldest overflow.
pub struct EventSubscription {
    execution_id: String,
    capacity: usize,
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl EventSubscription {
    fn new(execution_id: String, capacity: usize) -> Self {
        Self {
            execution_id,
            capacity: capacity.max(1),
            inner: Mutex::new(QueueInner {
                events: VecDeque::new(),
                dropped: 0,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    async fn push(&self, event: ExecutionEvent) {
        let mut inner = self.inner.lock().await;
        if inner.events.len() == self.capacity {
            inner.events.pop_front();
            inner.dropped += 1;
        }
        inner.events.push_back(event);
        drop(inner);
        self.notify.notify_one();
    }

    async fn close(&self) {
        self.inner.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Receive the next event. A pending `queue_overflow` marker is
    /// delivered before the next regular event. Returns `None` once the
    /// queue is closed and drained.
    pub async fn recv(&self) -> Option<ExecutionEvent> {
        loop {
            {
                let mut inner = self.inner.lock().await;
                if inner.dropped > 0 {
                    let dropped = inner.dropped;
                    inner.dropped = 0;
                    return Some(ExecutionEvent::QueueOverflow {
                        execution_id: self.execution_id.clone(),
                        dropped,
                    });
                }
                if let Some(event) = inner.events.pop_front() {
                    return Some(event);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Observer fanning events out to per-execution subscription queues.
///
/// Delivery is at-least-once per queue. Terminal events close the
/// execution's queues after delivery. When a
/// [`MessageRouter`](crate::ports::MessageRouter) is attached, every
/// event is also broadcast through it for external consumers.
pub struct StreamingObserver {
    queues: Mutex<HashMap<String, Vec<Arc<EventSubscription>>>>,
    capacity: usize,
    router: Option<Arc<dyn crate::ports::MessageRouter>>,
}

impl StreamingObserver {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            capacity,
            router: None,
        }
    }

    /// Also broadcast events through a message router.
    pub fn with_router(mut self, router: Arc<dyn crate::ports::MessageRouter>) -> Self {
        self.router = Some(router);
        self
    }

    /// Subscribe to one execution's event stream.
    pub async fn subscribe(&self, execution_id: &str) -> Arc<EventSubscription> {
        let subscription = Arc::new(EventSubscription::new(
            execution_id.to_string(),
            self.capacity,
        ));
        self.queues
            .lock()
            .await
            .entry(execution_id.to_string())
            .or_default()
            .push(subscription.clone());
        subscription
    }
}

impl Default for StreamingObserver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionObserver for StreamingObserver {
    async fn on_event(&self, event: &ExecutionEvent) {
        if let Some(router) = &self.router {
            match serde_json::to_value(event) {
                Ok(wire) => {
                    if let Err(error) = router
                        .broadcast_to_execution(event.execution_id(), wire)
                        .await
                    {
                        tracing::warn!(%error, "message router broadcast failed");
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "failed to serialize event for broadcast");
                }
            }
        }

        let subscriptions = {
            let queues = self.queues.lock().await;
            queues.get(event.execution_id()).cloned().unwrap_or_default()
        };
        for subscription in &subscriptions {
            subscription.push(event.clone()).await;
        }
        if event.is_terminal() {
            let removed = self.queues.lock().await.remove(event.execution_id());
            for subscription in removed.into_iter().flatten() {
                subscription.close().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use diaflow_state::InMemoryStateStore;
    use serde_json::json;

    fn node_update(execution: &str, node: &str, state: NodeExecutionStatus) -> ExecutionEvent {
        ExecutionEvent::NodeUpdate {
            execution_id: execution.into(),
            node_id: node.into(),
            state,
            output: None,
            skip_reason: None,
            started_at: None,
            ended_at: None,
            token_usage: None,
            retry_count: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_state_store_observer_persists_lifecycle() {
        let store = Arc::new(InMemoryStateStore::new());
        let bus = ObserverBus::new(vec![Arc::new(StateStoreObserver::new(store.clone()))]);

        bus.publish(ExecutionEvent::ExecutionStart {
            execution_id: "e1".into(),
            diagram_id: Some("d1".into()),
            timestamp: Utc::now(),
        })
        .await;
        bus.publish(node_update("e1", "n1", NodeExecutionStatus::Running))
            .await;
        bus.publish(ExecutionEvent::NodeUpdate {
            execution_id: "e1".into(),
            node_id: "n1".into(),
            state: NodeExecutionStatus::Completed,
            output: Some(json!(6)),
            skip_reason: None,
            started_at: None,
            ended_at: None,
            token_usage: None,
            retry_count: None,
            timestamp: Utc::now(),
        })
        .await;
        bus.publish(ExecutionEvent::ExecutionComplete {
            execution_id: "e1".into(),
            status: ExecutionStatus::Completed,
        })
        .await;

        let state = store.get_state("e1").await.unwrap().unwrap();
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert_eq!(state.get_node_output("n1"), Some(&json!(6)));
    }

    #[tokio::test]
    async fn test_streaming_observer_delivers_in_order() {
        let streaming = Arc::new(StreamingObserver::new());
        let subscription = streaming.subscribe("e1").await;
        let bus = ObserverBus::new(vec![streaming.clone()]);

        bus.publish(node_update("e1", "a", NodeExecutionStatus::Running))
            .await;
        bus.publish(node_update("e1", "b", NodeExecutionStatus::Running))
            .await;
        bus.publish(ExecutionEvent::ExecutionComplete {
            execution_id: "e1".into(),
            status: ExecutionStatus::Completed,
        })
        .await;

        let mut nodes = Vec::new();
        while let Some(event) = subscription.recv().await {
            if let ExecutionEvent::NodeUpdate { node_id, .. } = event {
                nodes.push(node_id);
            }
        }
        assert_eq!(nodes, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_queue_overflow_drops_oldest_with_marker() {
        let streaming = Arc::new(StreamingObserver::with_capacity(2));
        let subscription = streaming.subscribe("e1").await;

        for node in ["a", "b", "c", "d"] {
            streaming
                .on_event(&node_update("e1", node, NodeExecutionStatus::Running))
                .await;
        }

        // First delivery is the overflow marker, then the surviving tail.
        match subscription.recv().await.unwrap() {
            ExecutionEvent::QueueOverflow { dropped, .. } => assert_eq!(dropped, 2),
            other => panic!("expected overflow marker, got {other:?}"),
        }
        match subscription.recv().await.unwrap() {
            ExecutionEvent::NodeUpdate { node_id, .. } => assert_eq!(node_id, "c"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_events_keyed_by_execution() {
        let streaming = Arc::new(StreamingObserver::new());
        let sub_one = streaming.subscribe("e1").await;
        let _sub_two = streaming.subscribe("e2").await;

        streaming
            .on_event(&node_update("e1", "only-for-e1", NodeExecutionStatus::Running))
            .await;

        let event = sub_one.recv().await.unwrap();
        assert_eq!(event.execution_id(), "e1");
    }

    #[test]
    fn test_wire_shape() {
        let event = ExecutionEvent::ExecutionComplete {
            execution_id: "e1".into(),
            status: ExecutionStatus::Completed,
        };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire["type"], "execution_complete");
        assert_eq!(wire["status"], "completed");
    }
}
