//! The execution engine: tick loop, dispatch, retry, failure policy
//!
//! [`ExecutionEngine`] drives one compiled diagram through one
//! execution:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  tick loop                                                 │
//! │                                                            │
//! │  1. settle policy skips (iteration caps, open circuits)    │
//! │     until the ready set is stable                          │
//! │  2. dispatch every ready node as an async task             │
//! │     (inputs resolved, running event published)             │
//! │  3. nothing ready, nothing in flight → terminate           │
//! │  4. await one task settlement, commit it, goto 1           │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! Commits are serialized through the loop: node handlers run
//! concurrently, but state mutation and event publication happen one
//! settlement at a time, so observers see a consistent,
//! monotonically-growing state whose event order equals commit order.
//!
//! # Failure model
//!
//! Transient errors retry with exponential backoff (observable as
//! `node_update` events carrying `retry_count`); validation and handler
//! errors fail the node. Under [`ErrorPolicy::FailFast`] a node failure
//! aborts the run, cancelling in-flight tasks cooperatively; under
//! [`ErrorPolicy::ContinueOnError`] descendants reachable only through
//! the failed node are skipped as `upstream_failed` and the run
//! continues, finishing `failed` once everything settles.

use crate::diagram::ExecutableDiagram;
use crate::error::{DiagramError, Result};
use crate::events::{ExecutionEvent, ObserverBus};
use crate::memory::ConversationMemory;
use crate::nodes::ExecutableNode;
use crate::ports::InteractiveHandler;
use crate::retry::RetryPolicy;
use crate::services::ServiceRegistry;
use super::breaker::{BreakerConfig, CircuitBreaker};
use super::context::{ExecutionContext, NodeOutput};
use super::handlers::{HandlerRegistry, NodeHandler};
use super::inputs::{resolve_inputs, InputMap};
use super::scheduler::Scheduler;
use chrono::Utc;
use diaflow_state::{ExecutionState, ExecutionStatus, NodeExecutionStatus, SkipReason};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Engine-level error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Abort the execution on the first node failure
    #[default]
    FailFast,
    /// Mark the node failed, skip its exclusive descendants, continue
    ContinueOnError,
}

/// Per-execution engine configuration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub error_policy: ErrorPolicy,
    /// Retry policy for transient node failures
    pub retry: RetryPolicy,
    /// Per-dispatch handler timeout; `None` disables the guard
    pub node_timeout: Option<Duration>,
    /// Runaway guard: hard cap on scheduler ticks per execution
    pub max_ticks: usize,
    /// Optional per-node-type circuit breaker
    pub breaker: Option<BreakerConfig>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::FailFast,
            retry: RetryPolicy::default(),
            node_timeout: Some(Duration::from_secs(60)),
            max_ticks: 10_000,
            breaker: None,
        }
    }
}

type Settlement = (String, std::result::Result<NodeOutput, DiagramError>);

/// Executes one compiled diagram against a service registry, publishing
/// lifecycle events to an observer bus.
///
/// One engine instance drives one execution at a time; concurrent
/// executions use independent engines sharing the immutable diagram and
/// thread-safe services.
///
/// # Examples
///
/// ```rust,ignore
/// let engine = ExecutionEngine::new(diagram, services)
///     .with_observers(vec![Arc::new(StateStoreObserver::new(store))])
///     .with_options(EngineOptions::default());
/// let state = engine.run("exec-1").await?;
/// assert_eq!(state.status, ExecutionStatus::Completed);
/// ```
pub struct ExecutionEngine {
    diagram: Arc<ExecutableDiagram>,
    services: Arc<ServiceRegistry>,
    handlers: Arc<HandlerRegistry>,
    bus: Arc<ObserverBus>,
    memory: Arc<ConversationMemory>,
    interactive: Option<Arc<dyn InteractiveHandler>>,
    options: EngineOptions,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl ExecutionEngine {
    pub fn new(diagram: Arc<ExecutableDiagram>, services: Arc<ServiceRegistry>) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            diagram,
            services,
            handlers: Arc::new(HandlerRegistry::with_defaults()),
            bus: Arc::new(ObserverBus::empty()),
            memory: Arc::new(ConversationMemory::new()),
            interactive: None,
            options: EngineOptions::default(),
            cancel_tx,
            cancel_rx,
        }
    }

    pub fn with_handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = Arc::new(handlers);
        self
    }

    pub fn with_observers(
        mut self,
        observers: Vec<Arc<dyn crate::events::ExecutionObserver>>,
    ) -> Self {
        self.bus = Arc::new(ObserverBus::new(observers));
        self
    }

    pub fn with_memory(mut self, memory: Arc<ConversationMemory>) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_interactive(mut self, interactive: Arc<dyn InteractiveHandler>) -> Self {
        self.interactive = Some(interactive);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Conversation memory used by this engine.
    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    /// Request cooperative cancellation. In-flight handlers are
    /// signalled; the execution transitions to `cancelled` once all
    /// tasks settle.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Run under a freshly generated execution id.
    pub async fn run_auto(&self) -> Result<ExecutionState> {
        let execution_id = format!("exec_{}", uuid::Uuid::new_v4());
        self.run(&execution_id).await
    }

    /// Run the diagram to settlement and return the final state.
    pub async fn run(&self, execution_id: &str) -> Result<ExecutionState> {
        // Defensive invariant re-check before touching any state.
        let invariant_errors = self.diagram.validate();
        if !invariant_errors.is_empty() {
            return Err(DiagramError::Internal(format!(
                "compiled diagram failed validation: {}",
                invariant_errors.join("; ")
            )));
        }

        let mut state = ExecutionState::create(execution_id, self.diagram.metadata.id.as_deref());
        self.bus
            .publish(ExecutionEvent::ExecutionStart {
                execution_id: execution_id.to_string(),
                diagram_id: self.diagram.metadata.id.clone(),
                timestamp: Utc::now(),
            })
            .await;
        state.update_status(ExecutionStatus::Running, None);

        let mut scheduler = Scheduler::new(self.diagram.clone());
        let breaker = self
            .options
            .breaker
            .clone()
            .map(|config| Arc::new(CircuitBreaker::new(config)));
        let mut inflight: FuturesUnordered<BoxFuture<'static, Settlement>> =
            FuturesUnordered::new();
        let mut inflight_ids: HashSet<String> = HashSet::new();

        let mut ticks = 0usize;
        let mut abort_error: Option<String> = None;
        let mut cancelled = false;

        'main: loop {
            if *self.cancel_rx.borrow() {
                cancelled = true;
                break 'main;
            }
            ticks += 1;
            if ticks > self.options.max_ticks {
                abort_error = Some(format!(
                    "maximum scheduler ticks ({}) exceeded",
                    self.options.max_ticks
                ));
                break 'main;
            }

            // Settle policy skips until the ready set is stable, then
            // dispatch everything that is ready.
            loop {
                let decisions = scheduler.tick(&inflight_ids);
                if decisions.skips.is_empty() && decisions.dispatch.is_empty() {
                    break;
                }
                let mut settled_skip = false;

                for (node_id, reason) in decisions.skips {
                    scheduler.mark_skipped(&node_id, reason);
                    self.record_skip(&mut state, execution_id, &node_id, reason).await;
                    settled_skip = true;
                }

                for node_id in decisions.dispatch {
                    let node = self
                        .diagram
                        .get_node(&node_id)
                        .expect("dispatch targets exist in the diagram")
                        .clone();

                    if let Some(breaker) = &breaker {
                        if breaker.is_open(node.node_type()) {
                            scheduler.mark_skipped(&node_id, SkipReason::CircuitOpen);
                            self.record_skip(&mut state, execution_id, &node_id, SkipReason::CircuitOpen)
                                .await;
                            settled_skip = true;
                            continue;
                        }
                    }

                    let handler = match self.handlers.get(node.node_type()) {
                        Ok(handler) => handler,
                        Err(error) => {
                            // Configuration errors surface at dispatch time.
                            self.record_failure(&mut state, execution_id, &node_id, &error)
                                .await;
                            scheduler.mark_failed(&node_id);
                            match self.options.error_policy {
                                ErrorPolicy::FailFast => {
                                    abort_error = Some(error.to_string());
                                    break 'main;
                                }
                                ErrorPolicy::ContinueOnError => {
                                    let skipped = scheduler.cascade_upstream_failure(&node_id);
                                    for skipped_id in skipped {
                                        self.record_skip(
                                            &mut state,
                                            execution_id,
                                            &skipped_id,
                                            SkipReason::UpstreamFailed,
                                        )
                                        .await;
                                    }
                                    settled_skip = true;
                                    continue;
                                }
                            }
                        }
                    };

                    let inputs = resolve_inputs(&self.diagram, &scheduler, &node);
                    state.set_current_node(&node_id);
                    state.mark_node_running(&node_id);
                    self.bus
                        .publish(node_update_event(
                            execution_id,
                            &node_id,
                            NodeExecutionStatus::Running,
                            None,
                            None,
                            None,
                            None,
                        ))
                        .await;

                    let ctx = ExecutionContext {
                        execution_id: execution_id.to_string(),
                        current_node_id: node_id.clone(),
                        iteration: scheduler.iterations_of(&node_id),
                        diagram: self.diagram.clone(),
                        services: self.services.clone(),
                        memory: self.memory.clone(),
                        events: self.bus.clone(),
                        interactive: self.interactive.clone(),
                        view: scheduler.view(),
                        cancel: self.cancel_rx.clone(),
                    };
                    scheduler.mark_running(&node_id);
                    inflight_ids.insert(node_id.clone());
                    inflight.push(dispatch_task(
                        node,
                        handler,
                        ctx,
                        inputs,
                        self.options.retry.clone(),
                        self.options.node_timeout,
                    ));
                }

                if !settled_skip {
                    break;
                }
            }

            if inflight.is_empty() {
                break 'main; // settled: nothing ready, nothing running
            }

            let Some((node_id, result)) = inflight.next().await else {
                break 'main;
            };
            inflight_ids.remove(&node_id);
            let node_type = self.diagram.get_node(&node_id).map(|n| n.node_type());

            match result {
                Ok(output) if output.skipped => {
                    scheduler.mark_skipped(&node_id, SkipReason::HandlerRequested);
                    self.record_skip(&mut state, execution_id, &node_id, SkipReason::HandlerRequested)
                        .await;
                }
                Ok(output) => {
                    if let (Some(breaker), Some(node_type)) = (&breaker, node_type) {
                        breaker.record_success(node_type);
                    }
                    if let Some(usage) = &output.token_usage {
                        state.update_token_usage(&node_id, usage);
                    }
                    let settlements = scheduler.mark_completed(
                        &node_id,
                        output.value.clone(),
                        output.condition_result,
                    );
                    state.mark_node_complete(&node_id, output.value.clone());
                    self.bus
                        .publish(node_update_event(
                            execution_id,
                            &node_id,
                            NodeExecutionStatus::Completed,
                            Some(output.value),
                            None,
                            output.token_usage,
                            None,
                        ))
                        .await;
                    for (skipped_id, reason) in settlements {
                        self.record_skip(&mut state, execution_id, &skipped_id, reason)
                            .await;
                    }
                }
                Err(DiagramError::Cancelled) => {
                    cancelled = true;
                    break 'main;
                }
                Err(error) => {
                    if let (Some(breaker), Some(node_type)) = (&breaker, node_type) {
                        breaker.record_failure(node_type);
                    }
                    self.record_failure(&mut state, execution_id, &node_id, &error)
                        .await;
                    scheduler.mark_failed(&node_id);
                    match self.options.error_policy {
                        ErrorPolicy::FailFast => {
                            abort_error = Some(error.to_string());
                            break 'main;
                        }
                        ErrorPolicy::ContinueOnError => {
                            let skipped = scheduler.cascade_upstream_failure(&node_id);
                            for skipped_id in skipped {
                                self.record_skip(
                                    &mut state,
                                    execution_id,
                                    &skipped_id,
                                    SkipReason::UpstreamFailed,
                                )
                                .await;
                            }
                        }
                    }
                }
            }
        }

        // Signal and drain whatever is still in flight (fail-fast abort
        // or cancellation); settlements are discarded.
        if !inflight.is_empty() {
            let _ = self.cancel_tx.send(true);
            while inflight.next().await.is_some() {}
        }

        let final_status = if cancelled {
            ExecutionStatus::Cancelled
        } else if abort_error.is_some() || scheduler.any_failed() {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };
        state.update_status(final_status, abort_error.clone());

        match &abort_error {
            Some(error) => {
                self.bus
                    .publish(ExecutionEvent::ExecutionError {
                        execution_id: execution_id.to_string(),
                        error: error.clone(),
                    })
                    .await;
            }
            None => {
                self.bus
                    .publish(ExecutionEvent::ExecutionComplete {
                        execution_id: execution_id.to_string(),
                        status: final_status,
                    })
                    .await;
            }
        }

        tracing::info!(
            execution_id,
            status = ?final_status,
            tokens = state.token_totals.total(),
            "execution settled"
        );
        Ok(state)
    }

    async fn record_skip(
        &self,
        state: &mut ExecutionState,
        execution_id: &str,
        node_id: &str,
        reason: SkipReason,
    ) {
        state.mark_node_skipped(node_id, reason);
        self.bus
            .publish(node_update_event(
                execution_id,
                node_id,
                NodeExecutionStatus::Skipped,
                None,
                Some(reason),
                None,
                None,
            ))
            .await;
    }

    async fn record_failure(
        &self,
        state: &mut ExecutionState,
        execution_id: &str,
        node_id: &str,
        error: &DiagramError,
    ) {
        state.mark_node_failed(node_id, error.to_string());
        self.bus
            .publish(ExecutionEvent::NodeError {
                execution_id: execution_id.to_string(),
                node_id: node_id.to_string(),
                error: error.to_string(),
                timestamp: Utc::now(),
            })
            .await;
    }
}

fn node_update_event(
    execution_id: &str,
    node_id: &str,
    status: NodeExecutionStatus,
    output: Option<serde_json::Value>,
    skip_reason: Option<SkipReason>,
    token_usage: Option<diaflow_state::TokenUsage>,
    retry_count: Option<usize>,
) -> ExecutionEvent {
    ExecutionEvent::NodeUpdate {
        execution_id: execution_id.to_string(),
        node_id: node_id.to_string(),
        state: status,
        output,
        skip_reason,
        started_at: None,
        ended_at: None,
        token_usage,
        retry_count,
        timestamp: Utc::now(),
    }
}

/// One dispatch as a boxed task: handler invocation guarded by the
/// per-node timeout, transient failures retried with backoff, each retry
/// observable as a `node_update` event carrying the retry count.
fn dispatch_task(
    node: ExecutableNode,
    handler: Arc<dyn NodeHandler>,
    ctx: ExecutionContext,
    inputs: InputMap,
    retry: RetryPolicy,
    timeout: Option<Duration>,
) -> BoxFuture<'static, Settlement> {
    Box::pin(async move {
        let node_id = node.id().to_string();
        let mut attempt = 0usize;
        let mut cancel = ctx.cancel.clone();

        loop {
            let invocation = handler.execute(&node, &ctx, &inputs);
            let result = tokio::select! {
                biased;
                _ = cancel.changed() => return (node_id, Err(DiagramError::Cancelled)),
                outcome = async {
                    match timeout {
                        Some(limit) => match tokio::time::timeout(limit, invocation).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(DiagramError::Timeout {
                                operation: node.id().to_string(),
                                duration_ms: limit.as_millis() as u64,
                            }),
                        },
                        None => invocation.await,
                    }
                } => outcome,
            };

            match result {
                Ok(output) => return (node_id, Ok(output)),
                Err(error) if error.is_retryable() && retry.should_retry(attempt + 1) => {
                    attempt += 1;
                    tracing::debug!(
                        node_id = %node_id,
                        attempt,
                        %error,
                        "retrying transient node failure"
                    );
                    ctx.events
                        .publish(node_update_event(
                            &ctx.execution_id,
                            &node_id,
                            NodeExecutionStatus::Running,
                            None,
                            None,
                            None,
                            Some(attempt),
                        ))
                        .await;
                    tokio::select! {
                        biased;
                        _ = cancel.changed() => return (node_id, Err(DiagramError::Cancelled)),
                        _ = tokio::time::sleep(retry.calculate_delay(attempt - 1)) => {}
                    }
                }
                Err(error) => return (node_id, Err(error)),
            }
        }
    })
}
