//! Execution context handed to node handlers.

use crate::diagram::ExecutableDiagram;
use crate::events::ObserverBus;
use crate::memory::ConversationMemory;
use crate::ports::InteractiveHandler;
use crate::services::ServiceRegistry;
use super::scheduler::ExecutionView;
use std::sync::Arc;
use tokio::sync::watch;

/// Node output contract between handlers and the scheduler.
///
/// The output value is opaque to the scheduler except for the fields
/// below: a condition result for branch gating, token usage that the
/// scheduler aggregates into the execution totals, and a
/// handler-requested skip flag.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    /// The value delivered to downstream consumers
    pub value: serde_json::Value,
    /// Branch decision (condition nodes only)
    pub condition_result: Option<bool>,
    /// Token usage reported by LLM-backed handlers
    pub token_usage: Option<diaflow_state::TokenUsage>,
    /// Handler-requested skip: the scheduler settles the node as
    /// skipped instead of completed
    pub skipped: bool,
    /// Free-form metadata carried on the node_update event
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NodeOutput {
    /// Plain value output.
    pub fn value(value: serde_json::Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }

    /// Condition output: passthrough value plus a branch decision.
    pub fn condition(value: serde_json::Value, result: bool) -> Self {
        Self {
            value,
            condition_result: Some(result),
            ..Default::default()
        }
    }

    pub fn with_token_usage(mut self, usage: diaflow_state::TokenUsage) -> Self {
        self.token_usage = Some(usage);
        self
    }

    /// Handler-requested skip.
    pub fn skip() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Everything a handler may touch during one invocation.
///
/// Contexts are cheap to clone (all `Arc`s plus a snapshot view) and are
/// rebuilt per dispatch so the view reflects state at dispatch time.
#[derive(Clone)]
pub struct ExecutionContext {
    /// Execution this dispatch belongs to
    pub execution_id: String,
    /// Node being executed
    pub current_node_id: String,
    /// 0-based iteration of this dispatch
    pub iteration: u32,
    /// The compiled diagram
    pub diagram: Arc<ExecutableDiagram>,
    /// Typed service lookup
    pub services: Arc<ServiceRegistry>,
    /// Per-person conversation memory
    pub memory: Arc<ConversationMemory>,
    /// Event bus (interactive prompts, retry updates)
    pub events: Arc<ObserverBus>,
    /// Interactive bridge for user_response nodes, when attached
    pub interactive: Option<Arc<dyn InteractiveHandler>>,
    /// Snapshot of iteration counts, skip reasons and outputs at
    /// dispatch time
    pub view: ExecutionView,
    /// Cooperative cancellation signal
    pub cancel: watch::Receiver<bool>,
}

impl ExecutionContext {
    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }
}
