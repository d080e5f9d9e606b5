//! Per-execution mutable state: node statuses, outputs, counters, tokens
//!
//! This module defines the execution state model shared between the engine
//! (the single writer) and observers (readers via snapshots or through the
//! [`StateStore`](crate::store::StateStore) port).
//!
//! # Overview
//!
//! One [`ExecutionState`] exists per `execution_id`. It tracks:
//!
//! - **Execution status** - pending → running → completed/failed/cancelled
//! - **Per-node state** - status, output, error, timing, iteration counter
//! - **Token totals** - aggregate of all handler-reported token usage
//!
//! The engine holds exclusive write access; observers never mutate the
//! state directly. [`ExecutionState::snapshot`] produces a deep copy
//! suitable for persistence or inspection.
//!
//! # Lifecycle
//!
//! ```text
//! create(execution_id)          status = Pending
//!        │
//!        ▼ update_status(Running)
//! ┌──────────────────────────────────────────────┐
//! │  per node:                                   │
//! │    mark_node_running(n)                      │
//! │    mark_node_complete(n, out) / _failed /    │
//! │    mark_node_skipped(n, reason)              │
//! │    update_token_usage(delta)                 │
//! └──────────────────────────────────────────────┘
//!        │
//!        ▼ update_status(Completed | Failed | Cancelled)
//! finalized (completed_at set)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Overall status of a diagram execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created but not yet started
    Pending,
    /// Engine is actively dispatching nodes
    Running,
    /// All reachable nodes settled without a fatal error
    Completed,
    /// At least one node failed fatally (or fail-fast aborted the run)
    Failed,
    /// Execution was cancelled externally before settling
    Cancelled,
}

impl ExecutionStatus {
    /// Whether this status is terminal (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionStatus {
    /// Not yet dispatched
    Pending,
    /// Handler currently in flight
    Running,
    /// Handler returned successfully
    Completed,
    /// Handler failed fatally (retries exhausted or non-retryable)
    Failed,
    /// Scheduler skipped the node; see [`SkipReason`]
    Skipped,
}

/// Structured reason a node was skipped by the scheduler.
///
/// Skips are policy outcomes, never fatal: a skipped node's last output (if
/// any) becomes the passthrough value for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Iteration cap reached (`max_iteration` exhausted)
    MaxIterations,
    /// Only inbound path goes through a condition branch that was not taken
    BranchNotTaken,
    /// Only inbound path goes through a node that failed
    /// (continue-on-error policy)
    UpstreamFailed,
    /// The handler itself requested the skip via output metadata
    HandlerRequested,
    /// The circuit breaker for the node's type is open
    CircuitOpen,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::MaxIterations => "max_iterations",
            Self::BranchNotTaken => "branch_not_taken",
            Self::UpstreamFailed => "upstream_failed",
            Self::HandlerRequested => "handler_requested",
            Self::CircuitOpen => "circuit_open",
        };
        f.write_str(s)
    }
}

/// Aggregate token counts reported by LLM-backed handlers.
///
/// Accumulated at the scheduler level so `token_totals` on the execution is
/// authoritative, independent of which observers are attached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt-side tokens
    pub input: u64,
    /// Completion-side tokens
    pub output: u64,
    /// Tokens served from a provider-side cache, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached: Option<u64>,
}

impl TokenUsage {
    /// Create a usage record with the given input/output counts.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            cached: None,
        }
    }

    /// Total tokens across all categories.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cached.unwrap_or(0)
    }

    /// Add another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input += other.input;
        self.output += other.output;
        if let Some(cached) = other.cached {
            *self.cached.get_or_insert(0) += cached;
        }
    }
}

/// Recorded state of a single node within an execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    /// Current node status
    pub status: NodeExecutionStatus,
    /// Last output produced by the node, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Error message when `status == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured skip reason when `status == Skipped`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    /// When the most recent dispatch started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the most recent dispatch settled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Number of completed iterations (relevant for looping nodes)
    #[serde(default)]
    pub iteration_count: u32,
    /// Tokens consumed by this node across all iterations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<TokenUsage>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            status: NodeExecutionStatus::Pending,
            output: None,
            error: None,
            skip_reason: None,
            started_at: None,
            ended_at: None,
            iteration_count: 0,
            token_usage: None,
        }
    }
}

/// Mutable per-run record of node statuses, outputs and aggregate tokens.
///
/// Created by the engine when an execution starts, mutated by the scheduler
/// as nodes settle, finalized on terminal status and persisted through the
/// [`StateStore`](crate::store::StateStore) port.
///
/// # Ownership
///
/// The engine is the single writer. Readers must go through
/// [`snapshot`](Self::snapshot) or the state store.
///
/// # Examples
///
/// ```rust
/// use diaflow_state::{ExecutionState, ExecutionStatus};
/// use serde_json::json;
///
/// let mut state = ExecutionState::create("exec-1", Some("diagram-1"));
/// state.update_status(ExecutionStatus::Running, None);
/// state.mark_node_running("node_a");
/// state.mark_node_complete("node_a", json!({"result": 6}));
///
/// assert!(state.is_node_complete("node_a"));
/// assert_eq!(state.get_node_output("node_a"), Some(&json!({"result": 6})));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Opaque execution identifier
    pub execution_id: String,
    /// Diagram this execution was started from, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram_id: Option<String>,
    /// Overall execution status
    pub status: ExecutionStatus,
    /// Per-node states keyed by node id
    #[serde(default)]
    pub node_states: HashMap<String, NodeState>,
    /// Scheduler-aggregated token totals
    #[serde(default)]
    pub token_totals: TokenUsage,
    /// When the execution was created
    pub started_at: DateTime<Utc>,
    /// Set once the execution reaches a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Execution-level error when `status == Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Node currently being dispatched (monitoring aid)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node: Option<String>,
}

impl ExecutionState {
    /// Create a fresh execution state in `Pending` status.
    pub fn create(execution_id: impl Into<String>, diagram_id: Option<&str>) -> Self {
        Self {
            execution_id: execution_id.into(),
            diagram_id: diagram_id.map(str::to_string),
            status: ExecutionStatus::Pending,
            node_states: HashMap::new(),
            token_totals: TokenUsage::default(),
            started_at: Utc::now(),
            completed_at: None,
            error: None,
            current_node: None,
        }
    }

    /// Record the node currently being dispatched.
    pub fn set_current_node(&mut self, node_id: impl Into<String>) {
        self.current_node = Some(node_id.into());
    }

    /// Transition a node to `Running` and stamp its start time.
    pub fn mark_node_running(&mut self, node_id: &str) {
        let entry = self.node_states.entry(node_id.to_string()).or_default();
        entry.status = NodeExecutionStatus::Running;
        entry.started_at = Some(Utc::now());
        entry.ended_at = None;
        entry.error = None;
    }

    /// Mark a node as completed, store its output and bump its iteration
    /// counter.
    pub fn mark_node_complete(&mut self, node_id: &str, output: serde_json::Value) {
        let entry = self.node_states.entry(node_id.to_string()).or_default();
        entry.status = NodeExecutionStatus::Completed;
        entry.output = Some(output);
        entry.ended_at = Some(Utc::now());
        entry.iteration_count += 1;
        if self.current_node.as_deref() == Some(node_id) {
            self.current_node = None;
        }
    }

    /// Mark a node as failed with an error message.
    pub fn mark_node_failed(&mut self, node_id: &str, error: impl Into<String>) {
        let entry = self.node_states.entry(node_id.to_string()).or_default();
        entry.status = NodeExecutionStatus::Failed;
        entry.error = Some(error.into());
        entry.ended_at = Some(Utc::now());
        if self.current_node.as_deref() == Some(node_id) {
            self.current_node = None;
        }
    }

    /// Mark a node as skipped with a structured reason.
    ///
    /// The node's last output (if any) is left in place as the passthrough
    /// value for downstream consumers.
    pub fn mark_node_skipped(&mut self, node_id: &str, reason: SkipReason) {
        let entry = self.node_states.entry(node_id.to_string()).or_default();
        entry.status = NodeExecutionStatus::Skipped;
        entry.skip_reason = Some(reason);
        entry.ended_at = Some(Utc::now());
    }

    /// Whether the node has completed at least once.
    pub fn is_node_complete(&self, node_id: &str) -> bool {
        self.node_states
            .get(node_id)
            .map(|s| s.status == NodeExecutionStatus::Completed)
            .unwrap_or(false)
    }

    /// Last output recorded for the node, if any.
    pub fn get_node_output(&self, node_id: &str) -> Option<&serde_json::Value> {
        self.node_states.get(node_id).and_then(|s| s.output.as_ref())
    }

    /// State of a single node, if recorded.
    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }

    /// Accumulate handler-reported token usage into the execution totals
    /// and the node's own tally.
    pub fn update_token_usage(&mut self, node_id: &str, delta: &TokenUsage) {
        self.token_totals.add(delta);
        let entry = self.node_states.entry(node_id.to_string()).or_default();
        entry.token_usage.get_or_insert_with(TokenUsage::default).add(delta);
    }

    /// Transition the execution status, stamping `completed_at` when the
    /// new status is terminal. Transitions out of a terminal status are
    /// ignored and logged.
    pub fn update_status(&mut self, status: ExecutionStatus, error: Option<String>) {
        if self.status.is_terminal() {
            tracing::warn!(
                execution_id = %self.execution_id,
                from = ?self.status,
                to = ?status,
                "ignoring status transition out of terminal state"
            );
            return;
        }
        self.status = status;
        if let Some(err) = error {
            self.error = Some(err);
        }
        if status.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.current_node = None;
        }
    }

    /// Deep copy suitable for persistence or cross-task inspection.
    pub fn snapshot(&self) -> ExecutionState {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_defaults() {
        let state = ExecutionState::create("exec-1", Some("d-1"));
        assert_eq!(state.status, ExecutionStatus::Pending);
        assert_eq!(state.diagram_id.as_deref(), Some("d-1"));
        assert!(state.node_states.is_empty());
        assert_eq!(state.token_totals.total(), 0);
    }

    #[test]
    fn test_mark_complete_stores_output_and_counts_iterations() {
        let mut state = ExecutionState::create("exec-1", None);
        state.mark_node_running("n1");
        state.mark_node_complete("n1", json!(42));

        assert!(state.is_node_complete("n1"));
        assert_eq!(state.get_node_output("n1"), Some(&json!(42)));
        assert_eq!(state.node_state("n1").unwrap().iteration_count, 1);

        state.mark_node_complete("n1", json!(43));
        assert_eq!(state.node_state("n1").unwrap().iteration_count, 2);
        assert_eq!(state.get_node_output("n1"), Some(&json!(43)));
    }

    #[test]
    fn test_skip_preserves_last_output() {
        let mut state = ExecutionState::create("exec-1", None);
        state.mark_node_complete("n1", json!("final"));
        state.mark_node_skipped("n1", SkipReason::MaxIterations);

        let node = state.node_state("n1").unwrap();
        assert_eq!(node.status, NodeExecutionStatus::Skipped);
        assert_eq!(node.skip_reason, Some(SkipReason::MaxIterations));
        assert_eq!(state.get_node_output("n1"), Some(&json!("final")));
    }

    #[test]
    fn test_token_totals_accumulate() {
        let mut state = ExecutionState::create("exec-1", None);
        state.update_token_usage("n1", &TokenUsage::new(100, 20));
        state.update_token_usage(
            "n2",
            &TokenUsage {
                input: 50,
                output: 10,
                cached: Some(5),
            },
        );

        assert_eq!(state.token_totals.input, 150);
        assert_eq!(state.token_totals.output, 30);
        assert_eq!(state.token_totals.cached, Some(5));
        assert_eq!(state.node_state("n1").unwrap().token_usage.unwrap().input, 100);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let mut state = ExecutionState::create("exec-1", None);
        state.update_status(ExecutionStatus::Running, None);
        state.update_status(ExecutionStatus::Completed, None);
        assert!(state.completed_at.is_some());

        state.update_status(ExecutionStatus::Failed, Some("late".into()));
        assert_eq!(state.status, ExecutionStatus::Completed);
        assert!(state.error.is_none());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut state = ExecutionState::create("exec-1", None);
        state.mark_node_complete("n1", json!(1));
        let snap = state.snapshot();
        state.mark_node_complete("n1", json!(2));

        assert_eq!(snap.get_node_output("n1"), Some(&json!(1)));
        assert_eq!(state.get_node_output("n1"), Some(&json!(2)));
    }
}
