//! Pluggable execution-state persistence
//!
//! This module defines the **[`StateStore`]** trait - the port through which
//! the engine's observers persist execution state - plus
//! [`InMemoryStateStore`], a reference implementation backed by a
//! thread-safe map.
//!
//! # Overview
//!
//! A state store receives every lifecycle transition of every execution:
//!
//! - `create_execution` - called once per run; MUST be idempotent
//! - `update_node_status` - node transitions (running/completed/failed/skipped)
//! - `update_node_output` - node outputs and token usage
//! - `update_status` - execution-level transitions
//! - `persist` - best-effort durability barrier before an execution-terminal
//!   event is acknowledged
//!
//! Backends can be databases, files, or anything else; implementations must
//! be `Send + Sync` and safe under concurrent executions.
//!
//! # Quick Start
//!
//! ```rust
//! use diaflow_state::{InMemoryStateStore, StateStore, ExecutionStatus};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> diaflow_state::Result<()> {
//! let store = InMemoryStateStore::new();
//! store.create_execution("exec-1", Some("diagram-1")).await?;
//! store.update_status("exec-1", ExecutionStatus::Running, None).await?;
//!
//! let state = store.get_state("exec-1").await?.unwrap();
//! assert_eq!(state.status, ExecutionStatus::Running);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, StateError};
use crate::state::{
    ExecutionState, ExecutionStatus, NodeExecutionStatus, SkipReason, TokenUsage,
};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Port for persisting execution state.
///
/// Implementations must tolerate repeated `create_execution` calls for the
/// same id (replay) and must serialize writes per execution so observers see
/// a monotonically-growing state.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Create the execution record. Idempotent: if the execution already
    /// exists the call is a no-op (implementations should log the replay).
    async fn create_execution(&self, execution_id: &str, diagram_id: Option<&str>) -> Result<()>;

    /// Record a node status transition.
    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeExecutionStatus,
        error: Option<String>,
        skip_reason: Option<SkipReason>,
    ) -> Result<()>;

    /// Record a node output together with any token usage it reported.
    async fn update_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: serde_json::Value,
        token_usage: Option<TokenUsage>,
    ) -> Result<()>;

    /// Record an execution-level status transition.
    async fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Fetch a snapshot of the execution state, if it exists.
    async fn get_state(&self, execution_id: &str) -> Result<Option<ExecutionState>>;

    /// Durability barrier: flush buffered writes for the execution.
    ///
    /// Called before an execution-terminal event is acknowledged. The
    /// default is a no-op for backends that write through synchronously.
    async fn persist(&self, execution_id: &str) -> Result<()> {
        let _ = execution_id;
        Ok(())
    }
}

/// In-memory [`StateStore`] for development and testing.
///
/// All state lives in a `tokio::sync::RwLock<HashMap>`; data is lost on
/// restart. Each execution id maps to an independent [`ExecutionState`].
pub struct InMemoryStateStore {
    executions: RwLock<HashMap<String, ExecutionState>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            executions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of executions currently tracked.
    pub async fn len(&self) -> usize {
        self.executions.read().await.len()
    }

    /// Whether the store holds no executions.
    pub async fn is_empty(&self) -> bool {
        self.executions.read().await.is_empty()
    }

    /// Drop all stored executions (test isolation helper).
    pub async fn clear(&self) {
        self.executions.write().await.clear();
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_execution(&self, execution_id: &str, diagram_id: Option<&str>) -> Result<()> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(execution_id) {
            tracing::debug!(execution_id, "execution already exists, skipping creation");
            return Ok(());
        }
        executions.insert(
            execution_id.to_string(),
            ExecutionState::create(execution_id, diagram_id),
        );
        Ok(())
    }

    async fn update_node_status(
        &self,
        execution_id: &str,
        node_id: &str,
        status: NodeExecutionStatus,
        error: Option<String>,
        skip_reason: Option<SkipReason>,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let state = executions
            .get_mut(execution_id)
            .ok_or_else(|| StateError::ExecutionNotFound(execution_id.to_string()))?;
        match status {
            NodeExecutionStatus::Running => state.mark_node_running(node_id),
            NodeExecutionStatus::Failed => {
                state.mark_node_failed(node_id, error.unwrap_or_else(|| "unknown error".into()))
            }
            NodeExecutionStatus::Skipped => state.mark_node_skipped(
                node_id,
                skip_reason.unwrap_or(SkipReason::HandlerRequested),
            ),
            NodeExecutionStatus::Completed | NodeExecutionStatus::Pending => {
                // Completion is recorded through update_node_output so the
                // output lands in the same write.
                let entry = state.node_states.entry(node_id.to_string()).or_default();
                entry.status = status;
            }
        }
        Ok(())
    }

    async fn update_node_output(
        &self,
        execution_id: &str,
        node_id: &str,
        output: serde_json::Value,
        token_usage: Option<TokenUsage>,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let state = executions
            .get_mut(execution_id)
            .ok_or_else(|| StateError::ExecutionNotFound(execution_id.to_string()))?;
        state.mark_node_complete(node_id, output);
        if let Some(usage) = token_usage {
            state.update_token_usage(node_id, &usage);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let state = executions
            .get_mut(execution_id)
            .ok_or_else(|| StateError::ExecutionNotFound(execution_id.to_string()))?;
        state.update_status(status, error);
        Ok(())
    }

    async fn get_state(&self, execution_id: &str) -> Result<Option<ExecutionState>> {
        Ok(self
            .executions
            .read()
            .await
            .get(execution_id)
            .map(ExecutionState::snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let store = InMemoryStateStore::new();
        store.create_execution("e1", Some("d1")).await.unwrap();
        store
            .update_status("e1", ExecutionStatus::Running, None)
            .await
            .unwrap();

        // Replayed create must not clobber the running state.
        store.create_execution("e1", Some("d1")).await.unwrap();
        let state = store.get_state("e1").await.unwrap().unwrap();
        assert_eq!(state.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_node_output_round_trip() {
        let store = InMemoryStateStore::new();
        store.create_execution("e1", None).await.unwrap();
        store
            .update_node_status("e1", "n1", NodeExecutionStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_node_output("e1", "n1", json!({"x": 1}), Some(TokenUsage::new(10, 2)))
            .await
            .unwrap();

        let state = store.get_state("e1").await.unwrap().unwrap();
        assert!(state.is_node_complete("n1"));
        assert_eq!(state.get_node_output("n1"), Some(&json!({"x": 1})));
        assert_eq!(state.token_totals.input, 10);
    }

    #[tokio::test]
    async fn test_unknown_execution_errors() {
        let store = InMemoryStateStore::new();
        let err = store
            .update_status("missing", ExecutionStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StateError::ExecutionNotFound(_)));
    }

    #[tokio::test]
    async fn test_skip_reason_recorded() {
        let store = InMemoryStateStore::new();
        store.create_execution("e1", None).await.unwrap();
        store
            .update_node_status(
                "e1",
                "n1",
                NodeExecutionStatus::Skipped,
                None,
                Some(SkipReason::BranchNotTaken),
            )
            .await
            .unwrap();

        let state = store.get_state("e1").await.unwrap().unwrap();
        assert_eq!(
            state.node_state("n1").unwrap().skip_reason,
            Some(SkipReason::BranchNotTaken)
        );
    }
}
