//! Ports consumed by the core
//!
//! Implementations of these traits are injected through the
//! [`ServiceRegistry`](crate::services::ServiceRegistry). The core never
//! talks to a provider SDK, the filesystem or the network directly:
//! handlers resolve a port and await it. All ports must be safe to call
//! concurrently.
//!
//! The [`StateStore`](diaflow_state::StateStore) port lives in the
//! `diaflow-state` crate and is re-exported from the crate root.

use crate::error::Result;
use crate::memory::Message;
use async_trait::async_trait;
use diaflow_state::TokenUsage;
use serde_json::Value;

/// Options forwarded to an LLM completion call.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
    /// Tool names the person may call
    pub tools: Vec<String>,
}

/// Result of an LLM completion call.
#[derive(Debug, Clone)]
pub struct CompletionResult {
    /// Completion text
    pub text: String,
    /// Provider-reported token usage
    pub token_usage: TokenUsage,
    /// Structured tool outputs, when the provider executed tools
    pub tool_outputs: Option<Value>,
}

/// LLM completion port. Provider adapters (OpenAI, Anthropic, ...) are
/// external collaborators implementing this trait.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        model: &str,
        api_key_id: &str,
        options: &CompletionOptions,
    ) -> Result<CompletionResult>;
}

/// Filesystem port used by db/endpoint handlers.
#[async_trait]
pub trait FileService: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

/// A resolved API key.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub service: String,
    pub key: String,
}

/// Summary entry returned by [`ApiKeyService::list`].
#[derive(Debug, Clone)]
pub struct ApiKeySummary {
    pub id: String,
    pub label: String,
    pub service: String,
}

/// API key lookup port.
#[async_trait]
pub trait ApiKeyService: Send + Sync {
    async fn get(&self, id: &str) -> Result<ApiKey>;
    async fn list(&self) -> Result<Vec<ApiKeySummary>>;
}

/// Outbound event routing port (web UI, CLI monitors).
#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// Broadcast an event to everything subscribed to the execution.
    async fn broadcast_to_execution(&self, execution_id: &str, event: Value) -> Result<()>;
    /// Publish a message on an arbitrary channel.
    async fn publish(&self, channel: &str, message: Value) -> Result<()>;
}

/// Notion integration port (external collaborator).
#[async_trait]
pub trait NotionService: Send + Sync {
    async fn execute(&self, operation: &str, params: Value) -> Result<Value>;
}

/// Condition expression evaluation port.
///
/// The engine uses this for every condition except the
/// `detect_max_iterations` variant, which is resolved from scheduler
/// state. When no evaluator is registered, the engine falls back to
/// [`BasicConditionEvaluator`](crate::eval::BasicConditionEvaluator).
#[async_trait]
pub trait ConditionEvaluator: Send + Sync {
    async fn evaluate(&self, expression: &str, context: &Value) -> Result<bool>;
}

/// Stored-diagram listing entry.
#[derive(Debug, Clone)]
pub struct DiagramEntry {
    pub id: String,
    pub name: Option<String>,
    pub format: crate::formats::DiagramFormat,
    pub modified: chrono::DateTime<chrono::Utc>,
}

/// Diagram persistence port.
#[async_trait]
pub trait DiagramStorage: Send + Sync {
    async fn load(&self, id: &str) -> Result<crate::domain::DomainDiagram>;
    async fn save(&self, id: &str, diagram: &crate::domain::DomainDiagram) -> Result<()>;
    async fn list(&self) -> Result<Vec<DiagramEntry>>;
    async fn delete(&self, id: &str) -> Result<()>;
}

/// Prompt/response bridge for `user_response` nodes.
#[async_trait]
pub trait InteractiveHandler: Send + Sync {
    async fn prompt(&self, execution_id: &str, node_id: &str, prompt: &str, context: &Value)
        -> Result<String>;
}
