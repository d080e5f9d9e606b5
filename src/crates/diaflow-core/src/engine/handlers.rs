//! Node handler contract and the built-in handlers
//!
//! Handlers are invoked with `(typed node, execution context, inputs)`
//! and return a [`NodeOutput`]. The core ships handlers for the node
//! kinds whose semantics belong to the engine itself:
//!
//! - `start` - emits its static payload
//! - `endpoint` - collects inputs, optionally persisting via the file port
//! - `condition` - expression evaluation (port or built-in fallback) and
//!   the `detect_max_iterations` variant resolved from scheduler state
//! - `person_job` - retention rule, prompt building, LLM invocation,
//!   conversation bookkeeping and token reporting
//! - `user_response` - interactive prompt round-trip over the bus
//!
//! Provider-shaped handlers (code sandbox, HTTP, db, Notion, hooks) are
//! external collaborators registered by the embedding application.

use crate::domain::NodeType;
use crate::error::{DiagramError, Result};
use crate::eval;
use crate::memory::Message;
use crate::nodes::{ConditionType, ExecutableNode};
use crate::ports::CompletionOptions;
use crate::services;
use super::context::{ExecutionContext, NodeOutput};
use super::inputs::InputMap;
use async_trait::async_trait;
use diaflow_state::SkipReason;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// A node executor. Implementations must be safe to invoke concurrently.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(
        &self,
        node: &ExecutableNode,
        ctx: &ExecutionContext,
        inputs: &InputMap,
    ) -> Result<NodeOutput>;
}

/// node type → handler lookup.
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Empty registry; every dispatch will fail until handlers are
    /// registered.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in handlers attached.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(NodeType::Start, Arc::new(StartHandler));
        registry.register(NodeType::Endpoint, Arc::new(EndpointHandler));
        registry.register(NodeType::Condition, Arc::new(ConditionHandler));
        registry.register(NodeType::PersonJob, Arc::new(PersonJobHandler));
        registry.register(NodeType::PersonBatchJob, Arc::new(PersonJobHandler));
        registry.register(NodeType::UserResponse, Arc::new(UserResponseHandler));
        registry
    }

    /// Bind a handler for a node type, replacing any previous binding.
    pub fn register(&mut self, node_type: NodeType, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type, handler);
    }

    /// Resolve the handler for a node type.
    pub fn get(&self, node_type: NodeType) -> Result<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned().ok_or_else(|| {
            DiagramError::Configuration(format!("no handler registered for node type '{node_type}'"))
        })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Substitute `{{var}}` references from an input map.
fn render_template(template: &str, inputs: &InputMap) -> String {
    static VAR: OnceLock<Regex> = OnceLock::new();
    let var = VAR.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap());
    var.replace_all(template, |caps: &regex::Captures<'_>| {
        match inputs.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    })
    .into_owned()
}

/// Collapse an input map for passthrough: a single input passes its
/// value directly; several pass the whole map.
fn passthrough_value(inputs: &InputMap) -> Value {
    match inputs.len() {
        0 => json!({}),
        1 => inputs.values().next().cloned().unwrap_or(Value::Null),
        _ => json!(inputs),
    }
}

/// Emits the start node's static payload.
pub struct StartHandler;

#[async_trait]
impl NodeHandler for StartHandler {
    async fn execute(
        &self,
        node: &ExecutableNode,
        _ctx: &ExecutionContext,
        _inputs: &InputMap,
    ) -> Result<NodeOutput> {
        let ExecutableNode::Start(start) = node else {
            return Err(DiagramError::Internal("start handler got non-start node".into()));
        };
        Ok(NodeOutput::value(Value::Object(start.custom_data.clone())))
    }
}

/// Collects inputs at the end of a flow, optionally persisting them.
pub struct EndpointHandler;

#[async_trait]
impl NodeHandler for EndpointHandler {
    async fn execute(
        &self,
        node: &ExecutableNode,
        ctx: &ExecutionContext,
        inputs: &InputMap,
    ) -> Result<NodeOutput> {
        let ExecutableNode::Endpoint(endpoint) = node else {
            return Err(DiagramError::Internal("endpoint handler got non-endpoint node".into()));
        };
        let value = passthrough_value(inputs);

        if endpoint.save_to_file {
            let path = endpoint
                .file_path
                .clone()
                .ok_or_else(|| DiagramError::Configuration("endpoint save_to_file set without file_path".into()))?;
            let files = ctx.services.require(services::FILE_SERVICE)?;
            let content = serde_json::to_vec_pretty(&value)?;
            files.write(&path, &content).await?;
        }

        Ok(NodeOutput::value(value))
    }
}

/// Evaluates a condition and reports the branch decision.
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(
        &self,
        node: &ExecutableNode,
        ctx: &ExecutionContext,
        inputs: &InputMap,
    ) -> Result<NodeOutput> {
        let ExecutableNode::Condition(condition) = node else {
            return Err(DiagramError::Internal("condition handler got non-condition node".into()));
        };

        let result = match condition.condition_type {
            ConditionType::DetectMaxIterations => detect_max_iterations(ctx),
            ConditionType::Expression => {
                let expression = condition.expression.as_deref().ok_or_else(|| {
                    DiagramError::Configuration("condition node has no expression".into())
                })?;
                let context = build_eval_context(ctx, inputs);
                match ctx.services.get(services::CONDITION_EVALUATION_SERVICE) {
                    Some(evaluator) => evaluator.evaluate(expression, &context).await?,
                    None => eval::evaluate_expression(expression, &context).unwrap_or_else(|err| {
                        tracing::warn!(
                            node_id = %ctx.current_node_id,
                            %err,
                            "condition evaluation failed, defaulting to false"
                        );
                        false
                    }),
                }
            }
        };

        Ok(NodeOutput::condition(passthrough_value(inputs), result))
    }
}

/// Evaluation context: inputs, flattened upstream outputs, and per-node
/// execution counts.
fn build_eval_context(ctx: &ExecutionContext, inputs: &InputMap) -> Value {
    let mut context = serde_json::Map::new();
    for (key, value) in inputs {
        context.insert(key.clone(), value.clone());
    }
    for (node_id, output) in &ctx.view.outputs {
        match output {
            Value::Object(fields) => {
                for (key, value) in fields {
                    context.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
            other => {
                context.insert(node_id.clone(), other.clone());
            }
        }
    }
    context.insert(
        "execution_count".into(),
        json!(ctx.view.iteration_counts.get(&ctx.current_node_id).copied().unwrap_or(0)),
    );
    Value::Object(context)
}

/// True once every looping node feeding this condition (directly, or as
/// a loop participant sharing one of its downstream targets) has
/// exhausted its iteration cap.
///
/// Participants are found by a one-hop walk: direct upstream sources,
/// plus nodes with an edge into any of the condition's targets. Nested
/// loops beyond that horizon are not inspected; the compiler's cycle
/// warnings flag such topologies.
fn detect_max_iterations(ctx: &ExecutionContext) -> bool {
    let diagram = &ctx.diagram;
    let mut has_capped = false;
    let mut all_reached = true;

    let mut check = |node_id: &str| {
        let Some(node) = diagram.get_node(node_id) else {
            return;
        };
        let Some(cap) = node.max_iteration() else {
            return;
        };
        has_capped = true;
        let count = ctx.view.iteration_counts.get(node_id).copied().unwrap_or(0);
        let skipped_at_cap =
            ctx.view.skip_reasons.get(node_id) == Some(&SkipReason::MaxIterations);
        if !skipped_at_cap && count < cap {
            all_reached = false;
        }
    };

    for edge in diagram.incoming_edges(&ctx.current_node_id) {
        check(&edge.source_node_id);
    }
    for out_edge in diagram.outgoing_edges(&ctx.current_node_id) {
        for peer_edge in diagram.incoming_edges(&out_edge.target_node_id) {
            if peer_edge.source_node_id != ctx.current_node_id {
                check(&peer_edge.source_node_id);
            }
        }
    }

    has_capped && all_reached
}

/// Runs an LLM invocation as a person.
pub struct PersonJobHandler;

#[async_trait]
impl NodeHandler for PersonJobHandler {
    async fn execute(
        &self,
        node: &ExecutableNode,
        ctx: &ExecutionContext,
        inputs: &InputMap,
    ) -> Result<NodeOutput> {
        let (person_id, first_prompt, default_prompt, cleaning_rule, tools) = match node {
            ExecutableNode::PersonJob(n) => (
                n.person_id.as_str(),
                n.first_only_prompt.as_deref(),
                n.default_prompt.as_deref(),
                n.context_cleaning_rule,
                n.tools.clone(),
            ),
            ExecutableNode::PersonBatchJob(n) => (
                n.person_id.as_str(),
                None,
                n.default_prompt.as_deref(),
                n.context_cleaning_rule,
                n.tools.clone(),
            ),
            _ => {
                return Err(DiagramError::Internal(
                    "person job handler got non-person node".into(),
                ))
            }
        };

        let person = ctx
            .diagram
            .metadata
            .persons
            .get(person_id)
            .ok_or_else(|| {
                DiagramError::Configuration(format!("unknown person reference '{person_id}'"))
            })?;

        // Retention rule runs before the message array is built.
        ctx.memory
            .apply_rule(person_id, cleaning_rule, &ctx.execution_id);

        let prompt_template = if ctx.iteration == 0 {
            first_prompt.or(default_prompt)
        } else {
            default_prompt
        };
        let prompt = match prompt_template {
            Some(template) => render_template(template, inputs),
            None => passthrough_value(inputs).to_string(),
        };

        let mut messages = Vec::new();
        if let Some(system) = &person.llm_config.system_prompt {
            messages.push(Message::system(system.clone()));
        }
        messages.extend(ctx.memory.history(person_id));
        messages.push(Message::user(prompt.clone()));

        let llm = ctx.services.require(services::LLM_SERVICE)?;
        let options = CompletionOptions {
            temperature: person.llm_config.temperature,
            max_tokens: person.llm_config.max_tokens,
            tools,
        };
        let completion = llm
            .complete(
                &messages,
                &person.llm_config.model,
                &person.llm_config.api_key_id,
                &options,
            )
            .await?;

        ctx.memory.append(
            person_id,
            Message::user(prompt)
                .with_node(ctx.current_node_id.clone())
                .with_execution(ctx.execution_id.clone()),
        );
        ctx.memory.append(
            person_id,
            Message::assistant(completion.text.clone())
                .with_node(ctx.current_node_id.clone())
                .with_execution(ctx.execution_id.clone())
                .with_sender(person_id)
                .with_token_count(completion.token_usage.output as u32),
        );

        let value = match &completion.tool_outputs {
            Some(tool_outputs) => json!({
                "text": completion.text,
                "tool_results": tool_outputs,
            }),
            None => Value::String(completion.text.clone()),
        };
        Ok(NodeOutput::value(value).with_token_usage(completion.token_usage))
    }
}

/// Interactive prompt round-trip for user_response nodes.
pub struct UserResponseHandler;

#[async_trait]
impl NodeHandler for UserResponseHandler {
    async fn execute(
        &self,
        node: &ExecutableNode,
        ctx: &ExecutionContext,
        inputs: &InputMap,
    ) -> Result<NodeOutput> {
        let ExecutableNode::UserResponse(user_response) = node else {
            return Err(DiagramError::Internal(
                "user response handler got non-user_response node".into(),
            ));
        };
        let interactive = ctx.interactive.clone().ok_or_else(|| {
            DiagramError::Configuration("no interactive handler attached to this execution".into())
        })?;

        let prompt = render_template(&user_response.prompt, inputs);
        let context = passthrough_value(inputs);

        ctx.events
            .publish(crate::events::ExecutionEvent::InteractivePrompt {
                execution_id: ctx.execution_id.clone(),
                node_id: ctx.current_node_id.clone(),
                prompt: prompt.clone(),
                context: context.clone(),
            })
            .await;

        let response = interactive
            .prompt(&ctx.execution_id, &ctx.current_node_id, &prompt, &context)
            .await?;

        ctx.events
            .publish(crate::events::ExecutionEvent::InteractiveResponse {
                execution_id: ctx.execution_id.clone(),
                node_id: ctx.current_node_id.clone(),
                response: response.clone(),
            })
            .await;

        Ok(NodeOutput::value(Value::String(response)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        let mut inputs = InputMap::new();
        inputs.insert("name".into(), json!("ada"));
        inputs.insert("count".into(), json!(3));
        assert_eq!(
            render_template("hello {{name}}, round {{ count }}", &inputs),
            "hello ada, round 3"
        );
        assert_eq!(render_template("{{missing}}!", &inputs), "!");
    }

    #[test]
    fn test_passthrough_value_shapes() {
        let mut inputs = InputMap::new();
        assert_eq!(passthrough_value(&inputs), json!({}));

        inputs.insert("default".into(), json!(42));
        assert_eq!(passthrough_value(&inputs), json!(42));

        inputs.insert("other".into(), json!("x"));
        assert_eq!(
            passthrough_value(&inputs),
            json!({"default": 42, "other": "x"})
        );
    }

    #[test]
    fn test_registry_missing_handler_is_configuration_error() {
        let registry = HandlerRegistry::new();
        let err = match registry.get(NodeType::CodeJob) {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, DiagramError::Configuration(_)));
    }

    #[test]
    fn test_defaults_cover_core_node_kinds() {
        let registry = HandlerRegistry::with_defaults();
        assert!(registry.get(NodeType::Start).is_ok());
        assert!(registry.get(NodeType::Condition).is_ok());
        assert!(registry.get(NodeType::PersonJob).is_ok());
        // Provider-shaped kinds stay external.
        assert!(registry.get(NodeType::ApiJob).is_err());
    }
}
