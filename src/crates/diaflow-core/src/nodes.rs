//! Typed immutable nodes and the per-type node factory
//!
//! Phase 2 of the compiler turns each free-form
//! [`DomainNode`](crate::domain::DomainNode) into a strongly-typed record
//! via [`NodeFactory`]. Handlers never see property bags: required
//! properties are validated here and type-specific defaults are applied
//! (condition nodes default to `join_policy = any`, `person_job` requires
//! a person reference and `max_iteration ≥ 1`, a hook-triggered start
//! needs a `hook_event`).
//!
//! [`ExecutableNode`] is a sum over all node kinds with shared accessors,
//! so scheduler code can ask any node for its id, type, join policy or
//! iteration cap without matching on the variant.

use crate::domain::{DomainNode, NodeType, Vec2};
use serde::{Deserialize, Serialize};

/// Rule deciding when a node with multiple inbound edges is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// Every incoming edge's source must be completed or skipped
    #[default]
    All,
    /// At least one incoming edge's source must be completed
    Any,
}

/// How a start node is triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Triggered by an explicit run request
    #[default]
    Manual,
    /// Triggered by an external hook event
    Hook,
}

/// What a condition node evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    /// Evaluate a boolean expression against inputs and node outputs
    #[default]
    Expression,
    /// True once every looping upstream node has exhausted its
    /// iteration cap
    DetectMaxIterations,
}

/// Conversation retention rule applied before each LLM invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextCleaningRule {
    /// Keep the full history
    #[default]
    NoForget,
    /// Clear the person's history before every invocation
    OnEveryTurn,
    /// Drop the person's own messages within the current execution
    ForgetOwn,
}

/// File operation performed by a db node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbOperation {
    #[default]
    Read,
    Write,
    Append,
}

/// Entry-point node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub trigger_mode: TriggerMode,
    /// Required when `trigger_mode == Hook`
    pub hook_event: Option<String>,
    /// Static payload emitted as the start node's output
    pub custom_data: serde_json::Map<String, serde_json::Value>,
}

/// Terminal sink node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    /// Persist the final payload through the file port
    pub save_to_file: bool,
    pub file_path: Option<String>,
}

/// Boolean branch node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub condition_type: ConditionType,
    /// Expression source when `condition_type == Expression`
    pub expression: Option<String>,
    /// Defaults to [`JoinPolicy::Any`] for condition nodes
    pub join_policy: JoinPolicy,
}

/// LLM invocation node bound to a person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonJobNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    /// Person this job speaks as
    pub person_id: String,
    /// Prompt used on iteration 0 when present
    pub first_only_prompt: Option<String>,
    /// Prompt used on iterations ≥ 1 (and iteration 0 when no first prompt)
    pub default_prompt: Option<String>,
    /// Iteration cap; always ≥ 1
    pub max_iteration: u32,
    /// Retention rule applied before building the message array
    pub context_cleaning_rule: ContextCleaningRule,
    /// Tool names available to the person
    pub tools: Vec<String>,
}

/// Batched LLM invocation: one completion per element of the batch input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonBatchJobNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub person_id: String,
    pub default_prompt: Option<String>,
    pub max_iteration: u32,
    pub context_cleaning_rule: ContextCleaningRule,
    pub tools: Vec<String>,
    /// Input key holding the array to fan over
    pub batch_input_key: String,
}

/// Code execution node (sandbox injected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeJobNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub language: String,
    pub code: String,
    pub timeout_secs: Option<u64>,
}

/// HTTP request node (client injected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiJobNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub url: String,
    pub method: String,
    pub headers: serde_json::Map<String, serde_json::Value>,
    pub body: Option<serde_json::Value>,
    pub timeout_secs: Option<u64>,
}

/// File-backed data node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub operation: DbOperation,
    pub file: String,
    pub data: Option<serde_json::Value>,
}

/// Notion integration node (client injected).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotionNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub operation: String,
    pub page_id: Option<String>,
    pub database_id: Option<String>,
}

/// Interactive prompt node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponseNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub prompt: String,
    pub timeout_secs: Option<u64>,
}

/// External hook node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookNode {
    pub id: String,
    pub label: String,
    pub position: Vec2,
    pub hook_type: String,
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// A typed, immutable node of a compiled diagram.
///
/// Which fields are populated is determined by the variant; shared fields
/// (`id`, `label`, `position`) are exposed through accessors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutableNode {
    Start(StartNode),
    Endpoint(EndpointNode),
    Condition(ConditionNode),
    PersonJob(PersonJobNode),
    PersonBatchJob(PersonBatchJobNode),
    CodeJob(CodeJobNode),
    ApiJob(ApiJobNode),
    Db(DbNode),
    Notion(NotionNode),
    UserResponse(UserResponseNode),
    Hook(HookNode),
}

impl ExecutableNode {
    /// Node id.
    pub fn id(&self) -> &str {
        match self {
            Self::Start(n) => &n.id,
            Self::Endpoint(n) => &n.id,
            Self::Condition(n) => &n.id,
            Self::PersonJob(n) => &n.id,
            Self::PersonBatchJob(n) => &n.id,
            Self::CodeJob(n) => &n.id,
            Self::ApiJob(n) => &n.id,
            Self::Db(n) => &n.id,
            Self::Notion(n) => &n.id,
            Self::UserResponse(n) => &n.id,
            Self::Hook(n) => &n.id,
        }
    }

    /// Node kind.
    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Start(_) => NodeType::Start,
            Self::Endpoint(_) => NodeType::Endpoint,
            Self::Condition(_) => NodeType::Condition,
            Self::PersonJob(_) => NodeType::PersonJob,
            Self::PersonBatchJob(_) => NodeType::PersonBatchJob,
            Self::CodeJob(_) => NodeType::CodeJob,
            Self::ApiJob(_) => NodeType::ApiJob,
            Self::Db(_) => NodeType::Db,
            Self::Notion(_) => NodeType::Notion,
            Self::UserResponse(_) => NodeType::UserResponse,
            Self::Hook(_) => NodeType::Hook,
        }
    }

    /// Display label.
    pub fn label(&self) -> &str {
        match self {
            Self::Start(n) => &n.label,
            Self::Endpoint(n) => &n.label,
            Self::Condition(n) => &n.label,
            Self::PersonJob(n) => &n.label,
            Self::PersonBatchJob(n) => &n.label,
            Self::CodeJob(n) => &n.label,
            Self::ApiJob(n) => &n.label,
            Self::Db(n) => &n.label,
            Self::Notion(n) => &n.label,
            Self::UserResponse(n) => &n.label,
            Self::Hook(n) => &n.label,
        }
    }

    /// Canvas position.
    pub fn position(&self) -> Vec2 {
        match self {
            Self::Start(n) => n.position,
            Self::Endpoint(n) => n.position,
            Self::Condition(n) => n.position,
            Self::PersonJob(n) => n.position,
            Self::PersonBatchJob(n) => n.position,
            Self::CodeJob(n) => n.position,
            Self::ApiJob(n) => n.position,
            Self::Db(n) => n.position,
            Self::Notion(n) => n.position,
            Self::UserResponse(n) => n.position,
            Self::Hook(n) => n.position,
        }
    }

    /// Join policy for readiness evaluation. Condition nodes carry their
    /// configured policy (default `any`); every other node joins on `all`.
    pub fn join_policy(&self) -> JoinPolicy {
        match self {
            Self::Condition(n) => n.join_policy,
            _ => JoinPolicy::All,
        }
    }

    /// Iteration cap, for node kinds that loop.
    pub fn max_iteration(&self) -> Option<u32> {
        match self {
            Self::PersonJob(n) => Some(n.max_iteration),
            Self::PersonBatchJob(n) => Some(n.max_iteration),
            _ => None,
        }
    }

    /// Person bound to this node, for LLM node kinds.
    pub fn person_id(&self) -> Option<&str> {
        match self {
            Self::PersonJob(n) => Some(&n.person_id),
            Self::PersonBatchJob(n) => Some(&n.person_id),
            _ => None,
        }
    }

    /// Tools configured on this node, for LLM node kinds.
    pub fn tools(&self) -> Option<&[String]> {
        match self {
            Self::PersonJob(n) => Some(&n.tools),
            Self::PersonBatchJob(n) => Some(&n.tools),
            _ => None,
        }
    }
}

/// Builds typed nodes from domain nodes, validating required properties
/// and applying per-type defaults.
#[derive(Debug, Default)]
pub struct NodeFactory;

impl NodeFactory {
    pub fn new() -> Self {
        Self
    }

    /// Build a typed node. Errors are plain strings; the compilation phase
    /// attaches node ids and phase context.
    pub fn build(&self, node: &DomainNode) -> Result<ExecutableNode, String> {
        let id = node.id.clone();
        let label = node.label().to_string();
        let position = node.position;
        let data = &node.data;

        let built = match node.node_type {
            NodeType::Start => {
                let trigger_mode = match get_str(data, "trigger_mode") {
                    Some("hook") => TriggerMode::Hook,
                    Some("manual") | None => TriggerMode::Manual,
                    Some(other) => return Err(format!("unknown trigger_mode '{other}'")),
                };
                let hook_event = get_str(data, "hook_event").map(str::to_string);
                if trigger_mode == TriggerMode::Hook && hook_event.is_none() {
                    return Err("start node with trigger_mode=hook requires a hook_event".into());
                }
                let custom_data = data
                    .get("custom_data")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default();
                ExecutableNode::Start(StartNode {
                    id,
                    label,
                    position,
                    trigger_mode,
                    hook_event,
                    custom_data,
                })
            }
            NodeType::Endpoint => ExecutableNode::Endpoint(EndpointNode {
                id,
                label,
                position,
                save_to_file: get_bool(data, "save_to_file").unwrap_or(false),
                file_path: get_str(data, "file_path").map(str::to_string),
            }),
            NodeType::Condition => {
                let condition_type = match get_str(data, "condition_type") {
                    Some("detect_max_iterations") => ConditionType::DetectMaxIterations,
                    Some("expression") | None => ConditionType::Expression,
                    Some(other) => return Err(format!("unknown condition_type '{other}'")),
                };
                let expression = get_str(data, "expression").map(str::to_string);
                if condition_type == ConditionType::Expression && expression.is_none() {
                    return Err("condition node requires an expression".into());
                }
                let join_policy = match get_str(data, "join_policy") {
                    Some("all") => JoinPolicy::All,
                    Some("any") | None => JoinPolicy::Any,
                    Some(other) => return Err(format!("unknown join_policy '{other}'")),
                };
                ExecutableNode::Condition(ConditionNode {
                    id,
                    label,
                    position,
                    condition_type,
                    expression,
                    join_policy,
                })
            }
            NodeType::PersonJob => {
                let person_id = get_str(data, "person")
                    .ok_or("person_job node requires a person reference")?
                    .to_string();
                ExecutableNode::PersonJob(PersonJobNode {
                    id,
                    label,
                    position,
                    person_id,
                    first_only_prompt: get_str(data, "first_only_prompt").map(str::to_string),
                    default_prompt: get_str(data, "default_prompt").map(str::to_string),
                    max_iteration: parse_max_iteration(data)?,
                    context_cleaning_rule: parse_cleaning_rule(data)?,
                    tools: get_string_list(data, "tools"),
                })
            }
            NodeType::PersonBatchJob => {
                let person_id = get_str(data, "person")
                    .ok_or("person_batch_job node requires a person reference")?
                    .to_string();
                ExecutableNode::PersonBatchJob(PersonBatchJobNode {
                    id,
                    label,
                    position,
                    person_id,
                    default_prompt: get_str(data, "default_prompt").map(str::to_string),
                    max_iteration: parse_max_iteration(data)?,
                    context_cleaning_rule: parse_cleaning_rule(data)?,
                    tools: get_string_list(data, "tools"),
                    batch_input_key: get_str(data, "batch_input_key")
                        .unwrap_or("items")
                        .to_string(),
                })
            }
            NodeType::CodeJob => ExecutableNode::CodeJob(CodeJobNode {
                id,
                label,
                position,
                language: get_str(data, "language").unwrap_or("python").to_string(),
                code: get_str(data, "code")
                    .ok_or("code_job node requires code")?
                    .to_string(),
                timeout_secs: get_u64(data, "timeout"),
            }),
            NodeType::ApiJob => ExecutableNode::ApiJob(ApiJobNode {
                id,
                label,
                position,
                url: get_str(data, "url")
                    .ok_or("api_job node requires a url")?
                    .to_string(),
                method: get_str(data, "method").unwrap_or("GET").to_uppercase(),
                headers: data
                    .get("headers")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default(),
                body: data.get("body").cloned(),
                timeout_secs: get_u64(data, "timeout"),
            }),
            NodeType::Db => {
                let operation = match get_str(data, "operation") {
                    Some("write") => DbOperation::Write,
                    Some("append") => DbOperation::Append,
                    Some("read") | None => DbOperation::Read,
                    Some(other) => return Err(format!("unknown db operation '{other}'")),
                };
                ExecutableNode::Db(DbNode {
                    id,
                    label,
                    position,
                    operation,
                    file: get_str(data, "file")
                        .ok_or("db node requires a file")?
                        .to_string(),
                    data: data.get("data").cloned(),
                })
            }
            NodeType::Notion => ExecutableNode::Notion(NotionNode {
                id,
                label,
                position,
                operation: get_str(data, "operation").unwrap_or("read_page").to_string(),
                page_id: get_str(data, "page_id").map(str::to_string),
                database_id: get_str(data, "database_id").map(str::to_string),
            }),
            NodeType::UserResponse => ExecutableNode::UserResponse(UserResponseNode {
                id,
                label,
                position,
                prompt: get_str(data, "prompt")
                    .ok_or("user_response node requires a prompt")?
                    .to_string(),
                timeout_secs: get_u64(data, "timeout"),
            }),
            NodeType::Hook => ExecutableNode::Hook(HookNode {
                id,
                label,
                position,
                hook_type: get_str(data, "hook_type").unwrap_or("webhook").to_string(),
                config: data
                    .get("config")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .unwrap_or_default(),
            }),
        };

        Ok(built)
    }
}

fn get_str<'a>(data: &'a serde_json::Map<String, serde_json::Value>, key: &str) -> Option<&'a str> {
    data.get(key).and_then(|v| v.as_str())
}

fn get_bool(data: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<bool> {
    data.get(key).and_then(|v| v.as_bool())
}

fn get_u64(data: &serde_json::Map<String, serde_json::Value>, key: &str) -> Option<u64> {
    data.get(key).and_then(|v| v.as_u64())
}

fn get_string_list(data: &serde_json::Map<String, serde_json::Value>, key: &str) -> Vec<String> {
    data.get(key)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_max_iteration(
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<u32, String> {
    let raw = data.get("max_iteration").map(|v| {
        v.as_u64()
            .ok_or_else(|| format!("max_iteration must be a positive integer, got {v}"))
    });
    let value = match raw {
        Some(Ok(v)) => v,
        Some(Err(e)) => return Err(e),
        None => 1,
    };
    if value < 1 {
        return Err("max_iteration must be >= 1".into());
    }
    u32::try_from(value).map_err(|_| "max_iteration out of range".into())
}

fn parse_cleaning_rule(
    data: &serde_json::Map<String, serde_json::Value>,
) -> Result<ContextCleaningRule, String> {
    match get_str(data, "context_cleaning_rule") {
        Some("no_forget") | None => Ok(ContextCleaningRule::NoForget),
        Some("on_every_turn") => Ok(ContextCleaningRule::OnEveryTurn),
        Some("forget_own") => Ok(ContextCleaningRule::ForgetOwn),
        Some(other) => Err(format!("unknown context_cleaning_rule '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(node: DomainNode) -> Result<ExecutableNode, String> {
        NodeFactory::new().build(&node)
    }

    #[test]
    fn test_condition_defaults_to_any_join() {
        let node = DomainNode::new("c1", NodeType::Condition)
            .with_prop("expression", json!("x > 3"));
        let built = build(node).unwrap();
        assert_eq!(built.join_policy(), JoinPolicy::Any);
    }

    #[test]
    fn test_condition_requires_expression() {
        let err = build(DomainNode::new("c1", NodeType::Condition)).unwrap_err();
        assert!(err.contains("expression"));

        // detect_max_iterations variant needs no expression
        let node = DomainNode::new("c2", NodeType::Condition)
            .with_prop("condition_type", json!("detect_max_iterations"));
        assert!(build(node).is_ok());
    }

    #[test]
    fn test_person_job_requires_person() {
        let err = build(DomainNode::new("p1", NodeType::PersonJob)).unwrap_err();
        assert!(err.contains("person"));
    }

    #[test]
    fn test_person_job_max_iteration_floor() {
        let node = DomainNode::new("p1", NodeType::PersonJob)
            .with_prop("person", json!("alice"))
            .with_prop("max_iteration", json!(0));
        assert!(build(node).is_err());

        let node = DomainNode::new("p1", NodeType::PersonJob).with_prop("person", json!("alice"));
        let built = build(node).unwrap();
        assert_eq!(built.max_iteration(), Some(1));
        assert_eq!(built.person_id(), Some("alice"));
    }

    #[test]
    fn test_start_hook_trigger_requires_event() {
        let node = DomainNode::new("s1", NodeType::Start).with_prop("trigger_mode", json!("hook"));
        assert!(build(node).is_err());

        let node = DomainNode::new("s1", NodeType::Start)
            .with_prop("trigger_mode", json!("hook"))
            .with_prop("hook_event", json!("push"));
        assert!(build(node).is_ok());
    }

    #[test]
    fn test_non_condition_joins_on_all() {
        let node = DomainNode::new("c1", NodeType::CodeJob).with_prop("code", json!("1"));
        let built = build(node).unwrap();
        assert_eq!(built.join_policy(), JoinPolicy::All);
        assert_eq!(built.max_iteration(), None);
    }

    #[test]
    fn test_code_job_requires_code() {
        assert!(build(DomainNode::new("j", NodeType::CodeJob)).is_err());
    }
}
