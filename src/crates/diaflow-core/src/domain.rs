//! Declarative diagram model (compiler input)
//!
//! The types in this module mirror what users author: nodes with free-form
//! property bags, arrows between handle identifiers, optional declared
//! handles, LLM person records and diagram metadata. The compiler turns a
//! [`DomainDiagram`] into a typed
//! [`ExecutableDiagram`](crate::diagram::ExecutableDiagram).
//!
//! Property bags are validated per node type by the
//! [`NodeFactory`](crate::nodes::NodeFactory) during compilation, so the
//! engine and handlers only ever see already-typed records.

use crate::handles::{HandleDirection, HandleLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Closed set of node kinds understood by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Entry point; zero incoming edges
    Start,
    /// Terminal sink; zero outgoing edges
    Endpoint,
    /// Boolean branch with `condtrue`/`condfalse` outputs
    Condition,
    /// Single LLM invocation bound to a person
    PersonJob,
    /// Batched LLM invocation bound to a person
    PersonBatchJob,
    /// Code execution (delegated to an injected sandbox)
    CodeJob,
    /// HTTP request (delegated to an injected client)
    ApiJob,
    /// File-backed data operation
    Db,
    /// Notion integration (delegated)
    Notion,
    /// Interactive user prompt
    UserResponse,
    /// External hook trigger/callback
    Hook,
}

impl NodeType {
    /// All node types, in declaration order.
    pub fn all() -> &'static [NodeType] {
        &[
            NodeType::Start,
            NodeType::Endpoint,
            NodeType::Condition,
            NodeType::PersonJob,
            NodeType::PersonBatchJob,
            NodeType::CodeJob,
            NodeType::ApiJob,
            NodeType::Db,
            NodeType::Notion,
            NodeType::UserResponse,
            NodeType::Hook,
        ]
    }

    /// The snake_case wire name of this node type.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Endpoint => "endpoint",
            NodeType::Condition => "condition",
            NodeType::PersonJob => "person_job",
            NodeType::PersonBatchJob => "person_batch_job",
            NodeType::CodeJob => "code_job",
            NodeType::ApiJob => "api_job",
            NodeType::Db => "db",
            NodeType::Notion => "notion",
            NodeType::UserResponse => "user_response",
            NodeType::Hook => "hook",
        }
    }

    /// Parse a snake_case wire name.
    pub fn parse(s: &str) -> Option<NodeType> {
        NodeType::all().iter().copied().find(|t| t.as_str() == s)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 2D canvas position (UI metadata, carried through compilation).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

/// Declared content type of the data flowing over an arrow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    /// Raw text payloads
    RawText,
    /// Variables in an object map
    VariableInObject,
    /// Full conversation state
    ConversationState,
    /// Arbitrary structured data
    Generic,
}

/// Declared data type of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Any,
    String,
    Number,
    Boolean,
    Object,
    Array,
}

/// LLM provider backing a person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Openai,
    Anthropic,
    Gemini,
    Grok,
    Ollama,
}

/// A node in the declarative diagram: id, type, position and a free-form
/// property bag validated per type at compile time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainNode {
    /// Unique node id within the diagram
    pub id: String,
    /// Node kind
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Canvas position
    #[serde(default)]
    pub position: Vec2,
    /// Per-type properties (label, prompts, code, urls, ...)
    #[serde(default)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl DomainNode {
    /// Create a node with an empty property bag.
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        Self {
            id: id.into(),
            node_type,
            position: Vec2::default(),
            data: serde_json::Map::new(),
        }
    }

    /// Set a property on the bag (builder style).
    pub fn with_prop(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// The display label, falling back to the node id.
    pub fn label(&self) -> &str {
        self.data
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.id)
    }
}

/// Directed connection between two handle identifiers
/// (`<node_id>:<label>` strings).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainArrow {
    /// Unique arrow id within the diagram
    pub id: String,
    /// Source handle id; must resolve to an output handle
    pub source: String,
    /// Target handle id; must resolve to an input handle
    pub target: String,
    /// Declared content type of the payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Edge-specific data, including optional transform overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
}

impl DomainArrow {
    /// Create an arrow between two handle ids.
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            content_type: None,
            label: None,
            data: None,
        }
    }
}

/// Explicitly declared handle on a node. When a diagram declares no
/// handles for a node, the compiler synthesizes
/// [`default_handles`](crate::handles::default_handles).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainHandle {
    /// Unique handle id
    pub id: String,
    /// Node this handle belongs to
    pub node_id: String,
    /// Handle label
    pub label: HandleLabel,
    /// Handle direction
    pub direction: HandleDirection,
    /// Declared payload type
    #[serde(default)]
    pub data_type: DataType,
    /// UI-side anchor position (e.g. "left", "right")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,
}

/// LLM configuration attached to a person.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonLlmConfig {
    /// Provider backing this person
    pub service: LlmProvider,
    /// Model identifier
    pub model: String,
    /// API key reference resolved through the key service
    pub api_key_id: String,
    /// System prompt prepended to every conversation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// An LLM identity referenced by `person_job` nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainPerson {
    /// Unique person id within the diagram
    pub id: String,
    /// Display label
    pub label: String,
    /// LLM configuration
    pub llm_config: PersonLlmConfig,
}

/// Diagram-level metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// The declarative diagram: compiler input.
///
/// # Examples
///
/// ```rust
/// use diaflow_core::domain::{DomainArrow, DomainDiagram, DomainNode, NodeType};
///
/// let diagram = DomainDiagram::new()
///     .with_node(DomainNode::new("start", NodeType::Start))
///     .with_node(DomainNode::new("end", NodeType::Endpoint))
///     .with_arrow(DomainArrow::new("a1", "start:default", "end:default"));
///
/// assert_eq!(diagram.nodes.len(), 2);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DomainDiagram {
    /// Nodes, in authoring order
    #[serde(default)]
    pub nodes: Vec<DomainNode>,
    /// Arrows between handle ids
    #[serde(default)]
    pub arrows: Vec<DomainArrow>,
    /// Explicitly declared handles (optional; defaults synthesized)
    #[serde(default)]
    pub handles: Vec<DomainHandle>,
    /// LLM persons referenced by person_job nodes
    #[serde(default)]
    pub persons: Vec<DomainPerson>,
    /// Diagram metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DiagramMetadata>,
}

impl DomainDiagram {
    /// Create an empty diagram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node (builder style).
    pub fn with_node(mut self, node: DomainNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Add an arrow (builder style).
    pub fn with_arrow(mut self, arrow: DomainArrow) -> Self {
        self.arrows.push(arrow);
        self
    }

    /// Add a person (builder style).
    pub fn with_person(mut self, person: DomainPerson) -> Self {
        self.persons.push(person);
        self
    }

    /// Set metadata (builder style).
    pub fn with_metadata(mut self, metadata: DiagramMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&DomainNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Look up a person by id.
    pub fn person(&self, id: &str) -> Option<&DomainPerson> {
        self.persons.iter().find(|p| p.id == id)
    }

    /// Declared handles grouped by node id.
    pub fn handles_by_node(&self) -> BTreeMap<&str, Vec<&DomainHandle>> {
        let mut map: BTreeMap<&str, Vec<&DomainHandle>> = BTreeMap::new();
        for handle in &self.handles {
            map.entry(handle.node_id.as_str()).or_default().push(handle);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_type_round_trip() {
        for t in NodeType::all() {
            assert_eq!(NodeType::parse(t.as_str()), Some(*t));
        }
        assert_eq!(NodeType::parse("unknown"), None);
    }

    #[test]
    fn test_node_type_serde_snake_case() {
        let json = serde_json::to_string(&NodeType::PersonJob).unwrap();
        assert_eq!(json, "\"person_job\"");
        let back: NodeType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, NodeType::PersonJob);
    }

    #[test]
    fn test_label_falls_back_to_id() {
        let node = DomainNode::new("n1", NodeType::CodeJob);
        assert_eq!(node.label(), "n1");

        let node = node.with_prop("label", json!("Compute"));
        assert_eq!(node.label(), "Compute");
    }

    #[test]
    fn test_diagram_builder_and_lookup() {
        let diagram = DomainDiagram::new()
            .with_node(DomainNode::new("a", NodeType::Start))
            .with_node(DomainNode::new("b", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "a:default", "b:default"));

        assert!(diagram.node("a").is_some());
        assert!(diagram.node("zz").is_none());
        assert_eq!(diagram.arrows[0].source, "a:default");
    }
}
