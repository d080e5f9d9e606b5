//! Immutable post-compile artifact: typed nodes, edges and indices
//!
//! [`ExecutableDiagram`] is a pure data container produced by the
//! assembly phase. It owns the typed nodes and edges plus pre-computed
//! incoming/outgoing indices for O(1) dependency lookup, and a metadata
//! block the scheduler reads (start nodes, person catalog, dependency
//! sets, parallel groups, compilation warnings).
//!
//! The diagram has no back-references to construction-time objects and is
//! safe to share between concurrent executions behind an `Arc`.

use crate::domain::{ContentType, PersonLlmConfig};
use crate::handles::HandleLabel;
use crate::nodes::ExecutableNode;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A directed, typed connection between two compiled nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableEdge {
    /// Unique edge id (carried over from the source arrow)
    pub id: String,
    /// Source node
    pub source_node_id: String,
    /// Output label on the source node
    pub source_output: HandleLabel,
    /// Target node
    pub target_node_id: String,
    /// Input label on the target node
    pub target_input: HandleLabel,
    /// Declared payload content type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    /// Merged transform rules (type-based + edge-specific)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub transform_rules: serde_json::Map<String, serde_json::Value>,
    /// Arrow-level metadata carried through compilation
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// Person entry in the compiled person catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompiledPerson {
    /// Display label
    pub label: String,
    /// LLM configuration
    pub llm_config: PersonLlmConfig,
}

/// Metadata block assembled alongside the nodes and edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiagramInfo {
    /// Diagram id, when the source carried one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Diagram name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Ids of start nodes
    #[serde(default)]
    pub start_nodes: BTreeSet<String>,
    /// person id → nodes bound to that person
    #[serde(default)]
    pub person_nodes: BTreeMap<String, Vec<String>>,
    /// target node → set of source nodes it depends on
    #[serde(default)]
    pub node_dependencies: BTreeMap<String, BTreeSet<String>>,
    /// Disjoint-dependency groups the scheduler may dispatch together
    #[serde(default)]
    pub parallel_groups: Vec<BTreeSet<String>>,
    /// Warnings collected during compilation
    #[serde(default)]
    pub compilation_warnings: Vec<String>,
    /// Person catalog derived from the domain persons
    #[serde(default)]
    pub persons: BTreeMap<String, CompiledPerson>,
}

/// Immutable executable diagram.
///
/// # Examples
///
/// ```rust,ignore
/// let diagram = compiler.compile(&domain)?;
/// let start = diagram.metadata.start_nodes.iter().next().unwrap();
/// for edge in diagram.outgoing_edges(start) {
///     println!("{} -> {}", edge.source_node_id, edge.target_node_id);
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableDiagram {
    /// Typed nodes
    pub nodes: Vec<ExecutableNode>,
    /// Typed edges
    pub edges: Vec<ExecutableEdge>,
    /// Optional pre-computed topological order; when absent the
    /// scheduler derives ordering on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<Vec<String>>,
    /// Assembly metadata
    #[serde(default)]
    pub metadata: DiagramInfo,

    #[serde(skip)]
    node_index: HashMap<String, usize>,
    #[serde(skip)]
    incoming_index: HashMap<String, Vec<usize>>,
    #[serde(skip)]
    outgoing_index: HashMap<String, Vec<usize>>,
}

impl ExecutableDiagram {
    /// Assemble a diagram and build its lookup indices.
    pub fn new(
        nodes: Vec<ExecutableNode>,
        edges: Vec<ExecutableEdge>,
        execution_order: Option<Vec<String>>,
        metadata: DiagramInfo,
    ) -> Self {
        let mut diagram = Self {
            nodes,
            edges,
            execution_order,
            metadata,
            node_index: HashMap::new(),
            incoming_index: HashMap::new(),
            outgoing_index: HashMap::new(),
        };
        diagram.rebuild_indices();
        diagram
    }

    /// Rebuild the node/edge indices (needed after deserialization).
    pub fn rebuild_indices(&mut self) {
        self.node_index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id().to_string(), i))
            .collect();
        self.incoming_index.clear();
        self.outgoing_index.clear();
        for (i, edge) in self.edges.iter().enumerate() {
            self.outgoing_index
                .entry(edge.source_node_id.clone())
                .or_default()
                .push(i);
            self.incoming_index
                .entry(edge.target_node_id.clone())
                .or_default()
                .push(i);
        }
    }

    /// O(1) node lookup by id.
    pub fn get_node(&self, id: &str) -> Option<&ExecutableNode> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    /// Edges whose target is `id`.
    pub fn incoming_edges(&self, id: &str) -> impl Iterator<Item = &ExecutableEdge> {
        self.incoming_index
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    /// Edges whose source is `id`.
    pub fn outgoing_edges(&self, id: &str) -> impl Iterator<Item = &ExecutableEdge> {
        self.outgoing_index
            .get(id)
            .into_iter()
            .flatten()
            .map(|&i| &self.edges[i])
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Re-check the post-compile invariants. Used defensively before
    /// execution; a compiled diagram should always pass.
    pub fn validate(&self) -> Vec<String> {
        use crate::domain::NodeType;

        let mut errors = Vec::new();

        let mut seen_nodes = BTreeSet::new();
        for node in &self.nodes {
            if !seen_nodes.insert(node.id()) {
                errors.push(format!("duplicate node id '{}'", node.id()));
            }
        }

        let mut seen_edges = BTreeSet::new();
        for edge in &self.edges {
            if !seen_edges.insert(edge.id.as_str()) {
                errors.push(format!("duplicate edge id '{}'", edge.id));
            }
            if self.get_node(&edge.source_node_id).is_none() {
                errors.push(format!(
                    "edge '{}' references missing source node '{}'",
                    edge.id, edge.source_node_id
                ));
            }
            if self.get_node(&edge.target_node_id).is_none() {
                errors.push(format!(
                    "edge '{}' references missing target node '{}'",
                    edge.id, edge.target_node_id
                ));
            }
        }

        for node in &self.nodes {
            match node.node_type() {
                NodeType::Start => {
                    if self.incoming_edges(node.id()).next().is_some() {
                        errors.push(format!("start node '{}' has incoming edges", node.id()));
                    }
                }
                NodeType::Endpoint => {
                    if self.outgoing_edges(node.id()).next().is_some() {
                        errors.push(format!("endpoint node '{}' has outgoing edges", node.id()));
                    }
                }
                _ => {}
            }
        }

        errors
    }
}
