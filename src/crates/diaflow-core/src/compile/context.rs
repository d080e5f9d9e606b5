//! Compilation context, diagnostics and result types
//!
//! Exceptions are not used for control flow inside the pipeline: each
//! phase reads from and writes to a [`CompilationContext`] and reports
//! problems through [`CompilationResult`]. Only the
//! [`DiagramCompiler::compile`](super::DiagramCompiler::compile) facade
//! converts accumulated errors into a
//! [`DiagramError`](crate::error::DiagramError).

use crate::diagram::ExecutableDiagram;
use crate::domain::DomainDiagram;
use crate::handles::{HandleLabel, HandleSpec};
use crate::nodes::ExecutableNode;
use crate::rules::RuleRegistry;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

/// Phases of diagram compilation, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CompilationPhase {
    Validation,
    NodeTransformation,
    ConnectionResolution,
    EdgeBuilding,
    Optimization,
    Assembly,
}

impl CompilationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NodeTransformation => "node_transformation",
            Self::ConnectionResolution => "connection_resolution",
            Self::EdgeBuilding => "edge_building",
            Self::Optimization => "optimization",
            Self::Assembly => "assembly",
        }
    }
}

impl std::fmt::Display for CompilationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic produced by a compilation phase.
#[derive(Debug, Clone)]
pub struct CompilationError {
    /// Phase that produced the diagnostic
    pub phase: CompilationPhase,
    /// Human-readable message
    pub message: String,
    /// Node the diagnostic refers to, when known
    pub node_id: Option<String>,
    /// Arrow the diagnostic refers to, when known
    pub arrow_id: Option<String>,
    /// Actionable hint
    pub suggestion: Option<String>,
}

impl std::fmt::Display for CompilationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.phase, self.message)?;
        if let Some(node) = &self.node_id {
            write!(f, " (node '{node}')")?;
        }
        if let Some(arrow) = &self.arrow_id {
            write!(f, " (arrow '{arrow}')")?;
        }
        Ok(())
    }
}

/// Result of compilation with full diagnostics.
#[derive(Debug, Default)]
pub struct CompilationResult {
    /// The compiled diagram, present only when no errors occurred
    pub diagram: Option<ExecutableDiagram>,
    /// Fatal diagnostics
    pub errors: Vec<CompilationError>,
    /// Non-fatal diagnostics
    pub warnings: Vec<CompilationError>,
}

impl CompilationResult {
    /// Whether compilation produced a diagram with no errors.
    pub fn is_valid(&self) -> bool {
        self.diagram.is_some() && self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub(crate) fn add_error(&mut self, error: CompilationError) {
        self.errors.push(error);
    }

    pub(crate) fn add_warning(&mut self, warning: CompilationError) {
        self.warnings.push(warning);
    }
}

/// An arrow resolved to `(node, label)` endpoint tuples.
#[derive(Debug, Clone)]
pub struct ResolvedConnection {
    /// Index of the originating arrow in the domain diagram
    pub arrow_index: usize,
    pub source_node: String,
    pub source_output: HandleLabel,
    pub target_node: String,
    pub target_input: HandleLabel,
}

/// State threaded through the compilation phases: inputs, accumulated
/// outputs and the diagnostics sink.
pub struct CompilationContext {
    /// Compiler input
    pub domain: DomainDiagram,
    /// Rule registry consulted for edge legality and transforms
    pub registry: Arc<RuleRegistry>,

    // Phase outputs
    /// Typed nodes (node transformation)
    pub typed_nodes: Vec<ExecutableNode>,
    /// node id → declared-or-default handles (validation)
    pub handles: HashMap<String, Vec<HandleSpec>>,
    /// Resolved arrows (connection resolution)
    pub resolved: Vec<ResolvedConnection>,
    /// Built edges (edge building)
    pub edges: Vec<crate::diagram::ExecutableEdge>,

    // Metadata accumulated along the way
    pub start_nodes: BTreeSet<String>,
    pub person_nodes: BTreeMap<String, Vec<String>>,
    pub node_dependencies: BTreeMap<String, BTreeSet<String>>,
    pub parallel_groups: Vec<BTreeSet<String>>,

    /// Diagnostics and final diagram
    pub result: CompilationResult,
}

impl CompilationContext {
    pub fn new(domain: DomainDiagram, registry: Arc<RuleRegistry>) -> Self {
        Self {
            domain,
            registry,
            typed_nodes: Vec::new(),
            handles: HashMap::new(),
            resolved: Vec::new(),
            edges: Vec::new(),
            start_nodes: BTreeSet::new(),
            person_nodes: BTreeMap::new(),
            node_dependencies: BTreeMap::new(),
            parallel_groups: Vec::new(),
            result: CompilationResult::default(),
        }
    }

    /// Typed node lookup by id.
    pub fn typed_node(&self, id: &str) -> Option<&ExecutableNode> {
        self.typed_nodes.iter().find(|n| n.id() == id)
    }

    /// Report an error from `phase`.
    pub fn error(&mut self, phase: CompilationPhase, message: impl Into<String>) {
        self.result.add_error(CompilationError {
            phase,
            message: message.into(),
            node_id: None,
            arrow_id: None,
            suggestion: None,
        });
    }

    /// Report an error tied to a node.
    pub fn node_error(
        &mut self,
        phase: CompilationPhase,
        node_id: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.result.add_error(CompilationError {
            phase,
            message: message.into(),
            node_id: Some(node_id.into()),
            arrow_id: None,
            suggestion: None,
        });
    }

    /// Report an error tied to an arrow.
    pub fn arrow_error(
        &mut self,
        phase: CompilationPhase,
        arrow_id: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.result.add_error(CompilationError {
            phase,
            message: message.into(),
            node_id: None,
            arrow_id: Some(arrow_id.into()),
            suggestion: None,
        });
    }

    /// Report a warning, optionally tied to a node, with an optional
    /// suggestion.
    pub fn warning(
        &mut self,
        phase: CompilationPhase,
        node_id: Option<String>,
        message: impl Into<String>,
        suggestion: Option<String>,
    ) {
        self.result.add_warning(CompilationError {
            phase,
            message: message.into(),
            node_id,
            arrow_id: None,
            suggestion,
        });
    }
}

/// A single compilation phase. Phases read from and write to the context;
/// the pipeline stops at the first phase that reports errors.
pub(crate) trait CompilerPhase: Send + Sync {
    fn phase(&self) -> CompilationPhase;
    fn run(&self, ctx: &mut CompilationContext);
}
