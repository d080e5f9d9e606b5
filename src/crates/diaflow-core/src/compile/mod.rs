//! Multi-phase diagram compiler
//!
//! The compiler turns a declarative [`DomainDiagram`] into an immutable
//! [`ExecutableDiagram`] through six phases:
//!
//! ```text
//! DomainDiagram
//!      │
//!      ▼
//! ┌─────────────────────┐  structural + semantic checks,
//! │ 1. Validation       │  handle index (declared or defaults)
//! ├─────────────────────┤
//! │ 2. Transformation   │  per-type factory → typed nodes
//! ├─────────────────────┤
//! │ 3. Resolution       │  arrow handles → (node, label) tuples
//! ├─────────────────────┤
//! │ 4. Edge Building    │  legality via rule registry, transform
//! │                     │  merge, dependency index
//! ├─────────────────────┤
//! │ 5. Optimization     │  reachability / cycle warnings,
//! │                     │  parallel-group hints (never fatal)
//! ├─────────────────────┤
//! │ 6. Assembly         │  ExecutableDiagram + metadata block
//! └─────────────────────┘
//!      │
//!      ▼
//! ExecutableDiagram
//! ```
//!
//! The pipeline stops at the first phase that reports errors. Phase logic
//! never panics or throws: diagnostics accumulate in a
//! [`CompilationResult`] and each carries its originating phase plus the
//! node/arrow id where known.
//!
//! # Quick Start
//!
//! ```rust
//! use diaflow_core::compile::DiagramCompiler;
//! use diaflow_core::domain::{DomainArrow, DomainDiagram, DomainNode, NodeType};
//!
//! let domain = DomainDiagram::new()
//!     .with_node(DomainNode::new("start", NodeType::Start))
//!     .with_node(DomainNode::new("end", NodeType::Endpoint))
//!     .with_arrow(DomainArrow::new("a1", "start:default", "end:default"));
//!
//! let compiler = DiagramCompiler::new();
//! let diagram = compiler.compile(&domain).unwrap();
//! assert_eq!(diagram.node_count(), 2);
//! ```

pub mod context;
pub mod decompile;
pub mod phases;

pub use context::{
    CompilationContext, CompilationError, CompilationPhase, CompilationResult, ResolvedConnection,
};

use crate::diagram::ExecutableDiagram;
use crate::domain::DomainDiagram;
use crate::error::{DiagramError, Result};
use crate::rules::{Environment, RuleRegistry};
use context::CompilerPhase;
use std::sync::Arc;

/// The multi-phase diagram compiler.
///
/// Holds the rule registry consulted for edge legality and transform
/// population. Cheap to construct; stateless across compilations.
pub struct DiagramCompiler {
    registry: Arc<RuleRegistry>,
    phases: Vec<Box<dyn CompilerPhase>>,
}

impl DiagramCompiler {
    /// Compiler backed by a fresh registry holding the built-in rules,
    /// configured from the process environment.
    pub fn new() -> Self {
        Self::with_registry(Arc::new(RuleRegistry::with_defaults(Environment::from_env())))
    }

    /// Compiler backed by an explicit rule registry.
    pub fn with_registry(registry: Arc<RuleRegistry>) -> Self {
        Self {
            registry,
            phases: vec![
                Box::new(phases::ValidationPhase),
                Box::new(phases::NodeTransformationPhase::new()),
                Box::new(phases::ConnectionResolutionPhase),
                Box::new(phases::EdgeBuildingPhase),
                Box::new(phases::OptimizationPhase),
                Box::new(phases::AssemblyPhase),
            ],
        }
    }

    /// The registry this compiler consults.
    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    /// Compile, converting any diagnostics into a
    /// [`DiagramError::Compilation`].
    pub fn compile(&self, domain: &DomainDiagram) -> Result<ExecutableDiagram> {
        let result = self.compile_with_diagnostics(domain, None);
        if !result.errors.is_empty() {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            return Err(DiagramError::Compilation(messages.join("\n")));
        }
        result.diagram.ok_or_else(|| {
            DiagramError::Internal("compilation succeeded but produced no diagram".into())
        })
    }

    /// Compile with detailed diagnostics; never fails from phase logic.
    ///
    /// `stop_after` halts the pipeline after the named phase, which is
    /// useful for testing individual phases.
    pub fn compile_with_diagnostics(
        &self,
        domain: &DomainDiagram,
        stop_after: Option<CompilationPhase>,
    ) -> CompilationResult {
        let mut ctx = CompilationContext::new(domain.clone(), self.registry.clone());

        for phase in &self.phases {
            phase.run(&mut ctx);

            if !ctx.result.errors.is_empty() {
                tracing::debug!(
                    phase = %phase.phase(),
                    errors = ctx.result.errors.len(),
                    "compilation stopped"
                );
                break;
            }
            if stop_after == Some(phase.phase()) {
                break;
            }
        }

        ctx.result
    }

    /// Best-effort reverse projection of a compiled diagram back into its
    /// declarative form. See [`decompile`](decompile::decompile).
    pub fn decompile(&self, diagram: &ExecutableDiagram) -> DomainDiagram {
        decompile::decompile(diagram)
    }
}

impl Default for DiagramCompiler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainArrow, DomainNode, NodeType};
    use serde_json::json;

    fn linear_diagram() -> DomainDiagram {
        DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("j", NodeType::CodeJob).with_prop("code", json!("2*3")))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "j:default"))
            .with_arrow(DomainArrow::new("a2", "j:default", "e:default"))
    }

    #[test]
    fn test_compile_linear_diagram() {
        let diagram = DiagramCompiler::new().compile(&linear_diagram()).unwrap();
        assert_eq!(diagram.node_count(), 3);
        assert_eq!(diagram.edge_count(), 2);
        assert!(diagram.metadata.start_nodes.contains("s"));
        assert!(diagram.validate().is_empty());
    }

    #[test]
    fn test_compile_minimal_start_endpoint() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "e:default"));
        let diagram = DiagramCompiler::new().compile(&domain).unwrap();
        assert_eq!(diagram.node_count(), 2);
    }

    #[test]
    fn test_compile_fails_with_phase_context() {
        let domain = DomainDiagram::new(); // empty
        let err = DiagramCompiler::new().compile(&domain).unwrap_err();
        let message = format!("{err}");
        assert!(message.contains("validation"));
        assert!(message.contains("at least one node"));
    }

    #[test]
    fn test_stop_after_phase() {
        let result = DiagramCompiler::new()
            .compile_with_diagnostics(&linear_diagram(), Some(CompilationPhase::Validation));
        assert!(result.errors.is_empty());
        assert!(result.diagram.is_none());
    }

    #[test]
    fn test_diagnostics_never_throw() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("bad", "nope", "e:default"));
        let result = DiagramCompiler::new().compile_with_diagnostics(&domain, None);
        assert!(!result.is_valid());
        assert!(result.errors.iter().all(|e| e.arrow_id.is_some()));
    }

    #[test]
    fn test_decompiled_diagram_recompiles() {
        let compiler = DiagramCompiler::new();
        let compiled = compiler.compile(&linear_diagram()).unwrap();
        let domain = compiler.decompile(&compiled);
        let recompiled = compiler.compile(&domain).unwrap();
        assert_eq!(recompiled.node_count(), compiled.node_count());
        assert_eq!(recompiled.edge_count(), compiled.edge_count());
    }
}
