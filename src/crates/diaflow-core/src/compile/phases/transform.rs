//! Phase 2: build typed nodes through the per-type factory.

use crate::compile::context::{CompilationContext, CompilationPhase, CompilerPhase};
use crate::domain::NodeType;
use crate::nodes::NodeFactory;

pub struct NodeTransformationPhase {
    factory: NodeFactory,
}

impl NodeTransformationPhase {
    pub fn new() -> Self {
        Self {
            factory: NodeFactory::new(),
        }
    }
}

impl CompilerPhase for NodeTransformationPhase {
    fn phase(&self) -> CompilationPhase {
        CompilationPhase::NodeTransformation
    }

    fn run(&self, ctx: &mut CompilationContext) {
        let mut typed = Vec::with_capacity(ctx.domain.nodes.len());
        let mut failures = Vec::new();

        for node in &ctx.domain.nodes {
            match self.factory.build(node) {
                Ok(built) => typed.push(built),
                Err(message) => failures.push((node.id.clone(), message)),
            }
        }

        for (node_id, message) in failures {
            ctx.node_error(self.phase(), node_id, message);
        }

        // Extract the start-node set and the person → nodes index while
        // the domain nodes are at hand.
        for node in &ctx.domain.nodes {
            if node.node_type == NodeType::Start {
                ctx.start_nodes.insert(node.id.clone());
            }
        }
        for built in &typed {
            if let Some(person) = built.person_id() {
                ctx.person_nodes
                    .entry(person.to_string())
                    .or_default()
                    .push(built.id().to_string());
            }
        }

        ctx.typed_nodes = typed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainDiagram, DomainNode};
    use crate::rules::{Environment, RuleRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn run_transform(domain: DomainDiagram) -> CompilationContext {
        let registry = Arc::new(RuleRegistry::with_defaults(Environment::Testing));
        let mut ctx = CompilationContext::new(domain, registry);
        NodeTransformationPhase::new().run(&mut ctx);
        ctx
    }

    #[test]
    fn test_builds_typed_nodes_and_indexes() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(
                DomainNode::new("p", NodeType::PersonJob)
                    .with_prop("person", json!("alice"))
                    .with_prop("max_iteration", json!(3)),
            );
        let ctx = run_transform(domain);

        assert!(ctx.result.errors.is_empty());
        assert_eq!(ctx.typed_nodes.len(), 2);
        assert!(ctx.start_nodes.contains("s"));
        assert_eq!(ctx.person_nodes.get("alice").unwrap(), &vec!["p".to_string()]);
    }

    #[test]
    fn test_factory_failure_reported_with_node_id() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("p", NodeType::PersonJob)); // missing person
        let ctx = run_transform(domain);

        let err = ctx.result.errors.first().unwrap();
        assert_eq!(err.node_id.as_deref(), Some("p"));
        assert_eq!(err.phase, CompilationPhase::NodeTransformation);
    }
}
