//! Phase 4: build executable edges, consult rules, index dependencies.

use crate::compile::context::{CompilationContext, CompilationPhase, CompilerPhase};
use crate::diagram::ExecutableEdge;
use crate::rules::RuleRegistry;

pub struct EdgeBuildingPhase;

impl CompilerPhase for EdgeBuildingPhase {
    fn phase(&self) -> CompilationPhase {
        CompilationPhase::EdgeBuilding
    }

    fn run(&self, ctx: &mut CompilationContext) {
        let mut edges = Vec::with_capacity(ctx.resolved.len());
        let mut failures = Vec::new();

        for connection in &ctx.resolved {
            let arrow = &ctx.domain.arrows[connection.arrow_index];
            let source = ctx.typed_node(&connection.source_node);
            let target = ctx.typed_node(&connection.target_node);
            let (Some(source), Some(target)) = (source, target) else {
                // Typed node missing means an earlier phase already
                // reported the node; don't double-report.
                continue;
            };

            // Connection legality is fail-closed through the registry.
            if !ctx
                .registry
                .can_connect(source.node_type(), target.node_type())
            {
                let reason = ctx
                    .registry
                    .connection_reason(source.node_type(), target.node_type())
                    .unwrap_or_else(|| "connection denied by rule registry".into());
                failures.push((arrow.id.clone(), reason));
                continue;
            }

            let type_based = ctx.registry.data_transform(source, target);
            let edge_specific = arrow
                .data
                .as_ref()
                .and_then(|d| d.get("transform_rules"))
                .and_then(|v| v.as_object())
                .cloned()
                .unwrap_or_default();
            let transform_rules = RuleRegistry::merge_transforms(edge_specific, type_based);

            let mut metadata = arrow.data.clone().unwrap_or_default();
            metadata.remove("transform_rules");
            if let Some(label) = &arrow.label {
                metadata.insert("label".into(), serde_json::Value::String(label.clone()));
            }

            edges.push(ExecutableEdge {
                id: arrow.id.clone(),
                source_node_id: connection.source_node.clone(),
                source_output: connection.source_output.clone(),
                target_node_id: connection.target_node.clone(),
                target_input: connection.target_input.clone(),
                content_type: arrow.content_type,
                transform_rules,
                metadata,
            });

            ctx.node_dependencies
                .entry(connection.target_node.clone())
                .or_default()
                .insert(connection.source_node.clone());
        }

        for (arrow_id, reason) in failures {
            ctx.arrow_error(self.phase(), arrow_id, reason);
        }
        ctx.edges = edges;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::phases::resolution::ConnectionResolutionPhase;
    use crate::compile::phases::transform::NodeTransformationPhase;
    use crate::compile::phases::validation::ValidationPhase;
    use crate::domain::{DomainArrow, DomainDiagram, DomainNode, NodeType};
    use crate::rules::{Environment, RuleRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn build_edges(domain: DomainDiagram) -> CompilationContext {
        let registry = Arc::new(RuleRegistry::with_defaults(Environment::Testing));
        let mut ctx = CompilationContext::new(domain, registry);
        ValidationPhase.run(&mut ctx);
        NodeTransformationPhase::new().run(&mut ctx);
        ConnectionResolutionPhase.run(&mut ctx);
        ctx.result.errors.clear();
        EdgeBuildingPhase.run(&mut ctx);
        ctx
    }

    #[test]
    fn test_builds_edges_and_dependencies() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("j", NodeType::CodeJob).with_prop("code", json!("1")))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "j:default"))
            .with_arrow(DomainArrow::new("a2", "j:default", "e:default"));
        let ctx = build_edges(domain);

        assert!(ctx.result.errors.is_empty());
        assert_eq!(ctx.edges.len(), 2);
        assert!(ctx.node_dependencies.get("j").unwrap().contains("s"));
        assert!(ctx.node_dependencies.get("e").unwrap().contains("j"));
    }

    #[test]
    fn test_tool_extraction_transform_populated() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(
                DomainNode::new("p", NodeType::PersonJob)
                    .with_prop("person", json!("alice"))
                    .with_prop("tools", json!(["search"])),
            )
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "p:first"))
            .with_arrow(DomainArrow::new("a2", "p:default", "e:default"));
        let ctx = build_edges(domain);

        let edge = ctx.edges.iter().find(|e| e.id == "a2").unwrap();
        assert_eq!(
            edge.transform_rules.get("extract_tool_results"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_edge_specific_transform_overrides_type_based() {
        let mut data = serde_json::Map::new();
        data.insert(
            "transform_rules".into(),
            json!({"extract_tool_results": false}),
        );
        let mut arrow = DomainArrow::new("a2", "p:default", "e:default");
        arrow.data = Some(data);

        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(
                DomainNode::new("p", NodeType::PersonJob)
                    .with_prop("person", json!("alice"))
                    .with_prop("tools", json!(["search"])),
            )
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "p:first"))
            .with_arrow(arrow);
        let ctx = build_edges(domain);

        let edge = ctx.edges.iter().find(|e| e.id == "a2").unwrap();
        assert_eq!(
            edge.transform_rules.get("extract_tool_results"),
            Some(&json!(false))
        );
    }
}
