//! Phase 3: resolve arrow handles to `(node, label)` endpoint tuples.

use crate::compile::context::{
    CompilationContext, CompilationPhase, CompilerPhase, ResolvedConnection,
};
use crate::handles::{self, HandleDirection, HandleLabel};

pub struct ConnectionResolutionPhase;

impl CompilerPhase for ConnectionResolutionPhase {
    fn phase(&self) -> CompilationPhase {
        CompilationPhase::ConnectionResolution
    }

    fn run(&self, ctx: &mut CompilationContext) {
        let mut resolved = Vec::with_capacity(ctx.domain.arrows.len());
        let mut failures = Vec::new();

        for (index, arrow) in ctx.domain.arrows.iter().enumerate() {
            let source = match handles::parse_handle_id(&arrow.source) {
                Ok(parsed) => parsed,
                Err(err) => {
                    failures.push((arrow.id.clone(), err.to_string()));
                    continue;
                }
            };
            let target = match handles::parse_handle_id(&arrow.target) {
                Ok(parsed) => parsed,
                Err(err) => {
                    failures.push((arrow.id.clone(), err.to_string()));
                    continue;
                }
            };

            let mut ok = true;
            if let Some(message) = check_handle(
                ctx,
                &source.node_id,
                &source.label,
                HandleDirection::Output,
            ) {
                failures.push((arrow.id.clone(), message));
                ok = false;
            }
            if let Some(message) =
                check_handle(ctx, &target.node_id, &target.label, HandleDirection::Input)
            {
                failures.push((arrow.id.clone(), message));
                ok = false;
            }

            if ok {
                resolved.push(ResolvedConnection {
                    arrow_index: index,
                    source_node: source.node_id,
                    source_output: source.label,
                    target_node: target.node_id,
                    target_input: target.label,
                });
            }
        }

        for (arrow_id, message) in failures {
            ctx.arrow_error(self.phase(), arrow_id, message);
        }
        ctx.resolved = resolved;
    }
}

/// Verify the node exists in the handle index and exposes the label with
/// the expected direction.
fn check_handle(
    ctx: &CompilationContext,
    node_id: &str,
    label: &HandleLabel,
    direction: HandleDirection,
) -> Option<String> {
    let Some(specs) = ctx.handles.get(node_id) else {
        return Some(format!("handle references unknown node '{node_id}'"));
    };
    let found = specs
        .iter()
        .any(|spec| &spec.label == label && spec.direction == direction);
    if found {
        None
    } else {
        let side = match direction {
            HandleDirection::Output => "output",
            HandleDirection::Input => "input",
        };
        Some(format!(
            "node '{node_id}' has no {side} handle labeled '{label}'"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::phases::validation::ValidationPhase;
    use crate::domain::{DomainArrow, DomainDiagram, DomainNode, NodeType};
    use crate::rules::{Environment, RuleRegistry};
    use std::sync::Arc;

    fn resolve(domain: DomainDiagram) -> CompilationContext {
        let registry = Arc::new(RuleRegistry::with_defaults(Environment::Testing));
        let mut ctx = CompilationContext::new(domain, registry);
        ValidationPhase.run(&mut ctx); // builds the handle index
        ctx.result.errors.clear();
        ConnectionResolutionPhase.run(&mut ctx);
        ctx
    }

    #[test]
    fn test_resolves_default_handles() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "e:default"));
        let ctx = resolve(domain);

        assert!(ctx.result.errors.is_empty());
        assert_eq!(ctx.resolved.len(), 1);
        assert_eq!(ctx.resolved[0].source_node, "s");
        assert_eq!(ctx.resolved[0].target_input, HandleLabel::Default);
    }

    #[test]
    fn test_direction_mismatch_rejected() {
        // An endpoint's default handles are input-only, so using one as a
        // source must fail resolution.
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "e:default", "s:default"));
        let ctx = resolve(domain);

        assert!(ctx
            .result
            .errors
            .iter()
            .any(|e| e.message.contains("no output handle")));
    }

    #[test]
    fn test_missing_branch_handle_rejected() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:condtrue", "e:default"));
        let ctx = resolve(domain);

        let err = ctx.result.errors.first().unwrap();
        assert!(err.message.contains("condtrue"));
        assert_eq!(err.arrow_id.as_deref(), Some("a1"));
    }
}
