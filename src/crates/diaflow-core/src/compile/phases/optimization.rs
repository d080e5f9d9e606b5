//! Phase 5: graph analysis - reachability, cycles, parallel groups.
//!
//! Pure analysis: this phase only emits warnings and metadata, never
//! fatal errors. Cycles are legal (iteration loops rely on them) but are
//! reported so UIs can annotate them.

use crate::compile::context::{CompilationContext, CompilationPhase, CompilerPhase};
use crate::domain::NodeType;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

pub struct OptimizationPhase;

impl CompilerPhase for OptimizationPhase {
    fn phase(&self) -> CompilationPhase {
        CompilationPhase::Optimization
    }

    fn run(&self, ctx: &mut CompilationContext) {
        self.detect_unreachable_nodes(ctx);
        self.detect_cycles(ctx);
        self.analyze_parallel_groups(ctx);
    }
}

impl OptimizationPhase {
    fn detect_unreachable_nodes(&self, ctx: &mut CompilationContext) {
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &ctx.edges {
            outgoing
                .entry(edge.source_node_id.as_str())
                .or_default()
                .push(edge.target_node_id.as_str());
        }

        let mut reached: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = ctx.start_nodes.iter().cloned().collect();
        while let Some(node) = queue.pop_front() {
            if !reached.insert(node.clone()) {
                continue;
            }
            for &next in outgoing.get(node.as_str()).into_iter().flatten() {
                if !reached.contains(next) {
                    queue.push_back(next.to_string());
                }
            }
        }

        let unreachable: Vec<String> = ctx
            .typed_nodes
            .iter()
            .filter(|n| n.node_type() != NodeType::Start && !reached.contains(n.id()))
            .map(|n| n.id().to_string())
            .collect();
        for node_id in unreachable {
            ctx.warning(
                self.phase(),
                Some(node_id.clone()),
                format!("node '{node_id}' is unreachable from any start node"),
                Some("add a connection from a reachable node or start node".into()),
            );
        }
    }

    fn detect_cycles(&self, ctx: &mut CompilationContext) {
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &ctx.edges {
            outgoing
                .entry(edge.source_node_id.as_str())
                .or_default()
                .push(edge.target_node_id.as_str());
        }

        // Iterative DFS with colors; a back edge to a gray node closes
        // a cycle.
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: HashMap<&str, Color> = ctx
            .typed_nodes
            .iter()
            .map(|n| (n.id(), Color::White))
            .collect();
        let mut cycle_members: BTreeSet<String> = BTreeSet::new();

        for start in ctx.typed_nodes.iter().map(|n| n.id()) {
            if color.get(start) != Some(&Color::White) {
                continue;
            }
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            let mut path: Vec<&str> = vec![start];
            color.insert(start, Color::Gray);

            while let Some((node, next_child)) = stack.pop() {
                let children = outgoing.get(node).cloned().unwrap_or_default();
                if next_child < children.len() {
                    stack.push((node, next_child + 1));
                    let child = children[next_child];
                    match color.get(child) {
                        Some(Color::White) => {
                            color.insert(child, Color::Gray);
                            stack.push((child, 0));
                            path.push(child);
                        }
                        Some(Color::Gray) => {
                            // Everything from the child to the top of the
                            // current path participates in a cycle.
                            if let Some(pos) = path.iter().position(|&n| n == child) {
                                for &member in &path[pos..] {
                                    cycle_members.insert(member.to_string());
                                }
                            }
                        }
                        _ => {}
                    }
                } else {
                    color.insert(node, Color::Black);
                    path.pop();
                }
            }
        }

        if !cycle_members.is_empty() {
            let members: Vec<String> = cycle_members.into_iter().collect();
            ctx.warning(
                self.phase(),
                None,
                format!("circular dependencies detected involving: {members:?}"),
                Some("use a condition node with detect_max_iterations to exit loops".into()),
            );
        }
    }

    /// Nodes with identical, non-empty dependency sets can be dispatched
    /// together. Recorded as scheduler hints; singleton groups carry no
    /// information and are dropped.
    fn analyze_parallel_groups(&self, ctx: &mut CompilationContext) {
        let mut by_deps: BTreeMap<Vec<String>, BTreeSet<String>> = BTreeMap::new();
        for node in &ctx.typed_nodes {
            let Some(deps) = ctx.node_dependencies.get(node.id()) else {
                continue;
            };
            if deps.is_empty() {
                continue;
            }
            let key: Vec<String> = deps.iter().cloned().collect();
            by_deps.entry(key).or_default().insert(node.id().to_string());
        }

        ctx.parallel_groups = by_deps
            .into_values()
            .filter(|group| group.len() >= 2)
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::phases::edges::EdgeBuildingPhase;
    use crate::compile::phases::resolution::ConnectionResolutionPhase;
    use crate::compile::phases::transform::NodeTransformationPhase;
    use crate::compile::phases::validation::ValidationPhase;
    use crate::domain::{DomainArrow, DomainDiagram, DomainNode};
    use crate::rules::{Environment, RuleRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn analyze(domain: DomainDiagram) -> CompilationContext {
        let registry = Arc::new(RuleRegistry::with_defaults(Environment::Testing));
        let mut ctx = CompilationContext::new(domain, registry);
        ValidationPhase.run(&mut ctx);
        NodeTransformationPhase::new().run(&mut ctx);
        ConnectionResolutionPhase.run(&mut ctx);
        EdgeBuildingPhase.run(&mut ctx);
        ctx.result.warnings.clear();
        OptimizationPhase.run(&mut ctx);
        ctx
    }

    fn code(id: &str) -> DomainNode {
        DomainNode::new(id, NodeType::CodeJob).with_prop("code", json!("1"))
    }

    #[test]
    fn test_unreachable_node_warns() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(code("island"))
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "e:default"));
        let ctx = analyze(domain);

        assert!(ctx
            .result
            .warnings
            .iter()
            .any(|w| w.message.contains("unreachable") && w.node_id.as_deref() == Some("island")));
    }

    #[test]
    fn test_cycle_warns_but_does_not_fail() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(code("a"))
            .with_node(code("b"))
            .with_arrow(DomainArrow::new("a1", "s:default", "a:default"))
            .with_arrow(DomainArrow::new("a2", "a:default", "b:default"))
            .with_arrow(DomainArrow::new("a3", "b:default", "a:default"));
        let ctx = analyze(domain);

        assert!(ctx.result.errors.is_empty());
        assert!(ctx
            .result
            .warnings
            .iter()
            .any(|w| w.message.contains("circular")));
    }

    #[test]
    fn test_parallel_groups_share_dependency_set() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(code("left"))
            .with_node(code("right"))
            .with_node(code("after"))
            .with_arrow(DomainArrow::new("a1", "s:default", "left:default"))
            .with_arrow(DomainArrow::new("a2", "s:default", "right:default"))
            .with_arrow(DomainArrow::new("a3", "left:default", "after:default"));
        let ctx = analyze(domain);

        assert_eq!(ctx.parallel_groups.len(), 1);
        let group = &ctx.parallel_groups[0];
        assert!(group.contains("left") && group.contains("right"));
        assert!(!group.contains("after"));
    }
}
