//! Edge input resolution for node dispatch.
//!
//! For each live incoming edge of a node about to run: fetch the source
//! node's last delivered output, apply the edge's transform rules, and
//! key the value under the edge's target-input label. Person jobs select
//! between `first` and `default` inputs based on their iteration.

use crate::diagram::{ExecutableDiagram, ExecutableEdge};
use crate::handles::HandleLabel;
use crate::nodes::ExecutableNode;
use super::scheduler::Scheduler;
use serde_json::Value;
use std::collections::BTreeMap;

/// Inputs keyed by target-input label.
pub type InputMap = BTreeMap<String, Value>;

/// Resolve the input map for a node about to dispatch.
pub fn resolve_inputs(
    diagram: &ExecutableDiagram,
    scheduler: &Scheduler,
    node: &ExecutableNode,
) -> InputMap {
    let iteration = scheduler.iterations_of(node.id());
    let is_person = node.max_iteration().is_some();

    let live_edges: Vec<&ExecutableEdge> = diagram
        .incoming_edges(node.id())
        .filter(|e| !scheduler.is_gated(&e.id))
        .collect();

    // first/default selection: iteration 0 prefers `first` edges when any
    // exist (dropping `default`); iterations ≥ 1 ignore `first` edges.
    let has_first = live_edges
        .iter()
        .any(|e| e.target_input == HandleLabel::First);
    let selected: Vec<&ExecutableEdge> = live_edges
        .into_iter()
        .filter(|e| {
            if !is_person {
                return true;
            }
            match &e.target_input {
                HandleLabel::First => iteration == 0,
                HandleLabel::Default | HandleLabel::Input => !(iteration == 0 && has_first),
                _ => true,
            }
        })
        .collect();

    let mut inputs = InputMap::new();
    for edge in selected {
        let Some(output) = scheduler.output_of(&edge.source_node_id) else {
            continue;
        };
        let value = apply_transforms(output.clone(), &edge.transform_rules);
        inputs.insert(edge.target_input.as_str().to_string(), value);
    }
    inputs
}

/// Apply an edge's merged transform map to a value.
fn apply_transforms(
    value: Value,
    transforms: &serde_json::Map<String, Value>,
) -> Value {
    let mut result = value;
    if transforms
        .get("extract_tool_results")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        if let Some(tool_results) = result.get("tool_results") {
            result = tool_results.clone();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::DiagramCompiler;
    use crate::domain::{DomainArrow, DomainDiagram, DomainNode, NodeType};
    use serde_json::json;
    use std::sync::Arc;

    fn person_loop() -> (Arc<ExecutableDiagram>, Scheduler) {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(
                DomainNode::new("seed", NodeType::CodeJob).with_prop("code", json!("1")),
            )
            .with_node(
                DomainNode::new("p", NodeType::PersonJob)
                    .with_prop("person", json!("alice"))
                    .with_prop("max_iteration", json!(3)),
            )
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "seed:default"))
            .with_arrow(DomainArrow::new("a2", "seed:default", "p:first"))
            .with_arrow(DomainArrow::new("a3", "s:default", "p:default"))
            .with_arrow(DomainArrow::new("a4", "p:default", "e:default"));
        let diagram = Arc::new(DiagramCompiler::new().compile(&domain).unwrap());
        let scheduler = Scheduler::new(diagram.clone());
        (diagram, scheduler)
    }

    #[test]
    fn test_first_edge_wins_on_iteration_zero() {
        let (diagram, mut scheduler) = person_loop();
        scheduler.mark_completed("s", json!("from start"), None);
        scheduler.mark_completed("seed", json!("from seed"), None);

        let node = diagram.get_node("p").unwrap();
        let inputs = resolve_inputs(&diagram, &scheduler, node);
        assert_eq!(inputs.get("first"), Some(&json!("from seed")));
        assert!(inputs.get("default").is_none());
    }

    #[test]
    fn test_default_edge_used_on_later_iterations() {
        let (diagram, mut scheduler) = person_loop();
        scheduler.mark_completed("s", json!("from start"), None);
        scheduler.mark_completed("seed", json!("from seed"), None);
        scheduler.mark_completed("p", json!("turn 1"), None);

        let node = diagram.get_node("p").unwrap();
        let inputs = resolve_inputs(&diagram, &scheduler, node);
        assert!(inputs.get("first").is_none());
        assert_eq!(inputs.get("default"), Some(&json!("from start")));
    }

    #[test]
    fn test_missing_first_falls_back_to_default() {
        let domain = DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(
                DomainNode::new("p", NodeType::PersonJob).with_prop("person", json!("alice")),
            )
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "p:default"))
            .with_arrow(DomainArrow::new("a2", "p:default", "e:default"));
        let diagram = Arc::new(DiagramCompiler::new().compile(&domain).unwrap());
        let mut scheduler = Scheduler::new(diagram.clone());
        scheduler.mark_completed("s", json!("seed"), None);

        let node = diagram.get_node("p").unwrap();
        let inputs = resolve_inputs(&diagram, &scheduler, node);
        assert_eq!(inputs.get("default"), Some(&json!("seed")));
    }

    #[test]
    fn test_extract_tool_results_transform() {
        let mut transforms = serde_json::Map::new();
        transforms.insert("extract_tool_results".into(), json!(true));
        let output = json!({"text": "ignore", "tool_results": [1, 2, 3]});
        assert_eq!(apply_transforms(output, &transforms), json!([1, 2, 3]));

        // Without the flag, the value passes through untouched.
        let output = json!({"text": "keep", "tool_results": [1]});
        assert_eq!(
            apply_transforms(output.clone(), &serde_json::Map::new()),
            output
        );
    }
}
