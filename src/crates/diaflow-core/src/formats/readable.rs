//! Readable YAML format: human-first workflow form.
//!
//! ```yaml
//! workflow:
//!   - Start:
//!       type: start
//!   - Ask:
//!       type: person_job
//!       person: Alice
//!       max_iteration: 2
//!   - Check:
//!       type: condition
//!       condition_type: detect_max_iterations
//!   - Done:
//!       type: endpoint
//! flow:
//!   Start: "Ask:first"
//!   Ask: Check
//!   Check:
//!     condtrue: Done
//!     condfalse: Ask
//! persons:
//!   Alice:
//!     service: openai
//!     model: gpt-4o-mini
//!     api_key_id: default
//! ```
//!
//! `flow` values are a single target, a list of targets, or a map of
//! source-handle → target (used for condition branches). Targets are
//! `"Label"` or `"Label:handle"`.

use crate::domain::{
    DiagramMetadata, DomainArrow, DomainDiagram, DomainNode, DomainPerson, NodeType,
    PersonLlmConfig, Vec2,
};
use crate::error::{DiagramError, Result};
use crate::handles::{build_handle_id, HandleLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
struct ReadableDiagram {
    workflow: Vec<BTreeMap<String, ReadableStep>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    flow: BTreeMap<String, FlowTarget>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    persons: BTreeMap<String, PersonLlmConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<DiagramMetadata>,
}

#[derive(Serialize, Deserialize)]
struct ReadableStep {
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(flatten)]
    props: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FlowTarget {
    /// One downstream target
    Single(String),
    /// Several downstream targets from the default handle
    Multiple(Vec<String>),
    /// Source-handle → target (condition branches)
    Branches(BTreeMap<String, String>),
}

/// Serialize to Readable YAML.
pub fn serialize(diagram: &DomainDiagram) -> Result<String> {
    let mut workflow = Vec::with_capacity(diagram.nodes.len());
    let mut labels: BTreeMap<String, String> = BTreeMap::new();
    for node in &diagram.nodes {
        let label = node.label().to_string();
        if labels.values().any(|existing| existing == &label) {
            return Err(DiagramError::Validation(format!(
                "readable format requires unique node labels; '{label}' repeats"
            )));
        }
        labels.insert(node.id.clone(), label.clone());
        let mut props = node.data.clone();
        props.remove("label");
        let mut step = BTreeMap::new();
        step.insert(
            label,
            ReadableStep {
                node_type: node.node_type,
                props,
            },
        );
        workflow.push(step);
    }

    // Group arrows by source node to build the flow map.
    let mut by_source: BTreeMap<String, Vec<(HandleLabel, String)>> = BTreeMap::new();
    for arrow in &diagram.arrows {
        let source = crate::handles::parse_handle_id(&arrow.source)?;
        let target = crate::handles::parse_handle_id(&arrow.target)?;
        let target_ref = match &target.label {
            HandleLabel::Default => labels[&target.node_id].clone(),
            other => format!("{}:{other}", labels[&target.node_id]),
        };
        by_source
            .entry(labels[&source.node_id].clone())
            .or_default()
            .push((source.label, target_ref));
    }

    let mut flow = BTreeMap::new();
    for (source, mut targets) in by_source {
        let all_default = targets.iter().all(|(label, _)| *label == HandleLabel::Default);
        let target = if all_default {
            targets.sort_by(|a, b| a.1.cmp(&b.1));
            if targets.len() == 1 {
                FlowTarget::Single(targets.remove(0).1)
            } else {
                FlowTarget::Multiple(targets.into_iter().map(|(_, t)| t).collect())
            }
        } else {
            FlowTarget::Branches(
                targets
                    .into_iter()
                    .map(|(label, t)| (label.as_str().to_string(), t))
                    .collect(),
            )
        };
        flow.insert(source, target);
    }

    let readable = ReadableDiagram {
        workflow,
        flow,
        persons: diagram
            .persons
            .iter()
            .map(|p| (p.label.clone(), p.llm_config.clone()))
            .collect(),
        metadata: diagram.metadata.clone(),
    };
    Ok(serde_yaml::to_string(&readable)?)
}

/// Deserialize from Readable YAML.
pub fn deserialize(content: &str) -> Result<DomainDiagram> {
    let readable: ReadableDiagram = serde_yaml::from_str(content)?;

    let mut nodes = Vec::new();
    for step in readable.workflow {
        if step.len() != 1 {
            return Err(DiagramError::Validation(
                "each workflow entry must hold exactly one labeled step".into(),
            ));
        }
        let (label, step) = step.into_iter().next().expect("length checked above");
        let mut data = step.props;
        data.insert("label".into(), serde_json::json!(label));
        nodes.push(DomainNode {
            id: label,
            node_type: step.node_type,
            position: Vec2::default(),
            data,
        });
    }

    let mut arrows = Vec::new();
    let mut index = 0usize;
    for (source_label, target) in readable.flow {
        let mut push = |source_handle: HandleLabel, target_ref: &str| {
            let (target_label, target_handle) = super::light::split_endpoint(target_ref);
            arrows.push(DomainArrow {
                id: format!("flow_{index}"),
                source: build_handle_id(&source_label, &source_handle),
                target: build_handle_id(&target_label, &target_handle),
                content_type: None,
                label: None,
                data: None,
            });
            index += 1;
        };
        match target {
            FlowTarget::Single(target_ref) => push(HandleLabel::Default, &target_ref),
            FlowTarget::Multiple(refs) => {
                for target_ref in refs {
                    push(HandleLabel::Default, &target_ref);
                }
            }
            FlowTarget::Branches(branches) => {
                for (handle, target_ref) in branches {
                    push(HandleLabel::from_str(&handle), &target_ref);
                }
            }
        }
    }

    let persons = readable
        .persons
        .into_iter()
        .map(|(label, llm_config)| DomainPerson {
            id: label.clone(),
            label,
            llm_config,
        })
        .collect();

    Ok(DomainDiagram {
        nodes,
        arrows,
        handles: Vec::new(),
        persons,
        metadata: readable.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
workflow:
  - Start:
      type: start
  - Ask:
      type: person_job
      person: Alice
      max_iteration: 2
  - Check:
      type: condition
      condition_type: detect_max_iterations
  - Done:
      type: endpoint
flow:
  Start: "Ask:first"
  Ask: Check
  Check:
    condtrue: Done
    condfalse: Ask
persons:
  Alice:
    service: openai
    model: gpt-4o-mini
    api_key_id: default
"#;

    #[test]
    fn test_deserialize_sample() {
        let diagram = deserialize(SAMPLE).unwrap();
        assert_eq!(diagram.nodes.len(), 4);
        assert_eq!(diagram.arrows.len(), 4);
        assert!(diagram
            .arrows
            .iter()
            .any(|a| a.source == "Check:condfalse" && a.target == "Ask:default"));
    }

    #[test]
    fn test_round_trip_preserves_flow() {
        let diagram = deserialize(SAMPLE).unwrap();
        let text = serialize(&diagram).unwrap();
        let back = deserialize(&text).unwrap();

        assert_eq!(back.nodes.len(), diagram.nodes.len());
        assert_eq!(back.arrows.len(), diagram.arrows.len());
        assert!(back
            .arrows
            .iter()
            .any(|a| a.source == "Check:condtrue" && a.target == "Done:default"));
    }

    #[test]
    fn test_compiles_through_pipeline() {
        let diagram = deserialize(SAMPLE).unwrap();
        let compiled = crate::compile::DiagramCompiler::new()
            .compile(&diagram)
            .unwrap();
        assert_eq!(compiled.node_count(), 4);
    }
}
