//! Light YAML format: node list with label-based references.
//!
//! ```yaml
//! nodes:
//!   - label: Ask
//!     type: person_job
//!     person: Alice
//!     max_iteration: 2
//! connections:
//!   - from: "Start"
//!     to: "Ask:first"
//!   - from: "Check:condtrue"
//!     to: "Done"
//! persons:
//!   Alice:
//!     service: openai
//!     model: gpt-4o-mini
//!     api_key_id: default
//! ```
//!
//! Node labels double as identifiers, so they must be unique.
//! Connection endpoints are `"Label"` or `"Label:handle"`; a bare label
//! means the `default` handle on the appropriate side.

use crate::domain::{
    ContentType, DiagramMetadata, DomainArrow, DomainDiagram, DomainNode, DomainPerson, NodeType,
    PersonLlmConfig, Vec2,
};
use crate::error::{DiagramError, Result};
use crate::handles::{build_handle_id, HandleLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
struct LightDiagram {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    nodes: Vec<LightNode>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    connections: Vec<LightConnection>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    persons: BTreeMap<String, PersonLlmConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<DiagramMetadata>,
}

#[derive(Serialize, Deserialize)]
struct LightNode {
    label: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default, skip_serializing_if = "is_origin")]
    position: Vec2,
    #[serde(flatten)]
    props: serde_json::Map<String, serde_json::Value>,
}

fn is_origin(position: &Vec2) -> bool {
    position.x == 0.0 && position.y == 0.0
}

#[derive(Serialize, Deserialize)]
struct LightConnection {
    from: String,
    to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<ContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

/// Split `"Label"` / `"Label:handle"`. The suffix is only treated as a
/// handle when it names a built-in handle label.
pub(super) fn split_endpoint(reference: &str) -> (String, HandleLabel) {
    if let Some((label, suffix)) = reference.rsplit_once(':') {
        let handle = HandleLabel::from_str(suffix);
        if handle.is_builtin() {
            return (label.to_string(), handle);
        }
    }
    (reference.to_string(), HandleLabel::Default)
}

/// Serialize to Light YAML. Node labels must be unique; nodes whose
/// display label collides fall back to their id.
pub fn serialize(diagram: &DomainDiagram) -> Result<String> {
    let labels = assign_labels(diagram);

    let nodes = diagram
        .nodes
        .iter()
        .map(|node| {
            let mut props = node.data.clone();
            props.remove("label");
            LightNode {
                label: labels[&node.id].clone(),
                node_type: node.node_type,
                position: node.position,
                props,
            }
        })
        .collect();

    let mut connections = Vec::with_capacity(diagram.arrows.len());
    for arrow in &diagram.arrows {
        let source = crate::handles::parse_handle_id(&arrow.source)?;
        let target = crate::handles::parse_handle_id(&arrow.target)?;
        let from_label = labels.get(&source.node_id).ok_or_else(|| {
            DiagramError::Validation(format!("arrow '{}' references unknown node", arrow.id))
        })?;
        let to_label = labels.get(&target.node_id).ok_or_else(|| {
            DiagramError::Validation(format!("arrow '{}' references unknown node", arrow.id))
        })?;
        connections.push(LightConnection {
            from: endpoint_ref(from_label, &source.label),
            to: endpoint_ref(to_label, &target.label),
            content_type: arrow.content_type,
            label: arrow.label.clone(),
        });
    }

    let light = LightDiagram {
        version: Some("light".into()),
        nodes,
        connections,
        persons: diagram
            .persons
            .iter()
            .map(|p| (p.label.clone(), p.llm_config.clone()))
            .collect(),
        metadata: diagram.metadata.clone(),
    };
    Ok(serde_yaml::to_string(&light)?)
}

fn endpoint_ref(label: &str, handle: &HandleLabel) -> String {
    if *handle == HandleLabel::Default {
        label.to_string()
    } else {
        format!("{label}:{handle}")
    }
}

fn assign_labels(diagram: &DomainDiagram) -> BTreeMap<String, String> {
    let mut used: BTreeMap<String, usize> = BTreeMap::new();
    let mut labels = BTreeMap::new();
    for node in &diagram.nodes {
        let base = node.label().to_string();
        let count = used.entry(base.clone()).or_insert(0);
        let label = if *count == 0 {
            base.clone()
        } else {
            node.id.clone()
        };
        *count += 1;
        labels.insert(node.id.clone(), label);
    }
    labels
}

/// Deserialize from Light YAML. Labels become node ids; persons are
/// keyed by their label.
pub fn deserialize(content: &str) -> Result<DomainDiagram> {
    let light: LightDiagram = serde_yaml::from_str(content)?;

    let mut seen = BTreeMap::new();
    for node in &light.nodes {
        if seen.insert(node.label.clone(), ()).is_some() {
            return Err(DiagramError::Validation(format!(
                "duplicate node label '{}' in light diagram",
                node.label
            )));
        }
    }

    let nodes = light
        .nodes
        .into_iter()
        .map(|node| {
            let mut data = node.props;
            data.insert("label".into(), serde_json::json!(node.label));
            DomainNode {
                id: node.label,
                node_type: node.node_type,
                position: node.position,
                data,
            }
        })
        .collect();

    let arrows = light
        .connections
        .into_iter()
        .enumerate()
        .map(|(index, connection)| {
            let (from_label, from_handle) = split_endpoint(&connection.from);
            let (to_label, to_handle) = split_endpoint(&connection.to);
            DomainArrow {
                id: format!("conn_{index}"),
                source: build_handle_id(&from_label, &from_handle),
                target: build_handle_id(&to_label, &to_handle),
                content_type: connection.content_type,
                label: connection.label,
                data: None,
            }
        })
        .collect();

    let persons = light
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
        metadata: light.metadata,
    })
}
