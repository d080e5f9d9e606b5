//! Native JSON format: id-keyed maps.
//!
//! ```json
//! {
//!   "nodes":   { "<id>": { "type", "position", "data" } },
//!   "arrows":  { "<id>": { "source", "target", "content_type"?, "label"?, "data"? } },
//!   "handles": { "<id>": { "node_id", "label", "direction", "data_type", "position"? } },
//!   "persons": { "<id>": { "label", "llm_config" } },
//!   "metadata": { ... }
//! }
//! ```
//!
//! Maps are keyed by id (sorted on output), so
//! `serialize(deserialize(x)) == normalize(x)` up to formatting
//! whitespace.

use crate::domain::{
    ContentType, DataType, DiagramMetadata, DomainArrow, DomainDiagram, DomainHandle, DomainNode,
    DomainPerson, NodeType, PersonLlmConfig, Vec2,
};
use crate::error::Result;
use crate::handles::{HandleDirection, HandleLabel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize)]
struct NativeDiagram {
    #[serde(default)]
    nodes: BTreeMap<String, NativeNode>,
    #[serde(default)]
    arrows: BTreeMap<String, NativeArrow>,
    #[serde(default)]
    handles: BTreeMap<String, NativeHandle>,
    #[serde(default)]
    persons: BTreeMap<String, NativePerson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<DiagramMetadata>,
}

#[derive(Serialize, Deserialize)]
struct NativeNode {
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default)]
    position: Vec2,
    #[serde(default)]
    data: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize)]
struct NativeArrow {
    source: String,
    target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<ContentType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Serialize, Deserialize)]
struct NativeHandle {
    node_id: String,
    label: HandleLabel,
    direction: HandleDirection,
    #[serde(default)]
    data_type: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    position: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct NativePerson {
    label: String,
    llm_config: PersonLlmConfig,
}

/// Serialize to pretty-printed Native JSON.
pub fn serialize(diagram: &DomainDiagram) -> Result<String> {
    let native = NativeDiagram {
        nodes: diagram
            .nodes
            .iter()
            .map(|n| {
                (
                    n.id.clone(),
                    NativeNode {
                        node_type: n.node_type,
                        position: n.position,
                        data: n.data.clone(),
                    },
                )
            })
            .collect(),
        arrows: diagram
            .arrows
            .iter()
            .map(|a| {
                (
                    a.id.clone(),
                    NativeArrow {
                        source: a.source.clone(),
                        target: a.target.clone(),
                        content_type: a.content_type,
                        label: a.label.clone(),
                        data: a.data.clone(),
                    },
                )
            })
            .collect(),
        handles: diagram
            .handles
            .iter()
            .map(|h| {
                (
                    h.id.clone(),
                    NativeHandle {
                        node_id: h.node_id.clone(),
                        label: h.label.clone(),
                        direction: h.direction,
                        data_type: h.data_type,
                        position: h.position.clone(),
                    },
                )
            })
            .collect(),
        persons: diagram
            .persons
            .iter()
            .map(|p| {
                (
                    p.id.clone(),
                    NativePerson {
                        label: p.label.clone(),
                        llm_config: p.llm_config.clone(),
                    },
                )
            })
            .collect(),
        metadata: diagram.metadata.clone(),
    };
    Ok(serde_json::to_string_pretty(&native)?)
}

/// Deserialize from Native JSON.
pub fn deserialize(content: &str) -> Result<DomainDiagram> {
    let native: NativeDiagram = serde_json::from_str(content)?;
    Ok(DomainDiagram {
        nodes: native
            .nodes
            .into_iter()
            .map(|(id, n)| DomainNode {
                id,
                node_type: n.node_type,
                position: n.position,
                data: n.data,
            })
            .collect(),
        arrows: native
            .arrows
            .into_iter()
            .map(|(id, a)| DomainArrow {
                id,
                source: a.source,
                target: a.target,
                content_type: a.content_type,
                label: a.label,
                data: a.data,
            })
            .collect(),
        handles: native
            .handles
            .into_iter()
            .map(|(id, h)| DomainHandle {
                id,
                node_id: h.node_id,
                label: h.label,
                direction: h.direction,
                data_type: h.data_type,
                position: h.position,
            })
            .collect(),
        persons: native
            .persons
            .into_iter()
            .map(|(id, p)| DomainPerson {
                id,
                label: p.label,
                llm_config: p.llm_config,
            })
            .collect(),
        metadata: native.metadata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::LlmProvider;
    use serde_json::json;

    fn sample() -> DomainDiagram {
        DomainDiagram {
            nodes: vec![
                DomainNode::new("s", NodeType::Start),
                DomainNode::new("p", NodeType::PersonJob)
                    .with_prop("person", json!("alice"))
                    .with_prop("max_iteration", json!(2)),
                DomainNode::new("e", NodeType::Endpoint),
            ],
            arrows: vec![
                DomainArrow::new("a1", "s:default", "p:first"),
                DomainArrow::new("a2", "p:default", "e:default"),
            ],
            handles: vec![],
            persons: vec![DomainPerson {
                id: "alice".into(),
                label: "Alice".into(),
                llm_config: PersonLlmConfig {
                    service: LlmProvider::Openai,
                    model: "gpt-4o-mini".into(),
                    api_key_id: "default".into(),
                    system_prompt: Some("be terse".into()),
                    temperature: None,
                    max_tokens: None,
                },
            }],
            metadata: Some(DiagramMetadata {
                id: Some("d1".into()),
                name: Some("sample".into()),
                description: None,
                version: Some("1".into()),
            }),
        }
    }

    #[test]
    fn test_round_trip_is_normalizing_identity() {
        let first = serialize(&sample()).unwrap();
        let parsed = deserialize(&first).unwrap();
        let second = serialize(&parsed).unwrap();

        let a: serde_json::Value = serde_json::from_str(&first).unwrap();
        let b: serde_json::Value = serde_json::from_str(&second).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_shape_is_id_keyed() {
        let text = serialize(&sample()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["nodes"]["p"]["type"], "person_job");
        assert_eq!(value["arrows"]["a1"]["source"], "s:default");
        assert_eq!(value["persons"]["alice"]["label"], "Alice");
    }

    #[test]
    fn test_missing_sections_default_empty() {
        let parsed = deserialize("{\"nodes\": {}}").unwrap();
        assert!(parsed.nodes.is_empty());
        assert!(parsed.arrows.is_empty());
        assert!(parsed.persons.is_empty());
    }
}
