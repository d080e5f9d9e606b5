//! Best-effort reverse projection: executable → declarative diagram.
//!
//! Used by round-trip tests and by the serialization formats when a
//! compiled diagram needs to be written back out. The projection is
//! lossy on synthesized artifacts only: handle declarations get fresh
//! ids, and persons that are referenced by nodes but absent from the
//! compiled catalog are reconstituted with a placeholder LLM config.

use crate::diagram::ExecutableDiagram;
use crate::domain::{
    DiagramMetadata, DomainArrow, DomainDiagram, DomainHandle, DomainNode, DomainPerson,
    LlmProvider, NodeType, PersonLlmConfig,
};
use crate::handles::{build_handle_id, HandleDirection, HandleLabel};
use crate::nodes::{ContextCleaningRule, DbOperation, ExecutableNode, TriggerMode};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;

/// Project a compiled diagram back into declarative form.
pub fn decompile(diagram: &ExecutableDiagram) -> DomainDiagram {
    let mut nodes = Vec::with_capacity(diagram.nodes.len());
    for node in &diagram.nodes {
        nodes.push(DomainNode {
            id: node.id().to_string(),
            node_type: node.node_type(),
            position: node.position(),
            data: node_data(node),
        });
    }

    let mut arrows = Vec::with_capacity(diagram.edges.len());
    let mut handles = Vec::new();
    let mut handle_counter = 0usize;
    for edge in &diagram.edges {
        let mut fresh_handle = |node_id: &str, label: &HandleLabel, direction: HandleDirection| {
            let handle = DomainHandle {
                id: format!("handle_{handle_counter}"),
                node_id: node_id.to_string(),
                label: label.clone(),
                direction,
                data_type: Default::default(),
                position: None,
            };
            handle_counter += 1;
            handle
        };
        handles.push(fresh_handle(
            &edge.source_node_id,
            &edge.source_output,
            HandleDirection::Output,
        ));
        handles.push(fresh_handle(
            &edge.target_node_id,
            &edge.target_input,
            HandleDirection::Input,
        ));

        let data = if edge.metadata.is_empty() && edge.transform_rules.is_empty() {
            None
        } else {
            let mut data = edge.metadata.clone();
            if !edge.transform_rules.is_empty() {
                data.insert(
                    "transform_rules".into(),
                    Value::Object(edge.transform_rules.clone()),
                );
            }
            Some(data)
        };

        arrows.push(DomainArrow {
            id: edge.id.clone(),
            source: build_handle_id(&edge.source_node_id, &edge.source_output),
            target: build_handle_id(&edge.target_node_id, &edge.target_input),
            content_type: edge.content_type,
            label: edge
                .metadata
                .get("label")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            data,
        });
    }

    let persons = reconstitute_persons(diagram);

    let metadata = if diagram.metadata.id.is_some() || diagram.metadata.name.is_some() {
        Some(DiagramMetadata {
            id: diagram.metadata.id.clone(),
            name: diagram.metadata.name.clone(),
            description: None,
            version: None,
        })
    } else {
        None
    };

    DomainDiagram {
        nodes,
        arrows,
        handles,
        persons,
        metadata,
    }
}

/// Rebuild the property bag the node factory understands.
fn node_data(node: &ExecutableNode) -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("label".into(), json!(node.label()));

    match node {
        ExecutableNode::Start(n) => {
            if n.trigger_mode == TriggerMode::Hook {
                data.insert("trigger_mode".into(), json!("hook"));
            }
            if let Some(event) = &n.hook_event {
                data.insert("hook_event".into(), json!(event));
            }
            if !n.custom_data.is_empty() {
                data.insert("custom_data".into(), Value::Object(n.custom_data.clone()));
            }
        }
        ExecutableNode::Endpoint(n) => {
            if n.save_to_file {
                data.insert("save_to_file".into(), json!(true));
            }
            if let Some(path) = &n.file_path {
                data.insert("file_path".into(), json!(path));
            }
        }
        ExecutableNode::Condition(n) => {
            match n.condition_type {
                crate::nodes::ConditionType::DetectMaxIterations => {
                    data.insert("condition_type".into(), json!("detect_max_iterations"));
                }
                crate::nodes::ConditionType::Expression => {}
            }
            if let Some(expression) = &n.expression {
                data.insert("expression".into(), json!(expression));
            }
            if n.join_policy == crate::nodes::JoinPolicy::All {
                data.insert("join_policy".into(), json!("all"));
            }
        }
        ExecutableNode::PersonJob(n) => {
            data.insert("person".into(), json!(n.person_id));
            data.insert("max_iteration".into(), json!(n.max_iteration));
            if let Some(prompt) = &n.first_only_prompt {
                data.insert("first_only_prompt".into(), json!(prompt));
            }
            if let Some(prompt) = &n.default_prompt {
                data.insert("default_prompt".into(), json!(prompt));
            }
            if n.context_cleaning_rule != ContextCleaningRule::NoForget {
                data.insert(
                    "context_cleaning_rule".into(),
                    json!(cleaning_rule_str(n.context_cleaning_rule)),
                );
            }
            if !n.tools.is_empty() {
                data.insert("tools".into(), json!(n.tools));
            }
        }
        ExecutableNode::PersonBatchJob(n) => {
            data.insert("person".into(), json!(n.person_id));
            data.insert("max_iteration".into(), json!(n.max_iteration));
            data.insert("batch_input_key".into(), json!(n.batch_input_key));
            if let Some(prompt) = &n.default_prompt {
                data.insert("default_prompt".into(), json!(prompt));
            }
            if n.context_cleaning_rule != ContextCleaningRule::NoForget {
                data.insert(
                    "context_cleaning_rule".into(),
                    json!(cleaning_rule_str(n.context_cleaning_rule)),
                );
            }
            if !n.tools.is_empty() {
                data.insert("tools".into(), json!(n.tools));
            }
        }
        ExecutableNode::CodeJob(n) => {
            data.insert("language".into(), json!(n.language));
            data.insert("code".into(), json!(n.code));
            if let Some(timeout) = n.timeout_secs {
                data.insert("timeout".into(), json!(timeout));
            }
        }
        ExecutableNode::ApiJob(n) => {
            data.insert("url".into(), json!(n.url));
            data.insert("method".into(), json!(n.method));
            if !n.headers.is_empty() {
                data.insert("headers".into(), Value::Object(n.headers.clone()));
            }
            if let Some(body) = &n.body {
                data.insert("body".into(), body.clone());
            }
            if let Some(timeout) = n.timeout_secs {
                data.insert("timeout".into(), json!(timeout));
            }
        }
        ExecutableNode::Db(n) => {
            let operation = match n.operation {
                DbOperation::Read => "read",
                DbOperation::Write => "write",
                DbOperation::Append => "append",
            };
            data.insert("operation".into(), json!(operation));
            data.insert("file".into(), json!(n.file));
            if let Some(value) = &n.data {
                data.insert("data".into(), value.clone());
            }
        }
        ExecutableNode::Notion(n) => {
            data.insert("operation".into(), json!(n.operation));
            if let Some(page) = &n.page_id {
                data.insert("page_id".into(), json!(page));
            }
            if let Some(db) = &n.database_id {
                data.insert("database_id".into(), json!(db));
            }
        }
        ExecutableNode::UserResponse(n) => {
            data.insert("prompt".into(), json!(n.prompt));
            if let Some(timeout) = n.timeout_secs {
                data.insert("timeout".into(), json!(timeout));
            }
        }
        ExecutableNode::Hook(n) => {
            data.insert("hook_type".into(), json!(n.hook_type));
            if !n.config.is_empty() {
                data.insert("config".into(), Value::Object(n.config.clone()));
            }
        }
    }

    data
}

fn cleaning_rule_str(rule: ContextCleaningRule) -> &'static str {
    match rule {
        ContextCleaningRule::NoForget => "no_forget",
        ContextCleaningRule::OnEveryTurn => "on_every_turn",
        ContextCleaningRule::ForgetOwn => "forget_own",
    }
}

/// Persons come back from the compiled catalog when present; persons
/// referenced by nodes but missing from the catalog are reconstituted
/// with a placeholder config so the result re-compiles.
fn reconstitute_persons(diagram: &ExecutableDiagram) -> Vec<DomainPerson> {
    let mut persons = Vec::new();
    let mut seen = BTreeSet::new();

    for (id, person) in &diagram.metadata.persons {
        seen.insert(id.clone());
        persons.push(DomainPerson {
            id: id.clone(),
            label: person.label.clone(),
            llm_config: person.llm_config.clone(),
        });
    }

    for node in &diagram.nodes {
        if node.node_type() != NodeType::PersonJob
            && node.node_type() != NodeType::PersonBatchJob
        {
            continue;
        }
        let Some(person_id) = node.person_id() else {
            continue;
        };
        if seen.insert(person_id.to_string()) {
            persons.push(DomainPerson {
                id: person_id.to_string(),
                label: person_id.to_string(),
                llm_config: PersonLlmConfig {
                    service: LlmProvider::Openai,
                    model: "gpt-4o-mini".into(),
                    api_key_id: "default".into(),
                    system_prompt: None,
                    temperature: None,
                    max_tokens: None,
                },
            });
        }
    }

    persons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::DiagramCompiler;
    use crate::domain::{DomainArrow, DomainDiagram, DomainNode};
    use serde_json::json;

    fn loop_diagram() -> DomainDiagram {
        DomainDiagram::new()
            .with_node(DomainNode::new("s", NodeType::Start))
            .with_node(
                DomainNode::new("p", NodeType::PersonJob)
                    .with_prop("person", json!("alice"))
                    .with_prop("max_iteration", json!(2))
                    .with_prop("default_prompt", json!("continue")),
            )
            .with_node(
                DomainNode::new("c", NodeType::Condition)
                    .with_prop("condition_type", json!("detect_max_iterations")),
            )
            .with_node(DomainNode::new("e", NodeType::Endpoint))
            .with_arrow(DomainArrow::new("a1", "s:default", "p:first"))
            .with_arrow(DomainArrow::new("a2", "p:default", "c:default"))
            .with_arrow(DomainArrow::new("a3", "c:condfalse", "p:default"))
            .with_arrow(DomainArrow::new("a4", "c:condtrue", "e:default"))
    }

    #[test]
    fn test_round_trip_preserves_counts() {
        let compiler = DiagramCompiler::new();
        let compiled = compiler.compile(&loop_diagram()).unwrap();
        let domain = decompile(&compiled);

        assert_eq!(domain.nodes.len(), compiled.node_count());
        assert_eq!(domain.arrows.len(), compiled.edge_count());
        // Two synthesized handles per edge.
        assert_eq!(domain.handles.len(), compiled.edge_count() * 2);

        let recompiled = compiler.compile(&domain).unwrap();
        assert_eq!(recompiled.node_count(), compiled.node_count());
        assert_eq!(recompiled.edge_count(), compiled.edge_count());
    }

    #[test]
    fn test_person_reconstituted_when_missing_from_catalog() {
        let compiler = DiagramCompiler::new();
        let compiled = compiler.compile(&loop_diagram()).unwrap();
        let domain = decompile(&compiled);

        // loop_diagram declared no persons, so 'alice' must be synthesized.
        assert_eq!(domain.persons.len(), 1);
        assert_eq!(domain.persons[0].id, "alice");
    }

    #[test]
    fn test_node_properties_survive() {
        let compiler = DiagramCompiler::new();
        let compiled = compiler.compile(&loop_diagram()).unwrap();
        let domain = decompile(&compiled);

        let person = domain.node("p").unwrap();
        assert_eq!(person.data.get("max_iteration"), Some(&json!(2)));
        assert_eq!(person.data.get("default_prompt"), Some(&json!("continue")));
    }
}
