//! Built-in connection and transform rules
//!
//! These replicate the default rule set the compiler and engine rely on:
//!
//! | rule | category | priority | effect |
//! |------|----------|----------|--------|
//! | `start_no_input` | connection | high | nothing may target a start node |
//! | `endpoint_no_output` | connection | high | endpoints may not be a source |
//! | `output_capable` | connection | normal | output-capable kinds may not feed start (safety net) |
//! | `personjob_tool_extraction` | transform | normal | person jobs with tools get `extract_tool_results` |

use super::registry::{
    ConnectionRule, RegisterOptions, RuleCategory, RuleKey, RulePriority, RuleRegistry,
    TransformRule,
};
use crate::domain::NodeType;
use crate::error::Result;
use crate::nodes::ExecutableNode;
use std::sync::Arc;

/// Start nodes cannot receive input connections.
pub struct StartNoInputRule;

impl ConnectionRule for StartNoInputRule {
    fn can_connect(&self, _source_type: NodeType, target_type: NodeType) -> bool {
        target_type != NodeType::Start
    }

    fn reason(&self, _source_type: NodeType, target_type: NodeType) -> Option<String> {
        (target_type == NodeType::Start)
            .then(|| "start nodes cannot receive input connections".to_string())
    }
}

/// Endpoint nodes cannot send output connections.
pub struct EndpointNoOutputRule;

impl ConnectionRule for EndpointNoOutputRule {
    fn can_connect(&self, source_type: NodeType, _target_type: NodeType) -> bool {
        source_type != NodeType::Endpoint
    }

    fn reason(&self, source_type: NodeType, _target_type: NodeType) -> Option<String> {
        (source_type == NodeType::Endpoint)
            .then(|| "endpoint nodes cannot send output connections".to_string())
    }
}

/// Output-capable node kinds may target anything except start.
///
/// Redundant with `start_no_input`; kept as a normal-priority safety net
/// so dropping either rule alone still protects start nodes.
pub struct OutputCapableRule;

impl OutputCapableRule {
    const OUTPUT_CAPABLE: [NodeType; 5] = [
        NodeType::PersonJob,
        NodeType::Condition,
        NodeType::CodeJob,
        NodeType::ApiJob,
        NodeType::Start,
    ];
}

impl ConnectionRule for OutputCapableRule {
    fn can_connect(&self, source_type: NodeType, target_type: NodeType) -> bool {
        if Self::OUTPUT_CAPABLE.contains(&source_type) {
            target_type != NodeType::Start
        } else {
            true
        }
    }

    fn reason(&self, source_type: NodeType, target_type: NodeType) -> Option<String> {
        (Self::OUTPUT_CAPABLE.contains(&source_type) && target_type == NodeType::Start)
            .then(|| format!("{source_type} nodes cannot connect to start nodes"))
    }
}

/// Inject `extract_tool_results` on edges leaving a person job that has
/// tools configured.
pub struct PersonJobToolExtractionRule;

impl TransformRule for PersonJobToolExtractionRule {
    fn applies_to(&self, source: &ExecutableNode, _target: &ExecutableNode) -> bool {
        source.tools().map(|t| !t.is_empty()).unwrap_or(false)
    }

    fn transform(
        &self,
        source: &ExecutableNode,
        target: &ExecutableNode,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        if self.applies_to(source, target) {
            map.insert("extract_tool_results".into(), serde_json::Value::Bool(true));
        }
        map
    }
}

/// Register the default rule set into `registry`.
pub fn register_default_rules(registry: &RuleRegistry) -> Result<()> {
    registry.register_connection_rule(
        RuleKey::new("start_no_input", RuleCategory::Connection)
            .with_priority(RulePriority::High)
            .with_description("start nodes cannot receive input connections"),
        Arc::new(StartNoInputRule),
        RegisterOptions::default(),
    )?;
    registry.register_connection_rule(
        RuleKey::new("endpoint_no_output", RuleCategory::Connection)
            .with_priority(RulePriority::High)
            .with_description("endpoint nodes cannot send output connections"),
        Arc::new(EndpointNoOutputRule),
        RegisterOptions::default(),
    )?;
    registry.register_connection_rule(
        RuleKey::new("output_capable", RuleCategory::Connection)
            .with_description("output-capable nodes can connect to any node except start"),
        Arc::new(OutputCapableRule),
        RegisterOptions::default(),
    )?;
    registry.register_transform_rule(
        RuleKey::new("personjob_tool_extraction", RuleCategory::Transform)
            .with_description("extract tool results from person jobs with tools"),
        Arc::new(PersonJobToolExtractionRule),
        RegisterOptions::default(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Vec2;
    use crate::nodes::{CodeJobNode, ContextCleaningRule, PersonJobNode};
    use crate::rules::Environment;

    fn person_node(tools: Vec<String>) -> ExecutableNode {
        ExecutableNode::PersonJob(PersonJobNode {
            id: "p".into(),
            label: "p".into(),
            position: Vec2::default(),
            person_id: "alice".into(),
            first_only_prompt: None,
            default_prompt: None,
            max_iteration: 1,
            context_cleaning_rule: ContextCleaningRule::NoForget,
            tools,
        })
    }

    fn code_node() -> ExecutableNode {
        ExecutableNode::CodeJob(CodeJobNode {
            id: "c".into(),
            label: "c".into(),
            position: Vec2::default(),
            language: "python".into(),
            code: "1".into(),
            timeout_secs: None,
        })
    }

    #[test]
    fn test_defaults_protect_start_and_endpoint() {
        let registry = RuleRegistry::with_defaults(Environment::Testing);
        assert!(!registry.can_connect(NodeType::CodeJob, NodeType::Start));
        assert!(!registry.can_connect(NodeType::Endpoint, NodeType::CodeJob));
        assert!(registry.can_connect(NodeType::Start, NodeType::CodeJob));
        assert!(registry.can_connect(NodeType::CodeJob, NodeType::Endpoint));
    }

    #[test]
    fn test_tool_extraction_only_with_tools() {
        let registry = RuleRegistry::with_defaults(Environment::Testing);

        let with_tools = person_node(vec!["search".into()]);
        let transforms = registry.data_transform(&with_tools, &code_node());
        assert_eq!(
            transforms.get("extract_tool_results"),
            Some(&serde_json::json!(true))
        );

        let without_tools = person_node(vec![]);
        let transforms = registry.data_transform(&without_tools, &code_node());
        assert!(transforms.is_empty());
    }
}
