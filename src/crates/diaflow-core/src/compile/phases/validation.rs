//! Phase 1: structural and semantic validation.

use crate::compile::context::{CompilationContext, CompilationPhase, CompilerPhase};
use crate::domain::NodeType;
use crate::handles::{self, HandleSpec};
use std::collections::{HashMap, HashSet};

pub struct ValidationPhase;

impl CompilerPhase for ValidationPhase {
    fn phase(&self) -> CompilationPhase {
        CompilationPhase::Validation
    }

    fn run(&self, ctx: &mut CompilationContext) {
        if ctx.domain.nodes.is_empty() {
            ctx.error(self.phase(), "diagram must contain at least one node");
            return;
        }

        self.validate_unique_node_ids(ctx);
        self.build_handle_index(ctx);
        self.validate_start_and_endpoint_presence(ctx);
        self.validate_arrows(ctx);
        self.validate_connection_counts(ctx);
    }
}

impl ValidationPhase {
    fn validate_unique_node_ids(&self, ctx: &mut CompilationContext) {
        let mut seen = HashSet::new();
        let duplicates: Vec<String> = ctx
            .domain
            .nodes
            .iter()
            .filter(|n| !seen.insert(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        if !duplicates.is_empty() {
            ctx.error(
                self.phase(),
                format!("duplicate node ids found: {duplicates:?}"),
            );
        }
    }

    /// Index declared handles per node, synthesizing defaults for nodes
    /// that declare none. Later phases resolve against this index.
    fn build_handle_index(&self, ctx: &mut CompilationContext) {
        let mut declared: HashMap<String, Vec<HandleSpec>> = HashMap::new();
        for handle in &ctx.domain.handles {
            declared
                .entry(handle.node_id.clone())
                .or_default()
                .push(HandleSpec::new(handle.label.clone(), handle.direction));
        }
        for node in &ctx.domain.nodes {
            let specs = declared
                .remove(&node.id)
                .unwrap_or_else(|| handles::default_handles(node.node_type));
            ctx.handles.insert(node.id.clone(), specs);
        }
    }

    fn validate_start_and_endpoint_presence(&self, ctx: &mut CompilationContext) {
        let start_count = ctx
            .domain
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Start)
            .count();
        let endpoint_count = ctx
            .domain
            .nodes
            .iter()
            .filter(|n| n.node_type == NodeType::Endpoint)
            .count();

        if start_count == 0 {
            ctx.error(self.phase(), "diagram must have at least one start node");
        }
        if endpoint_count == 0 {
            ctx.warning(
                self.phase(),
                None,
                "diagram has no endpoint node - outputs may not be saved",
                Some("add an endpoint node to persist results".into()),
            );
        }
    }

    fn validate_arrows(&self, ctx: &mut CompilationContext) {
        let node_ids: HashSet<String> = ctx.domain.nodes.iter().map(|n| n.id.clone()).collect();
        let mut diagnostics = Vec::new();

        for arrow in &ctx.domain.arrows {
            for (endpoint, raw) in [("source", &arrow.source), ("target", &arrow.target)] {
                match handles::parse_handle_id(raw) {
                    Ok(parsed) => {
                        if !node_ids.contains(&parsed.node_id) {
                            diagnostics.push((
                                arrow.id.clone(),
                                format!(
                                    "{endpoint} handle '{raw}' references unknown node '{}'",
                                    parsed.node_id
                                ),
                            ));
                        }
                    }
                    Err(err) => {
                        diagnostics.push((
                            arrow.id.clone(),
                            format!("{endpoint} handle invalid: {err}"),
                        ));
                    }
                }
            }
        }

        for (arrow_id, message) in diagnostics {
            ctx.arrow_error(self.phase(), arrow_id, message);
        }
    }

    /// Per-node connection-count constraints plus condition-branch
    /// coverage warnings.
    fn validate_connection_counts(&self, ctx: &mut CompilationContext) {
        let mut incoming: HashMap<String, usize> = HashMap::new();
        let mut outgoing_labels: HashMap<String, Vec<String>> = HashMap::new();

        for arrow in &ctx.domain.arrows {
            if let Ok(parsed) = handles::parse_handle_id(&arrow.source) {
                outgoing_labels
                    .entry(parsed.node_id)
                    .or_default()
                    .push(parsed.label.as_str().to_string());
            }
            if let Ok(parsed) = handles::parse_handle_id(&arrow.target) {
                *incoming.entry(parsed.node_id).or_default() += 1;
            }
        }

        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for node in &ctx.domain.nodes {
            let in_count = incoming.get(&node.id).copied().unwrap_or(0);
            let out_labels = outgoing_labels.get(&node.id).cloned().unwrap_or_default();

            match node.node_type {
                NodeType::Start if in_count > 0 => {
                    errors.push((node.id.clone(), "start node cannot have incoming arrows"));
                }
                NodeType::Endpoint if !out_labels.is_empty() => {
                    errors.push((node.id.clone(), "endpoint node cannot have outgoing arrows"));
                }
                NodeType::Condition => {
                    for branch in ["condtrue", "condfalse"] {
                        if !out_labels.iter().any(|l| l == branch) {
                            warnings.push((
                                node.id.clone(),
                                format!("condition node is missing a '{branch}' branch"),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }

        for (node_id, message) in errors {
            ctx.node_error(self.phase(), node_id, message);
        }
        for (node_id, message) in warnings {
            ctx.warning(
                self.phase(),
                Some(node_id),
                message,
                Some("connect both branches so neither outcome dead-ends".into()),
            );
        }
    }
}
