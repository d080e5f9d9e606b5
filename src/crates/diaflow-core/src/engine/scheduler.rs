//! Ready-set computation: join policies, iteration caps, branch gates
//!
//! The scheduler tracks per-node run state and decides, on every tick,
//! which nodes may dispatch. Readiness for a node requires all of:
//!
//! 1. the node is idle (not running, not terminally settled)
//! 2. its join policy is satisfied over the non-gated incoming edges
//! 3. it has at least one *fresh* input delivery
//! 4. its iteration cap is not exhausted (cap exhaustion converts the
//!    would-be dispatch into a `max_iterations` skip with passthrough)
//!
//! # Delivery counting
//!
//! Freshness is tracked through per-node **delivery counters**: a node's
//! counter bumps when it completes and when it is skipped with a
//! passthrough (`max_iterations`, handler-requested). For a forward edge
//! the source is fresh when it has delivered more often than the target;
//! for a back-edge (loops) the source only needs to have caught up to
//! the target, and back-edges are ignored entirely on the target's first
//! iteration. This is what makes cyclic subgraphs schedulable without a
//! dedicated loop construct.
//!
//! # Branch gates
//!
//! When a condition node commits, the scheduler gates the non-taken
//! output edges and cascades `branch_not_taken` skips over nodes whose
//! every live inbound path runs through the gate. The next commit of the
//! same condition clears its previous gates first, so loops re-evaluate
//! branches on every iteration.

use crate::diagram::ExecutableDiagram;
use crate::handles::HandleLabel;
use crate::nodes::JoinPolicy;
use diaflow_state::SkipReason;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Run status of a node inside the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Eligible for readiness evaluation
    Idle,
    /// Dispatched, handler in flight
    Running,
    /// Failed fatally
    Failed,
    /// Settled by a skip; `BranchNotTaken` skips may be reset when the
    /// gating condition re-runs
    Skipped(SkipReason),
}

#[derive(Debug, Clone)]
struct NodeRun {
    status: RunStatus,
    /// Completed handler runs
    iterations: u32,
    /// Downstream-visible deliveries (completions + passthrough skips)
    deliveries: u32,
    last_output: Option<Value>,
}

impl Default for NodeRun {
    fn default() -> Self {
        Self {
            status: RunStatus::Idle,
            iterations: 0,
            deliveries: 0,
            last_output: None,
        }
    }
}

/// One tick's scheduling decisions.
#[derive(Debug, Default)]
pub struct TickDecisions {
    /// Nodes to dispatch, in deterministic order
    pub dispatch: Vec<String>,
    /// Nodes to settle as skipped instead of dispatching
    pub skips: Vec<(String, SkipReason)>,
}

/// Read-only snapshot of scheduler state handed to handlers.
#[derive(Debug, Clone, Default)]
pub struct ExecutionView {
    pub iteration_counts: HashMap<String, u32>,
    pub skip_reasons: HashMap<String, SkipReason>,
    pub outputs: HashMap<String, Value>,
}

/// Tracks run state for one execution of one compiled diagram.
pub struct Scheduler {
    diagram: Arc<ExecutableDiagram>,
    runs: HashMap<String, NodeRun>,
    /// Edge ids that close a cycle in the compiled graph
    back_edges: HashSet<String>,
    /// Currently gated edge ids
    gated_edges: HashSet<String>,
    /// condition node → edges it gated on its last commit
    gates_by_condition: HashMap<String, Vec<String>>,
    /// condition node → nodes it branch-skipped on its last commit
    skips_by_condition: HashMap<String, Vec<String>>,
    /// Dispatch priority from the parallel-group metadata
    group_priority: HashMap<String, usize>,
}

impl Scheduler {
    pub fn new(diagram: Arc<ExecutableDiagram>) -> Self {
        let back_edges = find_back_edges(&diagram);
        let mut group_priority = HashMap::new();
        for (index, group) in diagram.metadata.parallel_groups.iter().enumerate() {
            for node in group {
                group_priority.entry(node.clone()).or_insert(index);
            }
        }
        let runs = diagram
            .nodes
            .iter()
            .map(|n| (n.id().to_string(), NodeRun::default()))
            .collect();
        Self {
            diagram,
            runs,
            back_edges,
            gated_edges: HashSet::new(),
            gates_by_condition: HashMap::new(),
            skips_by_condition: HashMap::new(),
            group_priority,
        }
    }

    /// Compute this tick's decisions, excluding in-flight nodes.
    pub fn tick(&self, inflight: &HashSet<String>) -> TickDecisions {
        let mut decisions = TickDecisions::default();

        for node in &self.diagram.nodes {
            let id = node.id();
            if inflight.contains(id) {
                continue;
            }
            let run = &self.runs[id];
            if run.status != RunStatus::Idle {
                continue;
            }
            if !self.join_ready(id) {
                continue;
            }
            if let Some(cap) = node.max_iteration() {
                if run.iterations >= cap {
                    decisions
                        .skips
                        .push((id.to_string(), SkipReason::MaxIterations));
                    continue;
                }
            }
            decisions.dispatch.push(id.to_string());
        }

        decisions.dispatch.sort_by(|a, b| {
            let pa = self.group_priority.get(a).copied().unwrap_or(usize::MAX);
            let pb = self.group_priority.get(b).copied().unwrap_or(usize::MAX);
            pa.cmp(&pb).then_with(|| a.cmp(b))
        });
        decisions.skips.sort_by(|a, b| a.0.cmp(&b.0));
        decisions
    }

    /// Join policy + freshness evaluation for a single node.
    fn join_ready(&self, node_id: &str) -> bool {
        let node = match self.diagram.get_node(node_id) {
            Some(node) => node,
            None => return false,
        };
        let my = &self.runs[node_id];

        let live_edges: Vec<_> = self
            .diagram
            .incoming_edges(node_id)
            .filter(|e| !self.gated_edges.contains(&e.id))
            .collect();

        // Source nodes (start nodes in practice) run exactly once.
        if self.diagram.incoming_edges(node_id).next().is_none() {
            return my.deliveries == 0;
        }
        if live_edges.is_empty() {
            return false;
        }

        let edge_state = |edge: &&crate::diagram::ExecutableEdge| {
            let src = &self.runs[edge.source_node_id.as_str()];
            let is_back = self.back_edges.contains(&edge.id);
            let skipped_terminal = matches!(src.status, RunStatus::Skipped(_));
            let fresh = if is_back {
                my.deliveries > 0 && src.deliveries >= my.deliveries
            } else {
                src.deliveries > my.deliveries
            };
            let satisfied = if skipped_terminal {
                true
            } else if is_back {
                my.deliveries == 0 || src.deliveries >= my.deliveries
            } else {
                src.deliveries >= 1
            };
            (satisfied, fresh, skipped_terminal)
        };

        match node.join_policy() {
            JoinPolicy::Any => live_edges.iter().any(|e| edge_state(e).1),
            JoinPolicy::All => {
                let states: Vec<_> = live_edges.iter().map(edge_state).collect();
                let all_satisfied = states.iter().all(|s| s.0);
                let any_fresh = states.iter().any(|s| s.1);
                let all_skipped = states.iter().all(|s| s.2);
                all_satisfied && (any_fresh || (all_skipped && my.deliveries == 0))
            }
        }
    }

    /// Mark a node as dispatched.
    pub fn mark_running(&mut self, node_id: &str) {
        if let Some(run) = self.runs.get_mut(node_id) {
            run.status = RunStatus::Running;
        }
    }

    /// Commit a successful completion, returning the skip settlements
    /// the commit triggered so the caller can record and publish them.
    ///
    /// Two kinds of settlements can ride on a commit: the node itself
    /// settles as `max_iterations` when this completion exhausted its
    /// cap (the completion already delivered the passthrough value), and
    /// for condition nodes `condition_result` gates the non-taken branch
    /// into `branch_not_taken` skips.
    pub fn mark_completed(
        &mut self,
        node_id: &str,
        output: Value,
        condition_result: Option<bool>,
    ) -> Vec<(String, SkipReason)> {
        let mut settlements = Vec::new();

        let cap = self
            .diagram
            .get_node(node_id)
            .and_then(|n| n.max_iteration());
        if let Some(run) = self.runs.get_mut(node_id) {
            run.status = RunStatus::Idle;
            run.iterations += 1;
            run.deliveries += 1;
            run.last_output = Some(output);
            if let Some(cap) = cap {
                if run.iterations >= cap {
                    // Exhausted: settle now so detect_max_iterations
                    // conditions observe the skip. The completion above
                    // already counted as the delivery.
                    run.status = RunStatus::Skipped(SkipReason::MaxIterations);
                    settlements.push((node_id.to_string(), SkipReason::MaxIterations));
                }
            }
        }

        if let Some(result) = condition_result {
            for skipped in self.apply_branch_gate(node_id, result) {
                settlements.push((skipped, SkipReason::BranchNotTaken));
            }
        }
        settlements
    }

    /// Settle a node as skipped. A handler-requested skip is a
    /// passthrough: the node's previous output becomes visible as a
    /// fresh delivery for downstream consumers.
    pub fn mark_skipped(&mut self, node_id: &str, reason: SkipReason) {
        if let Some(run) = self.runs.get_mut(node_id) {
            run.status = RunStatus::Skipped(reason);
            if reason == SkipReason::HandlerRequested {
                run.deliveries += 1;
            }
        }
    }

    /// Settle a node as failed. Under continue-on-error the caller also
    /// cascades `upstream_failed` skips via [`cascade_upstream_failure`].
    pub fn mark_failed(&mut self, node_id: &str) {
        if let Some(run) = self.runs.get_mut(node_id) {
            run.status = RunStatus::Failed;
        }
    }

    /// Skip every descendant whose only live inbound paths run through
    /// `failed_node`. Returns the nodes skipped, in cascade order.
    pub fn cascade_upstream_failure(&mut self, failed_node: &str) -> Vec<String> {
        let mut dead: HashSet<String> = HashSet::new();
        dead.insert(failed_node.to_string());
        let skipped = self.cascade_from(&dead);
        for node in &skipped {
            if let Some(run) = self.runs.get_mut(node) {
                run.status = RunStatus::Skipped(SkipReason::UpstreamFailed);
            }
        }
        skipped
    }

    /// Gate the non-taken branch of a condition node and cascade
    /// `branch_not_taken` skips, returning the nodes skipped. Clears the
    /// condition's previous gates first so each iteration re-evaluates
    /// both branches.
    fn apply_branch_gate(&mut self, condition_id: &str, result: bool) -> Vec<String> {
        // Un-gate the previous iteration.
        if let Some(edges) = self.gates_by_condition.remove(condition_id) {
            for edge in edges {
                self.gated_edges.remove(&edge);
            }
        }
        if let Some(nodes) = self.skips_by_condition.remove(condition_id) {
            for node in nodes {
                if let Some(run) = self.runs.get_mut(&node) {
                    if run.status == RunStatus::Skipped(SkipReason::BranchNotTaken) {
                        run.status = RunStatus::Idle;
                    }
                }
            }
        }

        let not_taken = if result {
            HandleLabel::Condfalse
        } else {
            HandleLabel::Condtrue
        };
        let gated: Vec<String> = self
            .diagram
            .outgoing_edges(condition_id)
            .filter(|e| e.source_output == not_taken)
            .map(|e| e.id.clone())
            .collect();
        for edge in &gated {
            self.gated_edges.insert(edge.clone());
        }
        self.gates_by_condition
            .insert(condition_id.to_string(), gated);

        let dead: HashSet<String> = HashSet::new();
        let skipped = self.cascade_from(&dead);
        for node in &skipped {
            if let Some(run) = self.runs.get_mut(node) {
                run.status = RunStatus::Skipped(SkipReason::BranchNotTaken);
            }
        }
        self.skips_by_condition
            .insert(condition_id.to_string(), skipped.clone());
        skipped
    }

    /// Nodes whose every inbound edge is gated, comes from `dead`
    /// sources, or comes from a node collected earlier in this cascade.
    fn cascade_from(&self, dead: &HashSet<String>) -> Vec<String> {
        let mut collected: Vec<String> = Vec::new();
        let mut collected_set: HashSet<String> = HashSet::new();
        loop {
            let mut changed = false;
            for node in &self.diagram.nodes {
                let id = node.id();
                if collected_set.contains(id) || dead.contains(id) {
                    continue;
                }
                let run = &self.runs[id];
                if run.status == RunStatus::Running
                    || run.status == RunStatus::Failed
                    || matches!(run.status, RunStatus::Skipped(r) if r != SkipReason::BranchNotTaken)
                {
                    continue;
                }
                let mut edges = self.diagram.incoming_edges(id).peekable();
                if edges.peek().is_none() {
                    continue;
                }
                let all_cut = edges.all(|e| {
                    self.gated_edges.contains(&e.id)
                        || dead.contains(e.source_node_id.as_str())
                        || collected_set.contains(e.source_node_id.as_str())
                });
                if all_cut {
                    collected.push(id.to_string());
                    collected_set.insert(id.to_string());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        collected
    }

    /// Last output a node delivered, if any.
    pub fn output_of(&self, node_id: &str) -> Option<&Value> {
        self.runs.get(node_id).and_then(|r| r.last_output.as_ref())
    }

    /// Completed iteration count of a node.
    pub fn iterations_of(&self, node_id: &str) -> u32 {
        self.runs.get(node_id).map(|r| r.iterations).unwrap_or(0)
    }

    /// Whether any node failed.
    pub fn any_failed(&self) -> bool {
        self.runs.values().any(|r| r.status == RunStatus::Failed)
    }

    /// Whether the edge is currently gated.
    pub fn is_gated(&self, edge_id: &str) -> bool {
        self.gated_edges.contains(edge_id)
    }

    /// Snapshot for handler context.
    pub fn view(&self) -> ExecutionView {
        let mut view = ExecutionView::default();
        for (id, run) in &self.runs {
            view.iteration_counts.insert(id.clone(), run.iterations);
            if let RunStatus::Skipped(reason) = run.status {
                view.skip_reasons.insert(id.clone(), reason);
            }
            if let Some(output) = &run.last_output {
                view.outputs.insert(id.clone(), output.clone());
            }
        }
        view
    }
}

/// Edges closing a cycle, found by DFS from the start-node set.
fn find_back_edges(diagram: &ExecutableDiagram) -> HashSet<String> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: HashMap<String, Color> = diagram
        .nodes
        .iter()
        .map(|n| (n.id().to_string(), Color::White))
        .collect();
    let mut back_edges = HashSet::new();

    let roots: Vec<String> = if diagram.metadata.start_nodes.is_empty() {
        diagram.nodes.iter().map(|n| n.id().to_string()).collect()
    } else {
        diagram.metadata.start_nodes.iter().cloned().collect()
    };

    for root in &roots {
        if color.get(root.as_str()) != Some(&Color::White) {
            continue;
        }
        let mut stack: Vec<(String, usize)> = vec![(root.clone(), 0)];
        color.insert(root.clone(), Color::Gray);

        while let Some((node, child_index)) = stack.pop() {
            let edges: Vec<(String, String)> = diagram
                .outgoing_edges(&node)
                .map(|e| (e.id.clone(), e.target_node_id.clone()))
                .collect();
            if child_index < edges.len() {
                stack.push((node.clone(), child_index + 1));
                let (edge_id, target) = &edges[child_index];
                match color.get(target.as_str()) {
                    Some(Color::White) => {
                        color.insert(target.clone(), Color::Gray);
                        stack.push((target.clone(), 0));
                    }
                    Some(Color::Gray) => {
                        back_edges.insert(edge_id.clone());
                    }
                    _ => {}
                }
            } else {
                color.insert(node, Color::Black);
            }
        }
    }

    back_edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::DiagramCompiler;
    use crate::domain::{DomainArrow, DomainDiagram, DomainNode, NodeType};
    use serde_json::json;

    fn compile(domain: DomainDiagram) -> Arc<ExecutableDiagram> {
        Arc::new(DiagramCompiler::new().compile(&domain).unwrap())
    }

    fn code(id: &str) -> DomainNode {
        DomainNode::new(id, NodeType::CodeJob).with_prop("code", json!("1"))
    }

    fn linear() -> Arc<ExecutableDiagram> {
        compile(
            DomainDiagram::new()
                .with_node(DomainNode::new("s", NodeType::Start))
                .with_node(code("j"))
                .with_node(DomainNode::new("e", NodeType::Endpoint))
                .with_arrow(DomainArrow::new("a1", "s:default", "j:default"))
                .with_arrow(DomainArrow::new("a2", "j:default", "e:default")),
        )
    }

    #[test]
    fn test_only_start_ready_initially() {
        let scheduler = Scheduler::new(linear());
        let decisions = scheduler.tick(&HashSet::new());
        assert_eq!(decisions.dispatch, vec!["s"]);
        assert!(decisions.skips.is_empty());
    }

    #[test]
    fn test_linear_progression() {
        let mut scheduler = Scheduler::new(linear());
        let inflight = HashSet::new();

        scheduler.mark_completed("s", json!({}), None);
        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["j"]);

        scheduler.mark_completed("j", json!(6), None);
        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["e"]);

        scheduler.mark_completed("e", json!(6), None);
        let decisions = scheduler.tick(&inflight);
        assert!(decisions.dispatch.is_empty());
        assert!(decisions.skips.is_empty());
    }

    #[test]
    fn test_start_runs_once() {
        let mut scheduler = Scheduler::new(linear());
        scheduler.mark_completed("s", json!({}), None);
        let decisions = scheduler.tick(&HashSet::new());
        assert!(!decisions.dispatch.contains(&"s".to_string()));
    }

    fn fan_in() -> Arc<ExecutableDiagram> {
        // s → {left, right} → join(all) and cond(any)
        compile(
            DomainDiagram::new()
                .with_node(DomainNode::new("s", NodeType::Start))
                .with_node(code("left"))
                .with_node(code("right"))
                .with_node(code("join"))
                .with_node(
                    DomainNode::new("cond", NodeType::Condition)
                        .with_prop("expression", json!("true")),
                )
                .with_node(DomainNode::new("e", NodeType::Endpoint))
                .with_arrow(DomainArrow::new("a1", "s:default", "left:default"))
                .with_arrow(DomainArrow::new("a2", "s:default", "right:default"))
                .with_arrow(DomainArrow::new("a3", "left:default", "join:default"))
                .with_arrow(DomainArrow::new("a4", "right:default", "join:default"))
                .with_arrow(DomainArrow::new("a5", "left:default", "cond:default"))
                .with_arrow(DomainArrow::new("a6", "right:default", "cond:default"))
                .with_arrow(DomainArrow::new("a7", "cond:condtrue", "e:default"))
                .with_arrow(DomainArrow::new("a8", "join:default", "e:default")),
        )
    }

    #[test]
    fn test_join_all_waits_join_any_fires_early() {
        let mut scheduler = Scheduler::new(fan_in());
        let inflight = HashSet::new();

        scheduler.mark_completed("s", json!({}), None);
        scheduler.mark_completed("left", json!(1), None);

        let decisions = scheduler.tick(&inflight);
        // cond joins on any: one predecessor is enough.
        assert!(decisions.dispatch.contains(&"cond".to_string()));
        // join joins on all: still waiting for right.
        assert!(!decisions.dispatch.contains(&"join".to_string()));

        scheduler.mark_completed("right", json!(2), None);
        let decisions = scheduler.tick(&inflight);
        assert!(decisions.dispatch.contains(&"join".to_string()));
    }

    #[test]
    fn test_all_join_satisfied_by_skipped_source() {
        let mut scheduler = Scheduler::new(fan_in());
        scheduler.mark_completed("s", json!({}), None);
        scheduler.mark_completed("left", json!(1), None);
        scheduler.mark_failed("right");
        // join gets left(fresh) + right(failed): failed never satisfies.
        assert!(!scheduler.tick(&HashSet::new()).dispatch.contains(&"join".to_string()));

        let mut scheduler = Scheduler::new(fan_in());
        scheduler.mark_completed("s", json!({}), None);
        scheduler.mark_completed("left", json!(1), None);
        scheduler.mark_skipped("right", SkipReason::BranchNotTaken);
        // Skipped counts as satisfied; left provides the freshness.
        assert!(scheduler.tick(&HashSet::new()).dispatch.contains(&"join".to_string()));
    }

    fn loop_diagram() -> Arc<ExecutableDiagram> {
        compile(
            DomainDiagram::new()
                .with_node(DomainNode::new("s", NodeType::Start))
                .with_node(
                    DomainNode::new("p", NodeType::PersonJob)
                        .with_prop("person", json!("alice"))
                        .with_prop("max_iteration", json!(2)),
                )
                .with_node(
                    DomainNode::new("c", NodeType::Condition)
                        .with_prop("condition_type", json!("detect_max_iterations")),
                )
                .with_node(DomainNode::new("e", NodeType::Endpoint))
                .with_arrow(DomainArrow::new("a1", "s:default", "p:first"))
                .with_arrow(DomainArrow::new("a2", "p:default", "c:default"))
                .with_arrow(DomainArrow::new("a3", "c:condfalse", "p:default"))
                .with_arrow(DomainArrow::new("a4", "c:condtrue", "e:default")),
        )
    }

    #[test]
    fn test_loop_iterates_then_caps() {
        let mut scheduler = Scheduler::new(loop_diagram());
        let inflight = HashSet::new();

        scheduler.mark_completed("s", json!({}), None);
        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["p"]);
        let settlements = scheduler.mark_completed("p", json!("turn 1"), None);
        assert!(settlements.is_empty());

        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["c"]);
        // Condition keeps looping (condfalse taken → condtrue gated).
        scheduler.mark_completed("c", json!("turn 1"), Some(false));

        // Back-edge delivers a fresh input for iteration 2.
        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["p"]);
        // Second completion exhausts the cap: the commit settles the
        // node as skipped, passthrough value in place.
        let settlements = scheduler.mark_completed("p", json!("turn 2"), None);
        assert_eq!(
            settlements,
            vec![("p".to_string(), SkipReason::MaxIterations)]
        );

        // The final delivery wakes the condition, which now exits.
        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["c"]);
        scheduler.mark_completed("c", json!("turn 2"), Some(true));

        // condtrue un-gated: the endpoint finally runs.
        assert_eq!(scheduler.tick(&inflight).dispatch, vec!["e"]);
        scheduler.mark_completed("e", json!("turn 2"), None);
        let decisions = scheduler.tick(&inflight);
        assert!(decisions.dispatch.is_empty() && decisions.skips.is_empty());
    }

    fn branch_diagram() -> Arc<ExecutableDiagram> {
        compile(
            DomainDiagram::new()
                .with_node(DomainNode::new("s", NodeType::Start))
                .with_node(
                    DomainNode::new("c", NodeType::Condition)
                        .with_prop("expression", json!("x > 3")),
                )
                .with_node(code("yes"))
                .with_node(code("no"))
                .with_node(code("no_child"))
                .with_node(DomainNode::new("e", NodeType::Endpoint))
                .with_arrow(DomainArrow::new("a1", "s:default", "c:default"))
                .with_arrow(DomainArrow::new("a2", "c:condtrue", "yes:default"))
                .with_arrow(DomainArrow::new("a3", "c:condfalse", "no:default"))
                .with_arrow(DomainArrow::new("a4", "no:default", "no_child:default"))
                .with_arrow(DomainArrow::new("a5", "yes:default", "e:default"))
                .with_arrow(DomainArrow::new("a6", "no_child:default", "e:default")),
        )
    }

    #[test]
    fn test_branch_gate_skips_untaken_subtree() {
        let mut scheduler = Scheduler::new(branch_diagram());
        scheduler.mark_completed("s", json!({"x": 5}), None);
        scheduler.mark_completed("c", json!({"x": 5}), Some(true));

        // The false branch and its exclusive descendant are skipped.
        let view = scheduler.view();
        assert_eq!(view.skip_reasons.get("no"), Some(&SkipReason::BranchNotTaken));
        assert_eq!(
            view.skip_reasons.get("no_child"),
            Some(&SkipReason::BranchNotTaken)
        );

        let decisions = scheduler.tick(&HashSet::new());
        assert_eq!(decisions.dispatch, vec!["yes"]);

        // Endpoint joins on all: yes fresh + skipped no_child → ready.
        scheduler.mark_completed("yes", json!(1), None);
        assert_eq!(scheduler.tick(&HashSet::new()).dispatch, vec!["e"]);
    }

    #[test]
    fn test_upstream_failure_cascade() {
        let mut scheduler = Scheduler::new(branch_diagram());
        scheduler.mark_completed("s", json!({}), None);
        scheduler.mark_completed("c", json!({}), Some(false));
        scheduler.mark_failed("no");
        let skipped = scheduler.cascade_upstream_failure("no");
        assert_eq!(skipped, vec!["no_child"]);
        let view = scheduler.view();
        assert_eq!(
            view.skip_reasons.get("no_child"),
            Some(&SkipReason::UpstreamFailed)
        );
    }

    #[test]
    fn test_back_edge_detection() {
        let diagram = loop_diagram();
        let back = find_back_edges(&diagram);
        assert!(back.contains("a3"));
        assert_eq!(back.len(), 1);
    }

    #[test]
    fn test_parallel_group_priority_orders_dispatch() {
        let diagram = compile(
            DomainDiagram::new()
                .with_node(DomainNode::new("s", NodeType::Start))
                .with_node(code("zeta"))
                .with_node(code("alpha"))
                .with_node(DomainNode::new("e", NodeType::Endpoint))
                .with_arrow(DomainArrow::new("a1", "s:default", "zeta:default"))
                .with_arrow(DomainArrow::new("a2", "s:default", "alpha:default"))
                .with_arrow(DomainArrow::new("a3", "alpha:default", "e:default")),
        );
        let mut scheduler = Scheduler::new(diagram);
        scheduler.mark_completed("s", json!({}), None);
        // Same group → lexicographic tiebreak.
        assert_eq!(
            scheduler.tick(&HashSet::new()).dispatch,
            vec!["alpha", "zeta"]
        );
    }
}
