//! The execution graph: a DAG-with-weak-edges that the on-node interpreter
//! walks wave by wave. Validation rules are ported directly from the
//! reference `ExecutionGraph.is_execution_graph_valid` algorithm: the graph
//! must be weakly connected, every node reachable from `root`, and acyclic
//! (with every node still reachable from `root`) once weak edges are
//! removed.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::model::{Task, TaskResult};

pub const ROOT_NODE: &str = "root";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Strong,
    Weak,
}

impl Default for EdgeKind {
    fn default() -> Self {
        EdgeKind::Strong
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TraverseOn {
    Success,
    Failure,
    Any,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: EdgeKind,
    /// How many more times this edge may be traversed; `None` means
    /// unlimited. Decremented each time the edge fires; an edge whose
    /// counter reaches zero is permanently disabled.
    #[serde(default)]
    pub counter: Option<u32>,
    #[serde(default)]
    pub traverse_on: Option<TraverseOn>,
}

/// What a graph node represents. Only `Task` nodes are dispatched to a
/// worker process; every other kind is a pure synchronization point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "node_type", rename_all = "snake_case")]
pub enum GraphNode {
    Root,
    Task(Task),
    /// A node whose concrete task is chosen at interpretation time based on
    /// the executing node's properties (architecture, available tools).
    /// The dispatch function itself lives outside the serialized graph (it
    /// runs on the orchestrator before deployment); by the time a graph
    /// reaches the interpreter every `TaskDispatcher` node has already been
    /// resolved into a concrete `Task` node.
    Synchronization,
}

impl GraphNode {
    fn is_task_like(&self) -> bool {
        matches!(self, GraphNode::Task(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub name: String,
    pub nodes: HashMap<String, GraphNode>,
    pub edges: Vec<Edge>,
    pub early_stopping: bool,
    pub report_results: bool,
    /// Disables [`ExecutionGraph::validate`]; used only for synthetic test
    /// fixtures that intentionally exercise malformed graphs elsewhere.
    #[serde(default)]
    pub override_validation: bool,
}

impl ExecutionGraph {
    pub fn new(early_stopping: bool, report_results: bool) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(ROOT_NODE.to_string(), GraphNode::Root);
        Self {
            name: uuid::Uuid::new_v4().to_string(),
            nodes,
            edges: Vec::new(),
            early_stopping,
            report_results,
            override_validation: false,
        }
    }

    pub fn add_task(&mut self, id: impl Into<String>, task: Task) {
        self.nodes.insert(id.into(), GraphNode::Task(task));
    }

    pub fn add_sync_point(&mut self, id: impl Into<String>) {
        self.nodes.insert(id.into(), GraphNode::Synchronization);
    }

    pub fn add_edge(&mut self, edge: Edge) {
        self.edges.push(edge);
    }

    fn adjacency(&self, weak_too: bool) -> HashMap<&str, Vec<&str>> {
        let mut adj: HashMap<&str, Vec<&str>> = self.nodes.keys().map(|k| (k.as_str(), Vec::new())).collect();
        for edge in &self.edges {
            if weak_too || edge.kind == EdgeKind::Strong {
                adj.entry(edge.from.as_str()).or_default().push(edge.to.as_str());
            }
        }
        adj
    }

    fn reachable_from_root(&self, weak_too: bool) -> HashSet<&str> {
        let adj = self.adjacency(weak_too);
        let undirected = if weak_too {
            // weakly-connected check needs the undirected closure
            let mut bidi: HashMap<&str, Vec<&str>> = adj.clone();
            for edge in &self.edges {
                bidi.entry(edge.to.as_str()).or_default().push(edge.from.as_str());
            }
            bidi
        } else {
            adj
        };

        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(ROOT_NODE);
        seen.insert(ROOT_NODE);
        while let Some(node) = queue.pop_front() {
            if let Some(neighbors) = undirected.get(node) {
                for next in neighbors {
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
            }
        }
        seen
    }

    /// Validates the graph per the rules documented on the module: weak
    /// connectivity, reachability from root, acyclicity after dropping weak
    /// edges (with reachability preserved in that reduced graph too), a
    /// positive `counter` on every edge that has one, a legal `traverse_on`
    /// value, and `traverse_on` only on edges whose source is a task node.
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.override_validation {
            return Ok(());
        }

        if !self.nodes.contains_key(ROOT_NODE) {
            return Err(GraphError::MissingRoot);
        }

        let weakly_reachable = self.reachable_from_root(true);
        if weakly_reachable.len() != self.nodes.len() {
            return Err(GraphError::NotWeaklyConnected);
        }

        let strongly_reachable = self.reachable_from_root(false);
        let strong_unreachable: Vec<String> = self
            .nodes
            .keys()
            .filter(|n| !strongly_reachable.contains(n.as_str()))
            .cloned()
            .collect();
        if !strong_unreachable.is_empty() {
            return Err(GraphError::UnreachableFromRoot(strong_unreachable));
        }

        if self.has_cycle_ignoring_weak_edges() {
            return Err(GraphError::CyclicAfterWeakRemoval);
        }

        for edge in &self.edges {
            if let Some(counter) = edge.counter {
                if counter == 0 {
                    return Err(GraphError::NonPositiveCounter(
                        edge.from.clone(),
                        edge.to.clone(),
                        0,
                    ));
                }
            }
            if edge.traverse_on.is_some() {
                let source_is_task = self
                    .nodes
                    .get(&edge.from)
                    .map(GraphNode::is_task_like)
                    .unwrap_or(false);
                if !source_is_task {
                    return Err(GraphError::TraverseOnSynchronizationPoint(
                        edge.from.clone(),
                        edge.to.clone(),
                    ));
                }
            }
        }

        Ok(())
    }

    fn has_cycle_ignoring_weak_edges(&self) -> bool {
        let strong_adj = self.adjacency(false);

        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }
        let mut marks: HashMap<&str, Mark> =
            self.nodes.keys().map(|k| (k.as_str(), Mark::Unvisited)).collect();

        fn visit<'a>(
            node: &'a str,
            adj: &HashMap<&'a str, Vec<&'a str>>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> bool {
            match marks.get(node) {
                Some(Mark::InProgress) => return true,
                Some(Mark::Done) => return false,
                _ => {}
            }
            marks.insert(node, Mark::InProgress);
            if let Some(neighbors) = adj.get(node) {
                for next in neighbors {
                    if visit(next, adj, marks) {
                        return true;
                    }
                }
            }
            marks.insert(node, Mark::Done);
            false
        }

        for node in self.nodes.keys() {
            if visit(node.as_str(), &strong_adj, &mut marks) {
                return true;
            }
        }
        false
    }

    /// Kahn's-algorithm wave decomposition over strong edges only: each wave
    /// is the set of nodes whose strong in-degree has reached zero. Weak
    /// edges never gate readiness, matching the "weak edges are not
    /// requirements" rule.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let mut in_degree: HashMap<&str, u32> =
            self.nodes.keys().map(|k| (k.as_str(), 0)).collect();
        for edge in &self.edges {
            if edge.kind == EdgeKind::Strong {
                *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
            }
        }

        let strong_adj = self.adjacency(false);
        let mut waves = Vec::new();
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(n, _)| *n)
            .collect();
        ready.sort();
        let mut remaining = in_degree.clone();

        let mut frontier = ready;
        while !frontier.is_empty() {
            waves.push(frontier.iter().map(|s| s.to_string()).collect());
            let mut next_frontier = Vec::new();
            for node in &frontier {
                if let Some(neighbors) = strong_adj.get(node) {
                    for next in neighbors {
                        let deg = remaining.get_mut(next).unwrap();
                        *deg -= 1;
                        if *deg == 0 {
                            next_frontier.push(*next);
                        }
                    }
                }
            }
            next_frontier.sort();
            next_frontier.dedup();
            frontier = next_frontier;
        }
        waves
    }

    /// Whether `edge` should fire given the outcome of its source task, per
    /// the traverse_on / early_stopping interaction rules: an explicit
    /// `traverse_on` on the edge always wins; otherwise `early_stopping`
    /// picks the default (`success` when true, `any` when false).
    pub fn should_traverse(&self, edge: &Edge, outcome: &TaskResult) -> bool {
        let effective = edge.traverse_on.unwrap_or(if self.early_stopping {
            TraverseOn::Success
        } else {
            TraverseOn::Any
        });
        match effective {
            TraverseOn::Any => true,
            TraverseOn::Success => outcome.is_success(),
            TraverseOn::Failure => !outcome.is_success(),
        }
    }
}

/// Per-run mutable edge-firing state: remaining counters, keyed by edge
/// index rather than persisted on the graph value itself (a graph is a
/// value, not a running process).
#[derive(Debug, Default)]
pub struct EdgeBudget {
    remaining: HashMap<usize, u32>,
}

impl EdgeBudget {
    pub fn new(graph: &ExecutionGraph) -> Self {
        let remaining = graph
            .edges
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.counter.map(|c| (i, c)))
            .collect();
        Self { remaining }
    }

    /// Returns whether the edge may still fire, and decrements its budget
    /// if so. Edges without a counter always return `true`.
    pub fn try_consume(&mut self, edge_index: usize) -> bool {
        match self.remaining.get_mut(&edge_index) {
            None => true,
            Some(0) => false,
            Some(budget) => {
                *budget -= 1;
                true
            }
        }
    }
}

/// One OS process per task. Implemented by the interpreter binary using
/// `tokio::process::Command`; abstracted here so the graph engine can be
/// unit tested without spawning real processes.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task) -> TaskResult;
}

/// Drives one pass of a validated [`ExecutionGraph`] to completion, shared
/// by the on-node interpreter binary and by tests. A task node fires as
/// soon as any one of its incoming strong edges fires (an OR-join); a
/// synchronization node only fires once every one of its incoming strong
/// edges has been evaluated, whatever the outcome (an AND-join barrier with
/// no pass/fail condition of its own). Both kinds propagate through their
/// outgoing edges the same way: a node's completion is given a synthetic
/// `Success` outcome when it has none of its own (root, synchronization),
/// and `should_traverse` decides whether each outgoing edge fires from
/// there. Weak-edge loops (e.g. a bounded retry) can re-enqueue a task node
/// that already ran, so results are collected as a name -> result-sequence
/// map rather than one result per node.
pub struct GraphInterpreter;

impl GraphInterpreter {
    pub async fn run(
        graph: &ExecutionGraph,
        runner: &dyn TaskRunner,
    ) -> HashMap<String, Vec<TaskResult>> {
        let mut results: HashMap<String, Vec<TaskResult>> = HashMap::new();
        let mut budget = EdgeBudget::new(graph);

        let mut incoming_strong: HashMap<&str, Vec<usize>> = HashMap::new();
        for (idx, edge) in graph.edges.iter().enumerate() {
            if edge.kind == EdgeKind::Strong {
                incoming_strong.entry(edge.to.as_str()).or_default().push(idx);
            }
        }
        let mut settled_incoming: HashMap<&str, HashSet<usize>> = HashMap::new();
        let mut sync_dispatched: HashSet<&str> = HashSet::new();

        let mut queue: VecDeque<&str> = VecDeque::new();
        // The root has no result of its own; treat it as an implicit success
        // so its outgoing edges are evaluated by the same firing rule.
        let root_outcome = TaskResult::Success { output: serde_json::Value::Null };
        self_fire(graph, ROOT_NODE, &root_outcome, &mut budget, &incoming_strong, &mut settled_incoming, &mut sync_dispatched, &mut queue);

        while let Some(node_id) = queue.pop_front() {
            match graph.nodes.get(node_id) {
                Some(GraphNode::Task(task)) => {
                    let outcome = runner.run(task).await;
                    results.entry(node_id.to_string()).or_default().push(outcome.clone());
                    self_fire(graph, node_id, &outcome, &mut budget, &incoming_strong, &mut settled_incoming, &mut sync_dispatched, &mut queue);
                }
                Some(GraphNode::Synchronization) => {
                    let outcome = TaskResult::Success { output: serde_json::Value::Null };
                    self_fire(graph, node_id, &outcome, &mut budget, &incoming_strong, &mut settled_incoming, &mut sync_dispatched, &mut queue);
                }
                Some(GraphNode::Root) | None => {}
            }
        }

        results
    }
}

/// Fires every outgoing edge of `node_id` whose firing rule is satisfied
/// given `outcome`, updating join bookkeeping and enqueueing newly-ready
/// downstream nodes.
#[allow(clippy::too_many_arguments)]
fn self_fire<'a>(
    graph: &'a ExecutionGraph,
    node_id: &'a str,
    outcome: &TaskResult,
    budget: &mut EdgeBudget,
    incoming_strong: &HashMap<&'a str, Vec<usize>>,
    settled_incoming: &mut HashMap<&'a str, HashSet<usize>>,
    sync_dispatched: &mut HashSet<&'a str>,
    queue: &mut VecDeque<&'a str>,
) {
    for (idx, edge) in graph.edges.iter().enumerate() {
        if edge.from != node_id {
            continue;
        }
        let target = graph.nodes.get(edge.to.as_str());
        let is_strong = edge.kind == EdgeKind::Strong;
        let fired = graph.should_traverse(edge, outcome) && budget.try_consume(idx);

        if is_strong {
            // The target's join condition observes every incoming strong
            // edge once evaluated, regardless of whether it fired.
            settled_incoming.entry(edge.to.as_str()).or_default().insert(idx);
        }

        match target {
            Some(GraphNode::Task(_)) => {
                if fired {
                    queue.push_back(edge.to.as_str());
                }
            }
            Some(GraphNode::Synchronization) => {
                // An AND-join has no pass/fail condition of its own: it
                // becomes ready once every incoming strong edge has been
                // evaluated, whether or not each one fired.
                let required = incoming_strong.get(edge.to.as_str()).cloned().unwrap_or_default();
                let settled = settled_incoming.get(edge.to.as_str()).cloned().unwrap_or_default();
                let ready = required.iter().all(|i| settled.contains(i));
                if ready && sync_dispatched.insert(edge.to.as_str()) {
                    queue.push_back(edge.to.as_str());
                }
            }
            Some(GraphNode::Root) | None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Task;

    fn graph_with_linear_chain() -> ExecutionGraph {
        let mut g = ExecutionGraph::new(true, true);
        g.add_task("a", Task::new("a", b"payload".to_vec()));
        g.add_task("b", Task::new("b", b"payload".to_vec()));
        g.add_edge(Edge {
            from: ROOT_NODE.into(),
            to: "a".into(),
            kind: EdgeKind::Strong,
            counter: None,
            traverse_on: None,
        });
        g.add_edge(Edge {
            from: "a".into(),
            to: "b".into(),
            kind: EdgeKind::Strong,
            counter: None,
            traverse_on: None,
        });
        g
    }

    #[test]
    fn linear_chain_is_valid_and_waves_in_order() {
        let g = graph_with_linear_chain();
        g.validate().expect("valid graph");
        let waves = g.waves();
        assert_eq!(waves, vec![vec!["root".to_string()], vec!["a".to_string()], vec!["b".to_string()]]);
    }

    #[test]
    fn unreachable_node_is_rejected() {
        let mut g = ExecutionGraph::new(true, true);
        g.add_task("orphan", Task::new("orphan", b"x".to_vec()));
        assert!(matches!(
            g.validate(),
            Err(GraphError::NotWeaklyConnected)
        ));
    }

    #[test]
    fn cycle_without_weak_edge_is_rejected() {
        let mut g = ExecutionGraph::new(true, true);
        g.add_task("a", Task::new("a", b"x".to_vec()));
        g.add_task("b", Task::new("b", b"x".to_vec()));
        g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: "b".into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        assert!(matches!(g.validate(), Err(GraphError::CyclicAfterWeakRemoval)));
    }

    #[test]
    fn cycle_with_weak_edge_is_valid() {
        let mut g = ExecutionGraph::new(true, true);
        g.add_task("a", Task::new("a", b"x".to_vec()));
        g.add_task("b", Task::new("b", b"x".to_vec()));
        g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: "b".into(), to: "a".into(), kind: EdgeKind::Weak, counter: Some(3), traverse_on: None });
        g.validate().expect("cycle via weak edge is legal");
    }

    #[test]
    fn traverse_on_rejected_on_non_task_source() {
        let mut g = ExecutionGraph::new(true, true);
        g.add_sync_point("sync");
        g.add_edge(Edge { from: ROOT_NODE.into(), to: "sync".into(), kind: EdgeKind::Strong, counter: None, traverse_on: Some(TraverseOn::Success) });
        assert!(matches!(
            g.validate(),
            Err(GraphError::TraverseOnSynchronizationPoint(_, _))
        ));
    }

    #[test]
    fn should_traverse_obeys_early_stopping_default() {
        let g = graph_with_linear_chain();
        let edge = &g.edges[0];
        let failure = TaskResult::Failure { reason: "boom".into() };
        assert!(!g.should_traverse(edge, &failure));

        let mut lenient = g.clone();
        lenient.early_stopping = false;
        assert!(lenient.should_traverse(edge, &failure));
    }

    #[test]
    fn edge_budget_disables_after_counter_exhausted() {
        let mut g = ExecutionGraph::new(true, true);
        g.add_task("a", Task::new("a", b"x".to_vec()));
        g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: Some(1), traverse_on: None });
        let mut budget = EdgeBudget::new(&g);
        assert!(budget.try_consume(0));
        assert!(!budget.try_consume(0));
    }

    struct FixedRunner(std::collections::HashMap<String, TaskResult>);

    #[async_trait]
    impl TaskRunner for FixedRunner {
        async fn run(&self, task: &Task) -> TaskResult {
            self.0.get(&task.name).cloned().unwrap_or(TaskResult::Success { output: serde_json::Value::Null })
        }
    }

    /// A conditional edge into an AND-join (legal: `traverse_on` only
    /// restricts the edge's *source*, never its target) must not block the
    /// join when that edge doesn't fire. `a`'s edge into `sync` only fires
    /// on success, but `a` fails here; `sync` must still become ready once
    /// `b`'s edge settles, since an AND-join only asks that every incoming
    /// strong edge be evaluated, not that it fired.
    #[tokio::test]
    async fn sync_point_fires_when_a_conditional_incoming_edge_does_not() {
        let mut g = ExecutionGraph::new(false, true);
        g.add_task("a", Task::new("a", b"x".to_vec()));
        g.add_task("b", Task::new("b", b"x".to_vec()));
        g.add_sync_point("sync");
        g.add_task("c", Task::new("c", b"x".to_vec()));

        g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: ROOT_NODE.into(), to: "b".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: "a".into(), to: "sync".into(), kind: EdgeKind::Strong, counter: None, traverse_on: Some(TraverseOn::Success) });
        g.add_edge(Edge { from: "b".into(), to: "sync".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        g.add_edge(Edge { from: "sync".into(), to: "c".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });

        g.validate().expect("conditional edge into an AND-join is a legal topology");

        let mut outcomes = std::collections::HashMap::new();
        outcomes.insert("a".to_string(), TaskResult::Failure { reason: "boom".into() });
        outcomes.insert("b".to_string(), TaskResult::Success { output: serde_json::Value::Null });
        outcomes.insert("c".to_string(), TaskResult::Success { output: serde_json::Value::Null });
        let runner = FixedRunner(outcomes);

        let results = GraphInterpreter::run(&g, &runner).await;

        assert!(results.contains_key("c"), "sync point must fire and dispatch c despite a's edge not firing");
        assert!(matches!(results["c"][0], TaskResult::Success { .. }));
    }
}
