use orchestration_core::graph::{EdgeBudget, EdgeKind, Edge, ExecutionGraph, TraverseOn, ROOT_NODE};
use orchestration_core::model::{Task, TaskResult};

fn success() -> TaskResult {
    TaskResult::Success { output: serde_json::json!({}) }
}

fn failure() -> TaskResult {
    TaskResult::Failure { reason: "boom".into() }
}

#[test]
fn diamond_graph_is_valid_and_has_three_waves() {
    let mut g = ExecutionGraph::new(true, true);
    g.add_task("a", Task::new("a", b"x".to_vec()));
    g.add_task("b", Task::new("b", b"x".to_vec()));
    g.add_task("c", Task::new("c", b"x".to_vec()));
    g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
    g.add_edge(Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
    g.add_edge(Edge { from: "a".into(), to: "c".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });

    g.validate().expect("diamond graph is valid");
    let waves = g.waves();
    assert_eq!(waves.len(), 2);
    assert_eq!(waves[0], vec!["root".to_string()]);
    let mut second = waves[1].clone();
    second.sort();
    assert_eq!(second, vec!["a".to_string()]);
}

#[test]
fn early_stopping_true_default_blocks_on_failure() {
    let mut g = ExecutionGraph::new(true, true);
    g.add_task("a", Task::new("a", b"x".to_vec()));
    g.add_task("b", Task::new("b", b"x".to_vec()));
    g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
    let edge_ab = Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None };

    assert!(!g.should_traverse(&edge_ab, &failure()));
    assert!(g.should_traverse(&edge_ab, &success()));
}

#[test]
fn explicit_traverse_on_failure_overrides_early_stopping() {
    let mut g = ExecutionGraph::new(true, true);
    g.add_task("a", Task::new("a", b"x".to_vec()));
    g.add_task("cleanup", Task::new("cleanup", b"x".to_vec()));
    g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
    let edge = Edge { from: "a".into(), to: "cleanup".into(), kind: EdgeKind::Strong, counter: None, traverse_on: Some(TraverseOn::Failure) };

    assert!(g.should_traverse(&edge, &failure()));
    assert!(!g.should_traverse(&edge, &success()));
}

#[test]
fn bounded_loop_fires_exactly_counter_times() {
    let mut g = ExecutionGraph::new(false, true);
    g.add_task("retry", Task::new("retry", b"x".to_vec()));
    g.add_edge(Edge { from: ROOT_NODE.into(), to: "retry".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
    g.add_edge(Edge { from: "retry".into(), to: "retry".into(), kind: EdgeKind::Weak, counter: Some(2), traverse_on: Some(TraverseOn::Failure) });

    let mut budget = EdgeBudget::new(&g);
    let loop_edge_index = 1;
    assert!(budget.try_consume(loop_edge_index));
    assert!(budget.try_consume(loop_edge_index));
    assert!(!budget.try_consume(loop_edge_index));
    // Graph must validate despite the self-loop, because it is a weak edge.
    g.validate().expect("weak self-loop does not break acyclicity check");
}

#[test]
fn malformed_graph_rejected_with_specific_reason() {
    let mut g = ExecutionGraph::new(true, true);
    g.add_task("a", Task::new("a", b"x".to_vec()));
    g.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: Some(0), traverse_on: None });
    let err = g.validate().unwrap_err();
    assert!(matches!(err, orchestration_core::GraphError::NonPositiveCounter(_, _, _)));
}
