//! Data model shared by every component: nodes, tasks, execution graphs,
//! deployments and experiments.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ExperimentId = String;
pub type ExecutorId = String;

/// A value attached to a [`Node`] describing one of its properties
/// (e.g. OS version, available tools, bandwidth class).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PropertyValue {
    Text(String),
    Number(f64),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    LinuxAmd64,
    LinuxArm64,
    #[default]
    Unknown,
}

/// A node in the underlying infrastructure that a connector can deploy to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(default)]
    pub properties: HashMap<String, PropertyValue>,
    #[serde(default)]
    pub architecture: Architecture,
    pub connector: String,
}

impl Node {
    pub fn new(name: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            architecture: Architecture::Unknown,
            connector: connector.into(),
        }
    }
}

/// The pool of nodes a connector reports. Most connectors enumerate a
/// concrete, finite set of nodes (`Countable`); a connector backed by an
/// elastic provider that only hands out nodes on demand reports a sample
/// drawn from an unbounded template (`Uncountable`) instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "node_pool_type")]
pub enum NodePool {
    Countable { nodes: Vec<Node> },
    Uncountable { sample: Vec<Node> },
}

impl NodePool {
    pub fn nodes(&self) -> &[Node] {
        match self {
            NodePool::Countable { nodes } => nodes,
            NodePool::Uncountable { sample } => sample,
        }
    }
}

/// A unit of work to run on a node. `payload` is an opaque, connector- and
/// language-agnostic blob (e.g. base64-decoded bytecode or a shell script).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub requirements: Vec<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload: payload.into(),
            requirements: Vec::new(),
        }
    }
}

mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(d)?;
        STANDARD.decode(raw.trim()).map_err(serde::de::Error::custom)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn roundtrips() {
            let data = b"hello, netunicorn!";
            let encoded = STANDARD.encode(data);
            assert_eq!(STANDARD.decode(encoded).unwrap(), data);
        }
    }
}

/// Outcome of a single task's run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TaskResult {
    Success { output: serde_json::Value },
    Failure { reason: String },
}

impl TaskResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskResult::Success { .. })
    }
}

/// The graph interpreter's top-level verdict for one run (spec §4.1):
/// `Success` once every produced [`TaskResult`] in the map succeeded,
/// `Failure` otherwise. Carries the full per-task result-sequence map
/// either way, so a failure still reports what did succeed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success { results: HashMap<String, Vec<TaskResult>> },
    Failure { results: HashMap<String, Vec<TaskResult>> },
}

impl ExecutionOutcome {
    pub fn from_results(results: HashMap<String, Vec<TaskResult>>) -> Self {
        let all_succeeded = results.values().all(|sequence| sequence.iter().all(TaskResult::is_success));
        if all_succeeded {
            ExecutionOutcome::Success { results }
        } else {
            ExecutionOutcome::Failure { results }
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Success { .. })
    }
}

/// A container-image-based or shell-command-based environment definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "environment_definition_type", rename_all = "snake_case")]
pub enum EnvironmentDefinition {
    ShellCommands { commands: Vec<String> },
    ContainerImage {
        image: String,
        #[serde(default)]
        commands: Vec<String>,
        #[serde(default)]
        runtime: RuntimeContext,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeContext {
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub ports: HashMap<u16, u16>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

/// A single node's assignment within an experiment: which node, which graph,
/// which environment, and its deployment/cleanup bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub node: Node,
    pub executor_id: ExecutorId,
    /// Serialized execution graph (opaque to the orchestrator; interpreted
    /// on-node). Stored as JSON bytes rather than a typed graph so the
    /// control plane never needs to understand graph internals.
    pub graph: serde_json::Value,
    pub environment_definition: EnvironmentDefinition,
    #[serde(default)]
    pub prepared: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub cleanup: bool,
    /// Set once this executor has a terminal outcome recorded (success,
    /// failure, connector-wide eviction, or silence timeout). Mirrors the
    /// `executors.finished` column of the invariant in spec §8.1.
    #[serde(default)]
    pub finished: bool,
    /// The consolidated per-task result map this executor reported, once
    /// `finished` is set. `None` while running or if the executor never
    /// reported (e.g. connector-wide fault, silence timeout).
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

impl Deployment {
    pub fn new(node: Node, graph: serde_json::Value, environment_definition: EnvironmentDefinition) -> Self {
        Self {
            node,
            executor_id: Uuid::new_v4().to_string(),
            graph,
            environment_definition,
            prepared: false,
            error: None,
            cleanup: false,
            finished: false,
            result: None,
        }
    }

    /// Marks this deployment finished with a synthetic failure reason,
    /// without a result map (compilation errors, connector eviction,
    /// silence timeouts never produce one).
    pub fn mark_finished_with_error(&mut self, reason: impl Into<String>) {
        self.finished = true;
        self.error = Some(reason.into());
    }

    pub fn mark_finished_with_result(&mut self, result: serde_json::Value) {
        self.finished = true;
        self.result = Some(result);
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Unknown,
    Preparing,
    Ready,
    Running,
    Finished,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Unknown => "UNKNOWN",
            ExperimentStatus::Preparing => "PREPARING",
            ExperimentStatus::Ready => "READY",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Finished => "FINISHED",
        }
    }

    /// Validates a status machine transition per the orchestrator's state
    /// diagram (`UNKNOWN -> PREPARING -> READY -> RUNNING -> FINISHED`).
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Unknown, Preparing)
                | (Preparing, Ready)
                | (Preparing, Unknown)
                | (Ready, Running)
                | (Running, Finished)
                | (Ready, Finished)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub experiment_id: ExperimentId,
    pub name: String,
    pub owner: String,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub deployments: Vec<Deployment>,
    pub keep_alive_timeout_secs: i64,
    #[serde(default)]
    pub cleaned_up: bool,
    #[serde(default)]
    pub error: Option<String>,
    /// Consolidated task-name -> result-sequence map, written once by the
    /// Watcher when every executor has a terminal outcome (spec §4.4).
    #[serde(default)]
    pub results: Option<serde_json::Value>,
}

impl Experiment {
    pub fn new(name: impl Into<String>, owner: impl Into<String>, keep_alive_timeout_secs: i64) -> Self {
        Self {
            experiment_id: Uuid::new_v4().to_string(),
            name: name.into(),
            owner: owner.into(),
            status: ExperimentStatus::Unknown,
            created_at: Utc::now(),
            started_at: None,
            deployments: Vec::new(),
            keep_alive_timeout_secs,
            cleaned_up: false,
            error: None,
            results: None,
        }
    }

    pub fn transition(&mut self, next: ExperimentStatus) -> Result<(), crate::OrchestratorError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::OrchestratorError::InvalidTransition(
                self.status.as_str().to_string(),
                next.as_str().to_string(),
            ));
        }
        self.status = next;
        Ok(())
    }

    /// All deployments are accounted for once every one of them carries a
    /// terminal outcome; drives the Watcher's `RUNNING -> FINISHED` check.
    pub fn all_executors_finished(&self) -> bool {
        self.deployments.iter().all(|d| d.finished)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRecord {
    pub executor_id: ExecutorId,
    pub experiment_id: ExperimentId,
    pub node_name: String,
    pub connector: String,
    #[serde(default)]
    pub finished: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_machine_rejects_skipping_ready() {
        assert!(!ExperimentStatus::Preparing.can_transition_to(ExperimentStatus::Running));
        assert!(ExperimentStatus::Preparing.can_transition_to(ExperimentStatus::Ready));
    }

    #[test]
    fn task_result_roundtrips_through_json() {
        let result = TaskResult::Success {
            output: serde_json::json!({"ping_ms": 12.3}),
        };
        let raw = serde_json::to_string(&result).unwrap();
        let back: TaskResult = serde_json::from_str(&raw).unwrap();
        assert!(back.is_success());
    }

    #[test]
    fn environment_definition_uses_discriminator_tag() {
        let env = EnvironmentDefinition::ContainerImage {
            image: "netunicorn/base:latest".into(),
            commands: vec!["echo hi".into()],
            runtime: RuntimeContext::default(),
        };
        let raw = serde_json::to_value(&env).unwrap();
        assert_eq!(raw["environment_definition_type"], "container_image");
    }

    #[test]
    fn execution_outcome_is_failure_if_any_task_failed() {
        let mut results = HashMap::new();
        results.insert("a".to_string(), vec![TaskResult::Success { output: serde_json::Value::Null }]);
        results.insert("b".to_string(), vec![TaskResult::Failure { reason: "boom".into() }]);
        assert!(!ExecutionOutcome::from_results(results).is_success());

        let mut all_ok = HashMap::new();
        all_ok.insert("a".to_string(), vec![TaskResult::Success { output: serde_json::Value::Null }]);
        assert!(ExecutionOutcome::from_results(all_ok).is_success());
    }

    #[test]
    fn node_pool_uses_discriminator_tag() {
        let pool = NodePool::Countable { nodes: vec![Node::new("node-0", "local")] };
        let raw = serde_json::to_value(&pool).unwrap();
        assert_eq!(raw["node_pool_type"], "Countable");
        assert_eq!(pool.nodes().len(), 1);
    }
}
