use std::{fmt, path::PathBuf};

use thiserror::Error;

/// Error taxonomy shared by the orchestration core and its dependents.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("experiment not found: {0}")]
    ExperimentNotFound(String),
    #[error("experiment '{0}' already exists")]
    ExperimentExists(String),
    #[error("experiment '{0}' is in state {1}, which does not allow this operation")]
    InvalidTransition(String, String),
    #[error("no connector registered under tag '{0}'")]
    UnknownConnector(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OrchestratorError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }
}

/// Raised by [`crate::graph::ExecutionGraph::validate`] when a graph violates
/// one of the structural rules of an execution graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("execution graph must have a root node")]
    MissingRoot,
    #[error("execution graph must be weakly connected")]
    NotWeaklyConnected,
    #[error("nodes not reachable from root: {0:?}")]
    UnreachableFromRoot(Vec<String>),
    #[error("execution graph must be acyclic after removing weak edges")]
    CyclicAfterWeakRemoval,
    #[error("edge ({0}, {1}) has non-positive counter {2}")]
    NonPositiveCounter(String, String, i64),
    #[error("edge ({0}, {1}) has traverse_on attribute but its source is not a task node")]
    TraverseOnSynchronizationPoint(String, String),
}

/// A connector method threw; the connector is evicted from the registry.
#[derive(Debug, Error)]
#[error("connector '{connector}' raised a fault in '{method}': {source}")]
pub struct ConnectorFault {
    pub connector: String,
    pub method: &'static str,
    #[source]
    pub source: anyhow::Error,
}

/// Errors local to the on-node graph interpreter process.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("failed to acquire execution graph: {0}")]
    GraphUnavailable(String),
    #[error("failed to report results after exhausting retries: {0}")]
    ReportFailed(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure of a single task's execution. Carried in [`crate::model::TaskResult`]
/// rather than propagated as a Rust error, so it never aborts graph traversal.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub reason: String,
    pub retryable: bool,
}

impl TaskError {
    pub fn new(reason: impl Into<String>, retryable: bool) -> Self {
        Self {
            reason: reason.into(),
            retryable,
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let retry = if self.retryable { "retryable" } else { "terminal" };
        write!(f, "{retry} task failure: {}", self.reason)
    }
}

impl std::error::Error for TaskError {}
