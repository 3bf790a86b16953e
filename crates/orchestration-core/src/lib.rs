//! Core primitives shared across the orchestration plane:
//! - the data model (nodes, tasks, execution graphs, experiments)
//! - the execution graph engine (validation, wave scheduling, edge firing)
//! - the connector capability set and fault-isolating registry
//! - the blackboard shared keyed store
//! - OS-process task isolation
//! - configuration loading with guardrails
//! - the shared error taxonomy
//! - tracing / telemetry and metrics bootstrap
//! - basic security helpers (environment-backed secrets)

pub mod blackboard;
pub mod config;
pub mod connector;
pub mod error;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod process;
pub mod security;
pub mod telemetry;

pub use config::{Config, ConfigLoader, ConnectorConfig, DatabaseConfig, GatewayConfig, LoggingConfig};
pub use error::{ConnectorFault, GraphError, InterpreterError, OrchestratorError, TaskError};
pub use security::{require_env, SecretValue};
pub use telemetry::{init_telemetry, TelemetryOptions};
