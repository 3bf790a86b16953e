//! The connector capability set and its registry. Connectors are the
//! pluggable bridge to a concrete infrastructure (a cluster, a cloud
//! provider, a pool of bare-metal boxes). Any method call that returns
//! `Err` — or panics, caught at the registry boundary — evicts the
//! connector from the registry; it is never automatically re-registered.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use tracing::{error, warn};

use crate::model::{Deployment, ExecutorId, ExperimentId, Node};

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DeployContext {
    pub keep_alive_timeout_secs: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ExecContext;

#[derive(Debug, Clone, Default)]
pub struct CancelContext;

#[derive(Debug, Clone)]
pub struct StopTarget {
    pub executor_id: ExecutorId,
    pub node: Node,
}

/// Per-executor outcome of a `deploy`/`execute`/`stop_executors` call. Unlike
/// the outer `anyhow::Result`, this is never used to signal a fault —
/// connectors report it for every executor they were asked to act on.
#[derive(Debug, Clone)]
pub enum ExecutorOutcome {
    Ok,
    Error(String),
}

/// Capability set every infrastructure connector must implement.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;
    async fn initialize(&self) -> anyhow::Result<()>;
    async fn health(&self) -> (bool, String);
    async fn shutdown(&self) -> anyhow::Result<()>;
    async fn get_nodes(&self, user: &str, auth_ctx: &AuthContext) -> anyhow::Result<Vec<Node>>;
    async fn deploy(
        &self,
        user: &str,
        experiment_id: &ExperimentId,
        deployments: &[Deployment],
        ctx: &DeployContext,
        auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>>;
    async fn execute(
        &self,
        user: &str,
        experiment_id: &ExperimentId,
        deployments: &[Deployment],
        ctx: &ExecContext,
        auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>>;
    async fn stop_executors(
        &self,
        user: &str,
        targets: &[StopTarget],
        ctx: &CancelContext,
        auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>>;
    /// Best-effort teardown of whatever the connector allocated for an
    /// experiment. Never fails outwardly: internal errors are logged.
    async fn cleanup(&self, experiment_id: &ExperimentId, deployments: &[Deployment]);
}

/// Holds the live set of connectors, keyed by their registered tag.
/// Backed by a `DashMap` so concurrent HTTP handlers can read/evict without
/// a global lock.
#[derive(Default, Clone)]
pub struct Registry {
    connectors: Arc<DashMap<String, Arc<dyn Connector>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connector: Arc<dyn Connector>) {
        self.connectors.insert(connector.name().to_string(), connector);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).map(|c| c.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.connectors.iter().map(|e| e.key().clone()).collect()
    }

    fn evict(&self, name: &str, method: &'static str, err: &anyhow::Error) {
        self.connectors.remove(name);
        crate::metrics::record_connector_eviction(name);
        error!(connector = name, method, error = %err, "connector raised a fault; evicted from registry");
    }

    /// Runs a fallible connector call, evicting the connector on `Err` or a
    /// caught panic (connectors are third-party code; a panic must not take
    /// down the control plane).
    pub async fn call<F, Fut, T>(&self, name: &str, method: &'static str, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(Arc<dyn Connector>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let Some(connector) = self.get(name) else {
            anyhow::bail!("no connector registered under tag '{name}'");
        };
        let result = AssertUnwindSafe(f(connector)).catch_unwind().await;
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => {
                self.evict(name, method, &err);
                Err(err)
            }
            Err(panic) => {
                let message = panic_message(&panic);
                warn!(connector = name, method, %message, "connector panicked");
                let err = anyhow::anyhow!("connector '{name}' panicked in '{method}': {message}");
                self.evict(name, method, &err);
                Err(err)
            }
        }
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FaultyConnector;

    #[async_trait]
    impl Connector for FaultyConnector {
        fn name(&self) -> &str {
            "faulty"
        }
        async fn initialize(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn health(&self) -> (bool, String) {
            (true, "ok".into())
        }
        async fn shutdown(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn get_nodes(&self, _user: &str, _auth_ctx: &AuthContext) -> anyhow::Result<Vec<Node>> {
            anyhow::bail!("infrastructure unreachable")
        }
        async fn deploy(
            &self,
            _user: &str,
            _experiment_id: &ExperimentId,
            _deployments: &[Deployment],
            _ctx: &DeployContext,
            _auth_ctx: &AuthContext,
        ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
            Ok(HashMap::new())
        }
        async fn execute(
            &self,
            _user: &str,
            _experiment_id: &ExperimentId,
            _deployments: &[Deployment],
            _ctx: &ExecContext,
            _auth_ctx: &AuthContext,
        ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
            Ok(HashMap::new())
        }
        async fn stop_executors(
            &self,
            _user: &str,
            _targets: &[StopTarget],
            _ctx: &CancelContext,
            _auth_ctx: &AuthContext,
        ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
            Ok(HashMap::new())
        }
        async fn cleanup(&self, _experiment_id: &ExperimentId, _deployments: &[Deployment]) {}
    }

    #[tokio::test]
    async fn faulting_connector_is_evicted() {
        let registry = Registry::new();
        registry.register(Arc::new(FaultyConnector));
        assert!(registry.get("faulty").is_some());

        let auth = AuthContext::default();
        let result = registry
            .call("faulty", "get_nodes", |c| async move { c.get_nodes("alice", &auth).await })
            .await;

        assert!(result.is_err());
        assert!(registry.get("faulty").is_none());
    }

    #[tokio::test]
    async fn unknown_connector_errors_without_panicking() {
        let registry = Registry::new();
        let auth = AuthContext::default();
        let result = registry
            .call("nope", "get_nodes", |c: Arc<dyn Connector>| async move {
                c.get_nodes("alice", &auth).await
            })
            .await;
        assert!(result.is_err());
    }
}
