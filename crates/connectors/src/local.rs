//! An in-process connector that spawns the on-node interpreter binary as a
//! local child process per executor, for development and integration
//! testing without a real infrastructure behind it. Grounded on the
//! reference "dummy" connector, generalized so `deploy`/`execute` actually
//! launch something instead of only logging.

use std::collections::HashMap;
use std::process::Stdio;

use async_trait::async_trait;
use orchestration_core::connector::{
    AuthContext, CancelContext, Connector, DeployContext, ExecContext, ExecutorOutcome, StopTarget,
};
use orchestration_core::model::{Architecture, Deployment, ExecutorId, ExperimentId, Node};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Env vars the reference interpreter binary reads to find its gateway and
/// identify itself, per the connector protocol's deployment contract.
pub const ENV_GATEWAY_ENDPOINT: &str = "GATEWAY_ENDPOINT";
pub const ENV_EXECUTOR_ID: &str = "EXECUTOR_ID";
pub const ENV_EXPERIMENT_ID: &str = "EXPERIMENT_ID";

pub struct LocalConnector {
    name: String,
    gateway_endpoint: String,
    interpreter_binary: String,
    children: dashmap::DashMap<ExecutorId, Child>,
}

impl LocalConnector {
    pub fn new(name: impl Into<String>, gateway_endpoint: impl Into<String>, interpreter_binary: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            gateway_endpoint: gateway_endpoint.into(),
            interpreter_binary: interpreter_binary.into(),
            children: dashmap::DashMap::new(),
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        info!(connector = %self.name, "local connector initialized");
        Ok(())
    }

    async fn health(&self) -> (bool, String) {
        (true, "local connector is always healthy".to_string())
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        for mut entry in self.children.iter_mut() {
            let _ = entry.value_mut().kill().await;
        }
        self.children.clear();
        Ok(())
    }

    async fn get_nodes(&self, _user: &str, _auth_ctx: &AuthContext) -> anyhow::Result<Vec<Node>> {
        let mut node = Node::new("localhost", &self.name);
        node.architecture = Architecture::LinuxAmd64;
        Ok(vec![node])
    }

    async fn deploy(
        &self,
        _user: &str,
        _experiment_id: &ExperimentId,
        deployments: &[Deployment],
        _ctx: &DeployContext,
        _auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
        // Nothing to provision locally; every deployment is immediately prepared.
        Ok(deployments
            .iter()
            .map(|d| (d.executor_id.clone(), ExecutorOutcome::Ok))
            .collect())
    }

    async fn execute(
        &self,
        _user: &str,
        experiment_id: &ExperimentId,
        deployments: &[Deployment],
        _ctx: &ExecContext,
        _auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
        let mut outcomes = HashMap::new();
        for deployment in deployments {
            let spawned = Command::new(&self.interpreter_binary)
                .env(ENV_GATEWAY_ENDPOINT, &self.gateway_endpoint)
                .env(ENV_EXECUTOR_ID, &deployment.executor_id)
                .env(ENV_EXPERIMENT_ID, experiment_id)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(child) => {
                    self.children.insert(deployment.executor_id.clone(), child);
                    outcomes.insert(deployment.executor_id.clone(), ExecutorOutcome::Ok);
                }
                Err(err) => {
                    warn!(executor = %deployment.executor_id, error = %err, "failed to spawn local executor process");
                    outcomes.insert(deployment.executor_id.clone(), ExecutorOutcome::Error(err.to_string()));
                }
            }
        }
        Ok(outcomes)
    }

    async fn stop_executors(
        &self,
        _user: &str,
        targets: &[StopTarget],
        _ctx: &CancelContext,
        _auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
        let mut outcomes = HashMap::new();
        for target in targets {
            if let Some((_, mut child)) = self.children.remove(&target.executor_id) {
                let _ = child.kill().await;
            }
            outcomes.insert(target.executor_id.clone(), ExecutorOutcome::Ok);
        }
        Ok(outcomes)
    }

    async fn cleanup(&self, _experiment_id: &ExperimentId, deployments: &[Deployment]) {
        for deployment in deployments {
            if let Some((_, mut child)) = self.children.remove(&deployment.executor_id) {
                let _ = child.kill().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_nodes_returns_single_localhost_node() {
        let connector = LocalConnector::new("local", "http://gateway:8000", "true");
        let nodes = connector.get_nodes("alice", &AuthContext::default()).await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name, "localhost");
    }

    #[tokio::test]
    async fn deploy_always_succeeds() {
        let connector = LocalConnector::new("local", "http://gateway:8000", "true");
        let deployments = vec![];
        let outcomes = connector
            .deploy("alice", &"exp-1".to_string(), &deployments, &DeployContext::default(), &AuthContext::default())
            .await
            .unwrap();
        assert!(outcomes.is_empty());
    }
}
