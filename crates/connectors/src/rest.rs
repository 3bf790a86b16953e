//! A connector that forwards every capability-set call over HTTP to a
//! remote agent process, mirroring the reference REST connector's URL
//! scheme (`POST /deploy/:user/:experiment_id`, etc).

use std::collections::HashMap;

use async_trait::async_trait;
use orchestration_core::connector::{
    AuthContext, CancelContext, Connector, DeployContext, ExecContext, ExecutorOutcome, StopTarget,
};
use orchestration_core::model::{Deployment, ExecutorId, ExperimentId, Node};
use serde::{Deserialize, Serialize};

pub struct RestConnector {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl RestConnector {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[derive(Deserialize)]
struct HealthBody {
    status: String,
}

#[derive(Serialize)]
struct StopExecutorRequestBody<'a> {
    executor_id: &'a str,
    node_name: &'a str,
}

/// Per-executor result the way the remote agent reports it: `None` means
/// success, `Some(message)` carries the failure reason.
type RemoteOutcomes = HashMap<ExecutorId, Option<String>>;

fn to_outcomes(remote: RemoteOutcomes) -> HashMap<ExecutorId, ExecutorOutcome> {
    remote
        .into_iter()
        .map(|(id, err)| {
            let outcome = match err {
                None => ExecutorOutcome::Ok,
                Some(message) => ExecutorOutcome::Error(message),
            };
            (id, outcome)
        })
        .collect()
}

#[async_trait]
impl Connector for RestConnector {
    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.client
            .post(self.url("/initialize"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn health(&self) -> (bool, String) {
        match self.client.get(self.url("/health")).send().await {
            Ok(response) if response.status().is_success() => match response.json::<HealthBody>().await {
                Ok(body) => (true, body.status),
                Err(err) => (false, format!("malformed health response: {err}")),
            },
            Ok(response) => (false, format!("health endpoint returned {}", response.status())),
            Err(err) => (false, format!("health check failed: {err}")),
        }
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.client
            .post(self.url("/shutdown"))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn get_nodes(&self, user: &str, _auth_ctx: &AuthContext) -> anyhow::Result<Vec<Node>> {
        let nodes = self
            .client
            .get(self.url(&format!("/nodes/{user}")))
            .send()
            .await?
            .error_for_status()?
            .json::<Vec<Node>>()
            .await?;
        Ok(nodes)
    }

    async fn deploy(
        &self,
        user: &str,
        experiment_id: &ExperimentId,
        deployments: &[Deployment],
        _ctx: &DeployContext,
        _auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
        let remote: RemoteOutcomes = self
            .client
            .post(self.url(&format!("/deploy/{user}/{experiment_id}")))
            .json(deployments)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(to_outcomes(remote))
    }

    async fn execute(
        &self,
        user: &str,
        experiment_id: &ExperimentId,
        deployments: &[Deployment],
        _ctx: &ExecContext,
        _auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
        let remote: RemoteOutcomes = self
            .client
            .post(self.url(&format!("/execute/{user}/{experiment_id}")))
            .json(deployments)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(to_outcomes(remote))
    }

    async fn stop_executors(
        &self,
        user: &str,
        targets: &[StopTarget],
        _ctx: &CancelContext,
        _auth_ctx: &AuthContext,
    ) -> anyhow::Result<HashMap<ExecutorId, ExecutorOutcome>> {
        let body: Vec<StopExecutorRequestBody> = targets
            .iter()
            .map(|t| StopExecutorRequestBody { executor_id: &t.executor_id, node_name: &t.node.name })
            .collect();
        let remote: RemoteOutcomes = self
            .client
            .post(self.url(&format!("/stop_executors/{user}")))
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(to_outcomes(remote))
    }

    async fn cleanup(&self, _experiment_id: &ExperimentId, _deployments: &[Deployment]) {
        // The remote agent is responsible for its own garbage collection;
        // nothing to do from this side beyond the explicit shutdown call.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path_without_double_slash() {
        let connector = RestConnector::new("rest", "http://agent:9000/");
        assert_eq!(connector.url("/health"), "http://agent:9000/health");
    }
}
