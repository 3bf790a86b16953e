//! How the Watcher learns Blackboard state even though the Blackboard
//! lives inside the separate `gateway` process: a small HTTP client
//! against internal query endpoints the gateway exposes alongside its
//! executor-facing surface. Not part of the representative HTTP table in
//! the external interface spec, which only enumerates the executor-facing
//! and user-facing routes — this is the plumbing that lets a
//! cross-process Watcher observe them.

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct HeartbeatResponse {
    last_seen: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ResultResponse {
    results: serde_json::Value,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch_heartbeat(&self, executor_id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let url = format!("{}/internal/blackboard/heartbeat/{executor_id}", self.base_url);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                Ok(Some(response.json::<HeartbeatResponse>().await?.last_seen))
            }
            status => anyhow::bail!("gateway returned {status} for heartbeat lookup"),
        }
    }

    pub async fn fetch_result(&self, executor_id: &str) -> anyhow::Result<Option<serde_json::Value>> {
        let url = format!("{}/internal/blackboard/result/{executor_id}", self.base_url);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json::<ResultResponse>().await?.results)),
            status => anyhow::bail!("gateway returned {status} for result lookup"),
        }
    }

    /// Publishes a deployment's serialized execution graph to the
    /// Blackboard ahead of `execute`, so the on-node interpreter's
    /// `LOOKING_FOR_GRAPH` poll of `/executor/graph` finds it.
    pub async fn push_graph(&self, executor_id: &str, graph: &serde_json::Value) -> anyhow::Result<()> {
        let url = format!("{}/internal/blackboard/graph/{executor_id}", self.base_url);
        let response = self.client.put(&url).json(graph).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("gateway returned {} for graph push", response.status());
        }
        Ok(())
    }
}
