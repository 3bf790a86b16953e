//! Thin HTTP client for the gateway's executor-facing endpoints
//! (`/executor/graph`, `/executor/result`, `/executor/heartbeat/:id`).

use orchestration_core::graph::ExecutionGraph;
use reqwest::StatusCode;
use serde::Serialize;

#[derive(Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    executor_id: String,
    experiment_id: String,
}

#[derive(Serialize)]
struct ReportResultBody<'a> {
    executor_id: &'a str,
    results: &'a serde_json::Value,
    /// Tail of the interpreter's captured task stdout/stderr, for
    /// troubleshooting a failed run (spec §4.1 REPORTING's `log_tail`).
    log_tail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

impl GatewayClient {
    pub fn new(base_url: &str, executor_id: &str, experiment_id: &str) -> anyhow::Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            executor_id: executor_id.to_string(),
            experiment_id: experiment_id.to_string(),
        })
    }

    pub async fn fetch_graph(&self) -> anyhow::Result<Option<ExecutionGraph>> {
        let url = format!("{}/executor/graph", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("executor_id", self.executor_id.as_str())])
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let graph = response.json::<ExecutionGraph>().await?;
                Ok(Some(graph))
            }
            status => Err(anyhow::anyhow!("gateway returned unexpected status {status} for graph fetch")),
        }
    }

    pub async fn send_heartbeat(&self) -> anyhow::Result<()> {
        let url = format!("{}/executor/heartbeat/{}", self.base_url, self.executor_id);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("gateway returned {} for heartbeat", response.status()));
        }
        Ok(())
    }

    pub async fn report_result(&self, results: &serde_json::Value, log_tail: &str) -> anyhow::Result<()> {
        let url = format!("{}/executor/result", self.base_url);
        let body = ReportResultBody {
            executor_id: &self.executor_id,
            results,
            log_tail,
            state: Some("finished"),
        };
        let response = self.client.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("gateway returned {} for result upload", response.status()));
        }
        Ok(())
    }

    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }
}
