//! The on-node Graph Interpreter: a short-lived process deployed by a
//! connector, which finds its execution graph, runs it wave by wave with
//! one OS process per task, and reports the consolidated result map back
//! to the gateway.
//!
//! State machine: `LOOKING_FOR_GRAPH -> EXECUTING -> REPORTING -> FINISHED`.
//! Ported from `netunicorn-executor/executor.py`'s state machine and its
//! `backoff_func` retry schedule.

mod backoff;
mod state;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use orchestration_core::graph::{ExecutionGraph, GraphInterpreter};
use orchestration_core::model::ExecutionOutcome;
use orchestration_core::process::{ProcessRunnerConfig, ProcessTaskRunner};
use orchestration_core::{InterpreterError, TelemetryOptions};
use tracing::{info, warn};

use state::GatewayClient;

const LOCAL_GRAPH_FILE: &str = "execution_graph.bin";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "netunicorn-interpreter", about = "On-node execution graph interpreter")]
struct Cli {
    /// Overrides the gateway endpoint; defaults to the GATEWAY_ENDPOINT env var.
    #[arg(long)]
    gateway_endpoint: Option<String>,
    /// Overrides the executor id; defaults to the EXECUTOR_ID env var.
    #[arg(long)]
    executor_id: Option<String>,
    /// Overrides the experiment id; defaults to the EXPERIMENT_ID env var.
    #[arg(long)]
    experiment_id: Option<String>,
    /// Directory to look for / write `execution_graph.bin` in.
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,
}

fn env_or_arg(arg: Option<String>, var: &str) -> anyhow::Result<String> {
    arg.or_else(|| std::env::var(var).ok())
        .ok_or_else(|| anyhow::anyhow!("missing required {var} (env var or --{})", var.to_lowercase().replace('_', "-")))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = orchestration_core::init_telemetry(TelemetryOptions::default());
    let cli = Cli::parse();

    let gateway_endpoint = env_or_arg(cli.gateway_endpoint, "GATEWAY_ENDPOINT")?;
    let executor_id = env_or_arg(cli.executor_id, "EXECUTOR_ID")?;
    let experiment_id = std::env::var("EXPERIMENT_ID")
        .ok()
        .or(cli.experiment_id)
        .unwrap_or_default();

    info!(executor_id = %executor_id, gateway = %gateway_endpoint, "interpreter starting");

    let client = GatewayClient::new(&gateway_endpoint, &executor_id, &experiment_id)?;

    // LOOKING_FOR_GRAPH
    let graph = looking_for_graph(&client, &cli.work_dir).await?;

    // EXECUTING
    let heartbeat_handle = tokio::spawn({
        let client = client.clone();
        async move { heartbeat_loop(client).await }
    });
    let runner = ProcessTaskRunner::new(ProcessRunnerConfig::default());
    let results = GraphInterpreter::run(&graph, &runner).await;
    heartbeat_handle.abort();

    // REPORTING
    if graph.report_results {
        let outcome = ExecutionOutcome::from_results(results);
        let outcome = serde_json::to_value(&outcome).unwrap_or(serde_json::Value::Null);
        report_results(&client, outcome, runner.log_tail()).await?;
    } else {
        info!("graph has report_results = false; skipping upload");
    }

    info!("interpreter finished");
    Ok(())
}

async fn looking_for_graph(client: &GatewayClient, work_dir: &PathBuf) -> anyhow::Result<ExecutionGraph> {
    let local_path = work_dir.join(LOCAL_GRAPH_FILE);
    if let Ok(bytes) = tokio::fs::read(&local_path).await {
        match serde_json::from_slice::<ExecutionGraph>(&bytes) {
            Ok(graph) => {
                info!(path = %local_path.display(), "found execution graph on local disk");
                graph.validate()?;
                return Ok(graph);
            }
            Err(err) => warn!(error = %err, "local execution graph file is malformed, falling back to gateway"),
        }
    }

    let mut schedule = backoff::Backoff::new(Duration::from_millis(500), Duration::from_secs(24 * 60));
    loop {
        match client.fetch_graph().await {
            Ok(Some(graph)) => {
                graph.validate()?;
                return Ok(graph);
            }
            Ok(None) => {
                let delay = schedule.next_delay();
                info!(delay_ms = delay.as_millis() as u64, "graph not yet available, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                let delay = schedule.next_delay();
                warn!(error = %err, delay_ms = delay.as_millis() as u64, "failed to reach gateway for graph, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn heartbeat_loop(client: GatewayClient) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(err) = client.send_heartbeat().await {
            warn!(error = %err, "heartbeat failed");
        }
    }
}

async fn report_results(client: &GatewayClient, outcome: serde_json::Value, log_tail: String) -> anyhow::Result<()> {
    let mut schedule = backoff::Backoff::new(Duration::from_millis(500), Duration::from_secs(24 * 60));
    let mut attempts_without_success = 0u32;
    loop {
        match client.report_result(&outcome, &log_tail).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                attempts_without_success += 1;
                if attempts_without_success > 10 {
                    return Err(InterpreterError::ReportFailed(err.to_string()).into());
                }
                let delay = schedule.next_delay();
                warn!(error = %err, delay_ms = delay.as_millis() as u64, "failed to report results, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestration_core::graph::{Edge, EdgeKind, ROOT_NODE};
    use orchestration_core::model::{Task, TaskResult};

    struct AlwaysSucceeds;

    #[async_trait::async_trait]
    impl orchestration_core::graph::TaskRunner for AlwaysSucceeds {
        async fn run(&self, _task: &Task) -> TaskResult {
            TaskResult::Success { output: serde_json::json!({"ok": true}) }
        }
    }

    #[tokio::test]
    async fn running_a_linear_graph_produces_one_result_per_task() {
        let mut graph = ExecutionGraph::new(true, true);
        graph.add_task("a", Task::new("a", b"true".to_vec()));
        graph.add_task("b", Task::new("b", b"true".to_vec()));
        graph.add_edge(Edge { from: ROOT_NODE.into(), to: "a".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        graph.add_edge(Edge { from: "a".into(), to: "b".into(), kind: EdgeKind::Strong, counter: None, traverse_on: None });
        graph.validate().unwrap();

        let results = GraphInterpreter::run(&graph, &AlwaysSucceeds).await;
        assert_eq!(results.get("a").unwrap().len(), 1);
        assert_eq!(results.get("b").unwrap().len(), 1);
    }
}
