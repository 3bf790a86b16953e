//! The process-wide Cleanup Watchdog: a single 5-minute tick that claims
//! every `FINISHED`/`UNKNOWN` experiment not yet cleaned up and tears down
//! its connector-side resources. `claim_for_cleanup` flips `cleaned_up`
//! before any connector is called, so a crash mid-cleanup never causes a
//! double cleanup on the next tick.

use std::collections::HashMap;

use orchestration_core::model::Deployment;
use tracing::{info, warn};

use crate::state::AppState;

const TICK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(err) = run_once(&state).await {
                warn!(error = %err, "cleanup watchdog tick failed");
            }
        }
    })
}

async fn run_once(state: &AppState) -> anyhow::Result<()> {
    let claimed = state.store.claim_for_cleanup().await?;
    if claimed.is_empty() {
        return Ok(());
    }
    info!(count = claimed.len(), "cleanup watchdog claimed experiments");

    for experiment in claimed {
        let mut by_connector: HashMap<String, Vec<Deployment>> = HashMap::new();
        for deployment in &experiment.deployments {
            by_connector
                .entry(deployment.node.connector.clone())
                .or_default()
                .push(deployment.clone());
        }

        for (connector_name, deployments) in by_connector {
            let result = state
                .registry
                .call(&connector_name, "cleanup", |c| {
                    let deployments = deployments.clone();
                    let experiment_id = experiment.experiment_id.clone();
                    async move {
                        c.cleanup(&experiment_id, &deployments).await;
                        Ok(())
                    }
                })
                .await;
            if let Err(err) = result {
                warn!(connector = connector_name, experiment_id = %experiment.experiment_id, error = %err, "cleanup call failed; connector evicted");
            }
        }
    }

    Ok(())
}
