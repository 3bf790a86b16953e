//! One background task per running experiment, polling the Blackboard
//! (via the gateway) every ~30s: refreshes each live executor's liveness,
//! declares silent executors dead, and transitions the experiment to
//! `FINISHED` once every executor has a result slot. Structured like the
//! teacher's `SessionService::start_session` background task: acquire
//! bookkeeping, loop, remove itself from the live-task map on completion.

use chrono::Utc;
use orchestration_core::model::{Deployment, ExperimentStatus};
use tracing::{info, warn};

use crate::state::AppState;

const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub fn spawn(state: AppState, experiment_id: String) {
    let handle = tokio::spawn(watch(state.clone(), experiment_id.clone()));
    state.watchers.insert(experiment_id, handle);
}

/// What one poll of a running experiment's Blackboard state accomplished.
/// Split out from the loop in [`watch`] so a single poll can be driven
/// directly (without waiting on [`POLL_INTERVAL`]) in tests.
#[derive(Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// The experiment finished this tick; the caller should stop polling.
    Finished,
    /// At least one executor's state changed, but the experiment is still running.
    Progressed,
    /// Nothing changed this tick.
    Idle,
    /// The experiment could not be loaded, or is no longer `RUNNING`; the
    /// caller should stop polling.
    Stopped,
}

/// Refreshes every unfinished executor's liveness for one experiment and
/// persists any change. Declares an executor dead if the Blackboard has no
/// fresh heartbeat for it, transitions the experiment to `FINISHED` once
/// every executor has a result slot.
pub async fn tick(state: &AppState, experiment_id: &str) -> TickOutcome {
    let Ok(Some(mut experiment)) = state.store.get_by_id(experiment_id).await else {
        warn!(experiment_id, "watcher could not load experiment; stopping");
        return TickOutcome::Stopped;
    };
    if experiment.status != ExperimentStatus::Running {
        return TickOutcome::Stopped;
    }

    let keep_alive = chrono::Duration::seconds(experiment.keep_alive_timeout_secs);
    let mut changed = false;

    for deployment in experiment.deployments.iter_mut() {
        if deployment.finished {
            continue;
        }

        if let Ok(Some(results)) = state.gateway.fetch_result(&deployment.executor_id).await {
            deployment.mark_finished_with_result(results);
            changed = true;
            continue;
        }

        match state.gateway.fetch_heartbeat(&deployment.executor_id).await {
            Ok(Some(last_seen)) if Utc::now() - last_seen <= keep_alive => {}
            _ => {
                info!(executor_id = %deployment.executor_id, "executor silent past keep-alive timeout");
                deployment.mark_finished_with_error("not responding");
                orchestration_core::metrics::record_watcher_timeout(&deployment.node.connector);
                changed = true;
            }
        }
    }

    if experiment.all_executors_finished() {
        experiment.results = Some(rollup_results(&experiment.deployments));
        if experiment.transition(ExperimentStatus::Finished).is_ok() {
            if let Err(err) = state.store.update(&experiment).await {
                warn!(experiment_id, error = %err, "failed to persist finished experiment");
            }
            info!(experiment_id, "experiment finished");
            return TickOutcome::Finished;
        }
    } else if changed {
        if let Err(err) = state.store.update(&experiment).await {
            warn!(experiment_id, error = %err, "failed to persist watcher progress");
        }
        return TickOutcome::Progressed;
    }

    TickOutcome::Idle
}

/// Rolls every deployment's `(outcome, log_tail)` report up into the
/// experiment-wide verdict spec §4.1 asks for: `Success` once every
/// deployment finished without an error and reported a successful outcome,
/// `Failure` otherwise. A deployment that never reported (connector fault,
/// silence timeout) counts as a failure.
fn rollup_results(deployments: &[Deployment]) -> serde_json::Value {
    let executors: std::collections::HashMap<String, serde_json::Value> = deployments
        .iter()
        .map(|d| {
            let entry = match (&d.result, &d.error) {
                (Some(result), _) => result.clone(),
                (None, Some(reason)) => serde_json::json!({"error": reason}),
                (None, None) => serde_json::Value::Null,
            };
            (d.executor_id.clone(), entry)
        })
        .collect();

    let all_succeeded = deployments.iter().all(|d| {
        d.error.is_none()
            && d.result
                .as_ref()
                .and_then(|r| r.get("outcome"))
                .and_then(|o| o.get("status"))
                .and_then(|s| s.as_str())
                == Some("success")
    });

    serde_json::json!({
        "status": if all_succeeded { "success" } else { "failure" },
        "executors": executors,
    })
}

async fn watch(state: AppState, experiment_id: String) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if matches!(tick(&state, &experiment_id).await, TickOutcome::Finished | TickOutcome::Stopped) {
            break;
        }
    }

    state.watchers.remove(&experiment_id);
}
