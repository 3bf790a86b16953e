//! The orchestrator's user-facing experiment verbs (spec §4.3, §6):
//! `prepare`, `start`, status lookup, and the two cancellation entry
//! points. Mirrors the teacher's session-route shape — thin handlers that
//! validate, delegate to a collaborator (`store`, `registry`,
//! `compilation_worker`), and map domain errors through `AppError`.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Json, http::StatusCode};
use orchestration_core::connector::{CancelContext, DeployContext, ExecContext, ExecutorOutcome, StopTarget};
use orchestration_core::graph::ExecutionGraph;
use orchestration_core::model::{Deployment, Experiment, ExperimentStatus};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compilation::{CompilationJob, CompilationOutcome};
use crate::error::AppError;
use crate::state::AppState;
use crate::watcher;

#[derive(Debug, Deserialize)]
pub struct PrepareRequest {
    pub owner: String,
    #[serde(default = "default_keep_alive")]
    pub keep_alive_timeout_secs: i64,
    pub deployments: Vec<DeploymentRequest>,
}

fn default_keep_alive() -> i64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentRequest {
    pub node: orchestration_core::model::Node,
    pub graph: serde_json::Value,
    pub environment_definition: orchestration_core::model::EnvironmentDefinition,
}

/// `POST /experiment/{name}/prepare` — idempotent by `(owner, name)`.
pub async fn prepare_experiment(
    State(state): State<AppState>,
    Path(name): Path<String>,
    auth: crate::auth::AuthenticatedUser,
    Json(request): Json<PrepareRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Some(existing) = state.store.get(&request.owner, &name).await? {
        return Ok((StatusCode::OK, existing.experiment_id));
    }

    let mut experiment = Experiment::new(&name, &request.owner, request.keep_alive_timeout_secs);
    experiment.transition(ExperimentStatus::Preparing)?;

    experiment.deployments = request
        .deployments
        .into_iter()
        .map(|d| Deployment::new(d.node, d.graph, d.environment_definition))
        .collect();

    state.store.insert(&experiment).await?;

    let lock = state.experiment_lock(&experiment.experiment_id);
    let _guard = lock.lock().await;

    run_compilation(&state, &mut experiment).await;
    run_deploy(&state, &mut experiment, &auth.auth_ctx).await;
    experiment.transition(ExperimentStatus::Ready)?;
    state.store.update(&experiment).await?;

    info!(experiment_id = %experiment.experiment_id, owner = %request.owner, name, "experiment prepared");
    Ok((StatusCode::CREATED, experiment.experiment_id))
}

/// Deduplicates deployments by `(environment_definition, graph, architecture)`
/// into compilation jobs, running each exactly once and broadcasting its
/// outcome to every deployment that shares the key. A job failure marks its
/// deployments finished with the compilation error rather than failing the
/// whole prepare call.
async fn run_compilation(state: &AppState, experiment: &mut Experiment) {
    let mut jobs: HashMap<String, CompilationJob> = HashMap::new();
    for deployment in &experiment.deployments {
        let key = compilation_key(deployment);
        jobs.entry(key).or_insert_with(|| CompilationJob {
            environment_definition: deployment.environment_definition.clone(),
            graph: deployment.graph.clone(),
            architecture: deployment.node.architecture,
        });
    }

    let mut outcomes = HashMap::with_capacity(jobs.len());
    for (key, job) in jobs {
        let outcome = match validate_job_graph(&job.graph) {
            Ok(()) => state.compilation_worker.compile(&job).await,
            Err(reason) => CompilationOutcome::Failure { reason },
        };
        outcomes.insert(key, outcome);
    }

    for deployment in experiment.deployments.iter_mut() {
        let key = compilation_key(deployment);
        match outcomes.get(&key) {
            Some(CompilationOutcome::Success { .. }) => deployment.prepared = true,
            Some(CompilationOutcome::Failure { reason }) => {
                deployment.mark_finished_with_error(format!("compilation failed: {reason}"));
            }
            None => deployment.mark_finished_with_error("compilation job missing"),
        }
    }
}

fn compilation_key(deployment: &Deployment) -> String {
    format!(
        "{:?}|{}|{:?}",
        deployment.environment_definition, deployment.graph, deployment.node.architecture
    )
}

/// Deserializes and validates a deployment's submitted graph synchronously,
/// at prepare time, so a malformed graph is rejected before `READY` rather
/// than discovered later by a connector or the on-node interpreter (spec
/// §7's graph-validation error taxonomy entry).
fn validate_job_graph(graph: &serde_json::Value) -> Result<(), String> {
    let graph: ExecutionGraph =
        serde_json::from_value(graph.clone()).map_err(|err| format!("malformed execution graph: {err}"))?;
    graph.validate().map_err(|err| format!("invalid execution graph: {err}"))
}

/// Fans `deploy` out to every connector with at least one compiled-but-
/// undeployed deployment, mirroring the `execute` fan-out in
/// `start_execution`: group by connector, call `deploy` per group, map
/// per-executor outcomes back onto `prepared`/`finished`. Only a deployment
/// whose connector both accepted the group and reported `Ok` for it stays
/// `prepared` into the `READY` transition; a missing connector or a
/// connector-wide fault marks just that connector's deployments finished
/// with an error, the same isolation `start_execution` gives `execute`.
async fn run_deploy(state: &AppState, experiment: &mut Experiment, auth_ctx: &orchestration_core::connector::AuthContext) {
    let mut by_connector: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, deployment) in experiment.deployments.iter().enumerate() {
        if deployment.prepared && !deployment.finished {
            by_connector.entry(deployment.node.connector.clone()).or_default().push(index);
        }
    }

    let deploy_ctx = DeployContext { keep_alive_timeout_secs: experiment.keep_alive_timeout_secs };
    let owner = experiment.owner.clone();
    let experiment_id = experiment.experiment_id.clone();

    for (connector_name, indexes) in &by_connector {
        let deployments: Vec<Deployment> = indexes.iter().map(|&i| experiment.deployments[i].clone()).collect();
        let result = state
            .registry
            .call(connector_name, "deploy", |c| {
                let deployments = deployments.clone();
                let experiment_id = experiment_id.clone();
                let owner = owner.clone();
                let deploy_ctx = deploy_ctx.clone();
                let auth_ctx = auth_ctx.clone();
                async move { c.deploy(&owner, &experiment_id, &deployments, &deploy_ctx, &auth_ctx).await }
            })
            .await;

        match result {
            Ok(outcomes) => {
                for &index in indexes {
                    let deployment = &mut experiment.deployments[index];
                    match outcomes.get(&deployment.executor_id) {
                        Some(ExecutorOutcome::Ok) => {}
                        Some(ExecutorOutcome::Error(reason)) => {
                            deployment.prepared = false;
                            deployment.mark_finished_with_error(reason.clone());
                        }
                        None => {
                            deployment.prepared = false;
                            deployment.mark_finished_with_error("connector did not report a deploy outcome");
                        }
                    }
                }
            }
            Err(err) => {
                warn!(connector = connector_name, error = %err, "deploy fan-out failed; marking deployments as connector fault");
                for &index in indexes {
                    experiment.deployments[index].prepared = false;
                    experiment.deployments[index].mark_finished_with_error("connector unavailable");
                }
            }
        }
    }
}

/// `POST /experiment/{name}/start` — fans `execute` out to every connector
/// with at least one ready deployment, per the fan-out algorithm in spec
/// §4.3: group by connector, verify liveness up front, execute per group,
/// mark per-executor failures, push each deployment's graph to the
/// Blackboard, then spawn the Watcher and flip the experiment to RUNNING.
pub async fn start_execution(
    State(state): State<AppState>,
    Path(name): Path<String>,
    owner: OwnerQuery,
) -> Result<impl IntoResponse, AppError> {
    let mut experiment = state
        .store
        .get(&owner.0, &name)
        .await?
        .ok_or_else(|| orchestration_core::OrchestratorError::ExperimentNotFound(name.clone()))?;

    let lock = state.experiment_lock(&experiment.experiment_id);
    let _guard = lock.lock().await;

    if experiment.status != ExperimentStatus::Ready {
        return Err(orchestration_core::OrchestratorError::InvalidTransition(
            experiment.status.as_str().to_string(),
            ExperimentStatus::Running.as_str().to_string(),
        )
        .into());
    }

    let mut by_connector: HashMap<String, Vec<usize>> = HashMap::new();
    for (index, deployment) in experiment.deployments.iter().enumerate() {
        if deployment.prepared && !deployment.finished {
            by_connector
                .entry(deployment.node.connector.clone())
                .or_default()
                .push(index);
        }
    }

    for connector_name in by_connector.keys() {
        if state.registry.get(connector_name).is_none() {
            return Err(AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("connector '{connector_name}' is not registered"),
            ));
        }
    }

    let auth_ctx = owner.1;
    let exec_ctx = ExecContext;
    for (connector_name, indexes) in &by_connector {
        let deployments: Vec<Deployment> = indexes.iter().map(|&i| experiment.deployments[i].clone()).collect();
        let result = state
            .registry
            .call(connector_name, "execute", |c| {
                let deployments = deployments.clone();
                let experiment_id = experiment.experiment_id.clone();
                let owner = owner.0.clone();
                let auth_ctx = auth_ctx.clone();
                async move { c.execute(&owner, &experiment_id, &deployments, &exec_ctx, &auth_ctx).await }
            })
            .await;

        match result {
            Ok(outcomes) => {
                for &index in indexes {
                    let deployment = &mut experiment.deployments[index];
                    match outcomes.get(&deployment.executor_id) {
                        Some(ExecutorOutcome::Ok) => {
                            if let Err(err) = state.gateway.push_graph(&deployment.executor_id, &deployment.graph).await {
                                warn!(executor_id = %deployment.executor_id, error = %err, "failed to push graph to gateway");
                                deployment.mark_finished_with_error(err.to_string());
                            }
                        }
                        Some(ExecutorOutcome::Error(reason)) => deployment.mark_finished_with_error(reason.clone()),
                        None => deployment.mark_finished_with_error("connector did not report an outcome"),
                    }
                }
            }
            Err(err) => {
                warn!(connector = connector_name, error = %err, "execute fan-out failed; marking executors as connector fault");
                for &index in indexes {
                    experiment.deployments[index].mark_finished_with_error("connector unavailable");
                }
            }
        }
    }

    experiment.started_at = Some(chrono::Utc::now());
    experiment.transition(ExperimentStatus::Running)?;
    state.store.update(&experiment).await?;
    watcher::spawn(state.clone(), experiment.experiment_id.clone());

    info!(experiment_id = %experiment.experiment_id, "experiment started");
    Ok((StatusCode::OK, experiment.experiment_id))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Experiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<serde_json::Value>,
}

/// `GET /experiment/{name}` — `get_experiment_status`.
pub async fn get_experiment(
    State(state): State<AppState>,
    Path(name): Path<String>,
    owner: OwnerQuery,
) -> Result<impl IntoResponse, AppError> {
    let experiment = state
        .store
        .get(&owner.0, &name)
        .await?
        .ok_or_else(|| orchestration_core::OrchestratorError::ExperimentNotFound(name.clone()))?;

    Ok(Json(StatusResponse {
        status: experiment.status.as_str().to_string(),
        results: experiment.results.clone(),
        experiment: Some(experiment),
    }))
}

/// `DELETE /experiment/{name}` — `cancel_experiment`: stop every
/// not-yet-finished executor of this experiment.
pub async fn cancel_experiment(
    State(state): State<AppState>,
    Path(name): Path<String>,
    owner: OwnerQuery,
) -> Result<impl IntoResponse, AppError> {
    let experiment = state
        .store
        .get(&owner.0, &name)
        .await?
        .ok_or_else(|| orchestration_core::OrchestratorError::ExperimentNotFound(name.clone()))?;

    let targets: Vec<Deployment> = experiment.deployments.iter().filter(|d| !d.finished).cloned().collect();
    stop_targets(&state, &owner.0, &owner.1, targets).await;

    Ok((StatusCode::OK, "cancellation requested"))
}

#[derive(Debug, Deserialize)]
pub struct CancelExecutorsRequest {
    pub owner: String,
    pub executor_ids: Vec<String>,
}

/// `DELETE /executors` — `cancel_executors`: addresses executors directly
/// rather than by experiment name, so it scans every experiment owned by
/// the caller.
pub async fn cancel_executors(
    State(state): State<AppState>,
    auth: crate::auth::AuthenticatedUser,
    Json(request): Json<CancelExecutorsRequest>,
) -> Result<impl IntoResponse, AppError> {
    let requested: std::collections::HashSet<&str> = request.executor_ids.iter().map(String::as_str).collect();
    let experiments = state.store.list_by_owner(&request.owner).await?;

    let mut targets = Vec::new();
    for experiment in experiments {
        for deployment in experiment.deployments.into_iter() {
            if requested.contains(deployment.executor_id.as_str()) && !deployment.finished {
                targets.push(deployment);
            }
        }
    }

    stop_targets(&state, &request.owner, &auth.auth_ctx, targets).await;
    Ok((StatusCode::OK, "cancellation requested"))
}

async fn stop_targets(
    state: &AppState,
    user: &str,
    auth_ctx: &orchestration_core::connector::AuthContext,
    deployments: Vec<Deployment>,
) {
    let mut by_connector: HashMap<String, Vec<StopTarget>> = HashMap::new();
    for deployment in deployments {
        by_connector.entry(deployment.node.connector.clone()).or_default().push(StopTarget {
            executor_id: deployment.executor_id,
            node: deployment.node,
        });
    }

    let ctx = CancelContext;
    for (connector_name, targets) in by_connector {
        let result = state
            .registry
            .call(&connector_name, "stop_executors", |c| {
                let targets = targets.clone();
                let user = user.to_string();
                let auth_ctx = auth_ctx.clone();
                async move { c.stop_executors(&user, &targets, &ctx, &auth_ctx).await }
            })
            .await;
        if let Err(err) = result {
            warn!(connector = connector_name, error = %err, "stop_executors failed; connector evicted");
        }
    }
}

/// `GET /nodes/{user}` — fans `get_nodes` out across every registered
/// connector, tagging the pool with whichever connectors answered.
pub async fn list_nodes(
    State(state): State<AppState>,
    Path(user): Path<String>,
    auth: crate::auth::AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let mut pool = Vec::new();
    for connector_name in state.registry.names() {
        let auth_ctx = auth.auth_ctx.clone();
        let result = state
            .registry
            .call(&connector_name, "get_nodes", |c| {
                let user = user.clone();
                async move { c.get_nodes(&user, &auth_ctx).await }
            })
            .await;
        match result {
            Ok(nodes) => pool.extend(nodes),
            Err(err) => warn!(connector = connector_name, error = %err, "get_nodes failed; connector evicted"),
        }
    }
    Ok(Json(orchestration_core::model::NodePool::Countable { nodes: pool }))
}

/// Extracts `?owner=` from the query string alongside the forwarded
/// [`AuthenticatedUser`]'s [`AuthContext`], for handlers that need both.
pub struct OwnerQuery(pub String, pub orchestration_core::connector::AuthContext);

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for OwnerQuery
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(query) =
            axum::extract::Query::<HashMap<String, String>>::from_request_parts(parts, state)
                .await
                .map_err(|err| AppError::new(StatusCode::BAD_REQUEST, err.to_string()))?;
        let owner = query
            .get("owner")
            .cloned()
            .ok_or_else(|| AppError::new(StatusCode::BAD_REQUEST, "missing ?owner= query parameter"))?;
        let auth = crate::auth::AuthenticatedUser::from_request_parts(parts, state).await?;
        Ok(OwnerQuery(owner, auth.auth_ctx))
    }
}
