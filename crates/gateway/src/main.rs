//! The executor-facing HTTP surface in front of the Blackboard (spec §6):
//! `GET /executor/graph`, `POST /executor/result`,
//! `GET /executor/heartbeat/:executor_id`, plus an internal query surface
//! the control plane's Watcher uses to observe the same Blackboard from a
//! separate process (`/internal/blackboard/...`). The gateway itself holds
//! no experiment-shaped state; it is a thin HTTP front for
//! `orchestration_core::blackboard`.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use orchestration_core::blackboard::{Blackboard, InMemoryBlackboard};
use orchestration_core::{Config, ConfigLoader, TelemetryOptions};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
struct AppState {
    blackboard: Arc<dyn Blackboard>,
}

fn graph_key(executor_id: &str) -> String {
    format!("graph:{executor_id}")
}

fn heartbeat_key(executor_id: &str) -> String {
    format!("heartbeat:{executor_id}")
}

fn result_key(executor_id: &str) -> String {
    format!("result:{executor_id}")
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = orchestration_core::init_telemetry(TelemetryOptions::default());

    let config = ConfigLoader::load(None)?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let state = AppState {
        blackboard: Arc::new(InMemoryBlackboard::new()),
    };

    let app = build_router(state, &config);

    info!(%addr, "gateway listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn build_router(state: AppState, _config: &Config) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/executor/graph", get(get_graph))
        .route("/executor/result", post(post_result))
        .route("/executor/heartbeat/:executor_id", get(get_heartbeat))
        .route("/internal/blackboard/graph/:executor_id", put(put_graph))
        .route(
            "/internal/blackboard/heartbeat/:executor_id",
            get(internal_get_heartbeat),
        )
        .route(
            "/internal/blackboard/result/:executor_id",
            get(internal_get_result),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        if let Ok(mut stream) = signal(SignalKind::terminate()) {
            stream.recv().await;
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

async fn health() -> &'static str {
    "ok"
}

#[derive(Debug, Deserialize)]
struct GraphQuery {
    executor_id: String,
}

/// `LOOKING_FOR_GRAPH`'s network leg: the interpreter polls this until the
/// orchestrator has pushed a graph for its executor_id, or gives up per its
/// own backoff schedule.
async fn get_graph(State(state): State<AppState>, Query(query): Query<GraphQuery>) -> Response {
    match state.blackboard.get(&graph_key(&query.executor_id)).await {
        Some(bytes) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            bytes,
        )
            .into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn put_graph(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
    body: axum::body::Bytes,
) -> StatusCode {
    state
        .blackboard
        .set(graph_key(&executor_id), body.to_vec(), None)
        .await;
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct ReportResultRequest {
    executor_id: String,
    results: serde_json::Value,
    #[serde(default)]
    log_tail: String,
    #[serde(default)]
    #[allow(dead_code)]
    state: Option<String>,
}

/// What the Blackboard holds for a finished executor: the interpreter's
/// outcome verbatim, plus its `log_tail`. Mirrors the `(outcome, log_tail)`
/// REPORTING contract of spec §4.1.
#[derive(Debug, Serialize, Deserialize)]
struct StoredResult {
    outcome: serde_json::Value,
    log_tail: String,
}

/// `REPORTING`'s destination: the interpreter's final `(outcome, log_tail)`
/// upload. `state` is accepted but unused here — the Watcher, not the
/// gateway, is what decides whether an experiment transitions, by reading
/// this result back out.
async fn post_result(
    State(state): State<AppState>,
    Json(request): Json<ReportResultRequest>,
) -> StatusCode {
    let stored = StoredResult { outcome: request.results, log_tail: request.log_tail };
    let Ok(bytes) = serde_json::to_vec(&stored) else {
        return StatusCode::BAD_REQUEST;
    };
    state
        .blackboard
        .set(result_key(&request.executor_id), bytes, None)
        .await;
    info!(executor_id = %request.executor_id, "result recorded");
    StatusCode::OK
}

async fn get_heartbeat(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
) -> StatusCode {
    let Ok(bytes) = serde_json::to_vec(&Utc::now()) else {
        return StatusCode::INTERNAL_SERVER_ERROR;
    };
    state
        .blackboard
        .set(heartbeat_key(&executor_id), bytes, None)
        .await;
    StatusCode::OK
}

#[derive(Serialize)]
struct HeartbeatResponse {
    last_seen: DateTime<Utc>,
}

async fn internal_get_heartbeat(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
) -> Response {
    match state.blackboard.get(&heartbeat_key(&executor_id)).await {
        Some(bytes) => match serde_json::from_slice::<DateTime<Utc>>(&bytes) {
            Ok(last_seen) => Json(HeartbeatResponse { last_seen }).into_response(),
            Err(err) => {
                warn!(executor_id, error = %err, "malformed heartbeat entry");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Serialize)]
struct ResultResponse {
    results: serde_json::Value,
}

async fn internal_get_result(
    State(state): State<AppState>,
    Path(executor_id): Path<String>,
) -> Response {
    match state.blackboard.get(&result_key(&executor_id)).await {
        Some(bytes) => match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(results) => Json(ResultResponse { results }).into_response(),
            Err(err) => {
                warn!(executor_id, error = %err, "malformed result entry");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            blackboard: Arc::new(InMemoryBlackboard::new()),
        }
    }

    #[tokio::test]
    async fn graph_not_yet_available_returns_204() {
        let state = test_state();
        let app = Router::new()
            .route("/executor/graph", get(get_graph))
            .with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/executor/graph?executor_id=missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn pushed_graph_is_retrievable() {
        let state = test_state();
        state
            .blackboard
            .set(graph_key("exec-1"), b"{\"name\":\"g\"}".to_vec(), None)
            .await;

        let app = Router::new()
            .route("/executor/graph", get(get_graph))
            .with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/executor/graph?executor_id=exec-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn heartbeat_then_internal_lookup_roundtrips() {
        let state = test_state();
        state
            .blackboard
            .set(heartbeat_key("exec-1"), serde_json::to_vec(&Utc::now()).unwrap(), None)
            .await;

        let app = Router::new()
            .route(
                "/internal/blackboard/heartbeat/:executor_id",
                get(internal_get_heartbeat),
            )
            .with_state(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/internal/blackboard/heartbeat/exec-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn posted_result_carries_log_tail_through_internal_lookup() {
        let state = test_state();
        let app = Router::new()
            .route("/executor/result", post(post_result))
            .route("/internal/blackboard/result/:executor_id", get(internal_get_result))
            .with_state(state);

        let body = serde_json::json!({
            "executor_id": "exec-1",
            "results": {"status": "success", "results": {}},
            "log_tail": "[a] stdout: ok\n",
        });
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/executor/result")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_vec(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/internal/blackboard/result/exec-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["results"]["log_tail"], "[a] stdout: ok\n");
        assert_eq!(value["results"]["outcome"]["status"], "success");
    }
}
