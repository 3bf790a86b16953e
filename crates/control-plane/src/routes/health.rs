//! `GET /health` — spec §6: 200 text if the experiment store and at least
//! one connector are healthy, 503 otherwise. No auth required.

use axum::{extract::State, http::StatusCode};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if let Err(err) = state.store.health().await {
        tracing::warn!(error = %err, "health check: experiment store unreachable");
        return (StatusCode::SERVICE_UNAVAILABLE, "store unreachable");
    }

    if state.registry.names().is_empty() {
        tracing::warn!("health check: no connectors registered");
        return (StatusCode::SERVICE_UNAVAILABLE, "no connectors registered");
    }

    (StatusCode::OK, "ok")
}
