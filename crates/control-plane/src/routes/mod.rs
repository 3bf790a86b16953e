mod experiment;
mod health;

use axum::{Router, middleware, routing::{delete, get, post}};

use crate::state::AppState;

/// Mounts the full orchestrator HTTP surface (spec §6). `/health` is
/// unauthenticated; every user-facing route sits behind
/// `auth::require_auth`'s Basic-auth middleware.
pub fn build_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/nodes/:user", get(experiment::list_nodes))
        .route("/experiment/:name/prepare", post(experiment::prepare_experiment))
        .route("/experiment/:name/start", post(experiment::start_execution))
        .route(
            "/experiment/:name",
            get(experiment::get_experiment).delete(experiment::cancel_experiment),
        )
        .route("/executors", delete(experiment::cancel_executors))
        .route_layer(middleware::from_fn_with_state(state.clone(), crate::auth::require_auth));

    Router::new()
        .route("/health", get(health::health))
        .merge(authenticated)
        .with_state(state)
}
