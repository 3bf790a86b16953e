use anyhow::Result;
use axum::Router;
use control_plane::state::AppState;
use control_plane::telemetry::init_tracing;
use control_plane::{cleanup, config, routes, watcher};
use orchestration_core::model::ExperimentStatus;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load(None)?;
    init_tracing(&config)?;

    let state = AppState::try_new(&config).await?;
    resume_running_watchers(&state).await;
    cleanup::spawn(state.clone());

    let app: Router = routes::build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "control plane listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| {
            error!(error = %err, "server shutdown with error");
            err
        })?;

    Ok(())
}

/// Crash recovery: any experiment already `RUNNING` when this process
/// starts has no live Watcher task, since those only exist in-memory.
/// Re-spawn one for each so an orchestrator restart doesn't strand running
/// experiments forever in `RUNNING`.
async fn resume_running_watchers(state: &AppState) {
    let running = match state.store.list_running().await {
        Ok(running) => running,
        Err(err) => {
            error!(error = %err, "failed to list running experiments during startup recovery");
            Vec::new()
        }
    };
    for experiment in running {
        debug_assert_eq!(experiment.status, ExperimentStatus::Running);
        info!(experiment_id = %experiment.experiment_id, "resuming watcher after restart");
        watcher::spawn(state.clone(), experiment.experiment_id);
    }
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
