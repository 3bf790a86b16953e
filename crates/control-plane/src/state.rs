//! The orchestrator's application state: the connector registry, the
//! experiment store, per-experiment advisory locks, the auth/compilation
//! collaborator seams, and the live Watcher task handles. Built once at
//! startup and cloned (cheaply, behind `Arc`s) into every request handler,
//! mirroring the teacher's `AppState` shape.

use std::sync::Arc;

use anyhow::{Context, Result};
use connectors::{LocalConnector, RestConnector};
use dashmap::DashMap;
use orchestration_core::connector::Registry;
use orchestration_core::model::ExperimentId;
use store::{InMemoryExperimentStore, PostgresExperimentStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::auth::{AuthBackend, StaticAuthBackend};
use crate::compilation::{CompilationWorker, StubCompilationWorker};
use crate::config::AppConfig;
use crate::gateway_client::GatewayClient;

pub use store::ExperimentStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub registry: Arc<Registry>,
    pub store: Arc<dyn ExperimentStore>,
    pub locks: Arc<DashMap<ExperimentId, Arc<Mutex<()>>>>,
    pub auth_backend: Arc<dyn AuthBackend>,
    pub compilation_worker: Arc<dyn CompilationWorker>,
    pub gateway: GatewayClient,
    pub watchers: Arc<DashMap<ExperimentId, JoinHandle<()>>>,
}

impl AppState {
    pub async fn try_new(config: &AppConfig) -> Result<Self> {
        let store: Arc<dyn ExperimentStore> = if let Some(namespace) = config.database.url.strip_prefix("memory://") {
            tracing::warn!(namespace, "using in-memory experiment store; data does not survive a restart");
            InMemoryExperimentStore::shared()
        } else {
            Arc::new(
                PostgresExperimentStore::connect(&config.database.url, config.database.max_connections)
                    .await
                    .context("connect to experiment store")?,
            )
        };

        let registry = Arc::new(Registry::new());
        for (name, connector_config) in &config.connectors {
            let connector: Arc<dyn orchestration_core::connector::Connector> = match connector_config.kind.as_str() {
                "local" => {
                    let interpreter_binary = connector_config
                        .properties
                        .get("interpreter_binary")
                        .cloned()
                        .unwrap_or_else(|| "netunicorn-interpreter".to_string());
                    Arc::new(LocalConnector::new(name.clone(), &config.gateway.endpoint, interpreter_binary))
                }
                "rest" => {
                    let base_url = connector_config
                        .properties
                        .get("base_url")
                        .cloned()
                        .ok_or_else(|| anyhow::anyhow!("connector '{name}' of kind 'rest' is missing a base_url property"))?;
                    Arc::new(RestConnector::new(name.clone(), base_url))
                }
                other => anyhow::bail!("unknown connector kind '{other}' for connector '{name}'"),
            };
            connector.initialize().await.with_context(|| format!("initialize connector '{name}'"))?;
            registry.register(connector);
        }

        Ok(Self {
            config: Arc::new(config.clone()),
            registry,
            store,
            locks: Arc::new(DashMap::new()),
            auth_backend: Arc::new(StaticAuthBackend::new(std::env::var("NETUNICORN_AUTH_TOKEN").ok())),
            compilation_worker: Arc::new(StubCompilationWorker),
            gateway: GatewayClient::new(&config.gateway.endpoint),
            watchers: Arc::new(DashMap::new()),
        })
    }

    /// Returns this experiment's advisory lock, creating it on first use.
    /// Status transitions are serialized per-experiment; nothing else is
    /// guarded by it.
    pub fn experiment_lock(&self, experiment_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(experiment_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
