//! sqlx/Postgres persistence layer for the control plane: the
//! `experiments`, `executors`, `compilations`, and `locks` tables, and an
//! `ExperimentStore` trait with both a Postgres-backed and an in-memory
//! implementation so the control plane can run without a database in tests
//! and local development.

mod memory;
mod postgres;

pub use memory::InMemoryExperimentStore;
pub use postgres::PostgresExperimentStore;

use async_trait::async_trait;
use orchestration_core::model::Experiment;

#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn insert(&self, experiment: &Experiment) -> anyhow::Result<()>;
    async fn get(&self, owner: &str, name: &str) -> anyhow::Result<Option<Experiment>>;
    async fn get_by_id(&self, experiment_id: &str) -> anyhow::Result<Option<Experiment>>;
    /// Cheap reachability check for `GET /health`.
    async fn health(&self) -> anyhow::Result<()>;
    /// Every experiment owned by `owner`, for the cross-experiment
    /// `DELETE /executors` admin call (which addresses executors directly,
    /// not by experiment name).
    async fn list_by_owner(&self, owner: &str) -> anyhow::Result<Vec<Experiment>>;
    /// Every experiment currently `RUNNING`, across all owners. Used once
    /// at startup to re-spawn a Watcher for each in-flight experiment that
    /// lost its in-memory watcher task in a restart.
    async fn list_running(&self) -> anyhow::Result<Vec<Experiment>>;
    async fn update(&self, experiment: &Experiment) -> anyhow::Result<()>;
    /// Atomically claims every `FINISHED`/`UNKNOWN` experiment that has not
    /// yet been cleaned up, flipping `cleaned_up` in the same operation so
    /// two concurrent watchdog ticks never double-clean an experiment.
    async fn claim_for_cleanup(&self) -> anyhow::Result<Vec<Experiment>>;
}
