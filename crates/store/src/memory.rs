//! In-memory `ExperimentStore`, used in development and exercised by the
//! control plane's integration tests so they don't need a live Postgres.
//! Keyed the same way the Postgres-backed implementation is: a primary map
//! by `experiment_id`, plus a secondary `(owner, name)` index for the
//! idempotent `prepare_experiment` lookup.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use orchestration_core::model::{Experiment, ExperimentStatus};

use crate::ExperimentStore;

#[derive(Default)]
pub struct InMemoryExperimentStore {
    by_id: DashMap<String, Experiment>,
    by_name: DashMap<(String, String), String>,
}

impl InMemoryExperimentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl ExperimentStore for InMemoryExperimentStore {
    async fn insert(&self, experiment: &Experiment) -> anyhow::Result<()> {
        let key = (experiment.owner.clone(), experiment.name.clone());
        if self.by_name.contains_key(&key) {
            return Ok(());
        }
        self.by_name.insert(key, experiment.experiment_id.clone());
        self.by_id
            .insert(experiment.experiment_id.clone(), experiment.clone());
        Ok(())
    }

    async fn get(&self, owner: &str, name: &str) -> anyhow::Result<Option<Experiment>> {
        let Some(id) = self
            .by_name
            .get(&(owner.to_string(), name.to_string()))
            .map(|e| e.value().clone())
        else {
            return Ok(None);
        };
        Ok(self.by_id.get(&id).map(|e| e.value().clone()))
    }

    async fn get_by_id(&self, experiment_id: &str) -> anyhow::Result<Option<Experiment>> {
        Ok(self.by_id.get(experiment_id).map(|e| e.value().clone()))
    }

    async fn health(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> anyhow::Result<Vec<Experiment>> {
        Ok(self
            .by_id
            .iter()
            .filter(|e| e.owner == owner)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn list_running(&self) -> anyhow::Result<Vec<Experiment>> {
        Ok(self
            .by_id
            .iter()
            .filter(|e| e.status == ExperimentStatus::Running)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update(&self, experiment: &Experiment) -> anyhow::Result<()> {
        self.by_id
            .insert(experiment.experiment_id.clone(), experiment.clone());
        Ok(())
    }

    async fn claim_for_cleanup(&self) -> anyhow::Result<Vec<Experiment>> {
        let mut claimed = Vec::new();
        for mut entry in self.by_id.iter_mut() {
            let experiment = entry.value_mut();
            let eligible = !experiment.cleaned_up
                && matches!(
                    experiment.status,
                    ExperimentStatus::Finished | ExperimentStatus::Unknown
                );
            if eligible {
                experiment.cleaned_up = true;
                claimed.push(experiment.clone());
            }
        }
        Ok(claimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_is_idempotent_by_owner_and_name() {
        let store = InMemoryExperimentStore::new();
        let experiment = Experiment::new("probe", "alice", 60);
        store.insert(&experiment).await.unwrap();

        let mut duplicate = Experiment::new("probe", "alice", 60);
        duplicate.name = experiment.name.clone();
        duplicate.owner = experiment.owner.clone();
        store.insert(&duplicate).await.unwrap();

        let fetched = store.get("alice", "probe").await.unwrap().unwrap();
        assert_eq!(fetched.experiment_id, experiment.experiment_id);
    }

    #[tokio::test]
    async fn claim_for_cleanup_is_idempotent() {
        let store = InMemoryExperimentStore::new();
        let mut experiment = Experiment::new("probe", "alice", 60);
        experiment.status = ExperimentStatus::Finished;
        store.insert(&experiment).await.unwrap();

        let first = store.claim_for_cleanup().await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_for_cleanup().await.unwrap();
        assert!(second.is_empty());
    }
}
