use anyhow::{Context, Result};
use async_trait::async_trait;
use orchestration_core::model::{Experiment, ExperimentStatus};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, Pool, Postgres};

use crate::ExperimentStore;

pub type ExperimentPool = Pool<Postgres>;

pub struct PostgresExperimentStore {
    pool: ExperimentPool,
}

impl PostgresExperimentStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .with_context(|| format!("connect to {database_url}"))?;

        pool.execute(
            r#"
            CREATE TABLE IF NOT EXISTS experiments (
                experiment_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                started_at TIMESTAMPTZ,
                keep_alive_timeout_secs BIGINT NOT NULL,
                cleaned_up BOOLEAN NOT NULL DEFAULT FALSE,
                error TEXT,
                body JSONB NOT NULL,
                UNIQUE (owner, name)
            );
            "#,
        )
        .await?;

        pool.execute(
            r#"
            CREATE TABLE IF NOT EXISTS executors (
                executor_id TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL REFERENCES experiments(experiment_id),
                node_name TEXT NOT NULL,
                connector TEXT NOT NULL,
                finished BOOLEAN NOT NULL DEFAULT FALSE,
                error TEXT,
                last_seen TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .await?;

        pool.execute(
            r#"
            CREATE TABLE IF NOT EXISTS compilations (
                compilation_key TEXT PRIMARY KEY,
                experiment_id TEXT NOT NULL REFERENCES experiments(experiment_id),
                status TEXT NOT NULL,
                artifact_ref TEXT
            );
            "#,
        )
        .await?;

        pool.execute(
            r#"
            CREATE TABLE IF NOT EXISTS locks (
                lock_key TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at TIMESTAMPTZ NOT NULL
            );
            "#,
        )
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl ExperimentStore for PostgresExperimentStore {
    async fn insert(&self, experiment: &Experiment) -> Result<()> {
        let body = serde_json::to_value(experiment).context("serialize experiment")?;
        sqlx::query(
            r#"
            INSERT INTO experiments
                (experiment_id, owner, name, status, created_at, started_at, keep_alive_timeout_secs, cleaned_up, error, body)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            ON CONFLICT (experiment_id) DO NOTHING
            "#,
        )
        .bind(&experiment.experiment_id)
        .bind(&experiment.owner)
        .bind(&experiment.name)
        .bind(experiment.status.as_str())
        .bind(experiment.created_at)
        .bind(experiment.started_at)
        .bind(experiment.keep_alive_timeout_secs)
        .bind(experiment.cleaned_up)
        .bind(&experiment.error)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, owner: &str, name: &str) -> Result<Option<Experiment>> {
        let row: Option<(serde_json::Value,)> = sqlx::query_as(
            "SELECT body FROM experiments WHERE owner = $1 AND name = $2",
        )
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(body,)| serde_json::from_value(body)).transpose()?)
    }

    async fn get_by_id(&self, experiment_id: &str) -> Result<Option<Experiment>> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM experiments WHERE experiment_id = $1")
                .bind(experiment_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(body,)| serde_json::from_value(body)).transpose()?)
    }

    async fn health(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<Experiment>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM experiments WHERE owner = $1")
                .bind(owner)
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(body,)| serde_json::from_value(body).context("deserialize experiment"))
            .collect()
    }

    async fn list_running(&self) -> Result<Vec<Experiment>> {
        let rows: Vec<(serde_json::Value,)> =
            sqlx::query_as("SELECT body FROM experiments WHERE status = $1")
                .bind(ExperimentStatus::Running.as_str())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(body,)| serde_json::from_value(body).context("deserialize experiment"))
            .collect()
    }

    async fn update(&self, experiment: &Experiment) -> Result<()> {
        let body = serde_json::to_value(experiment).context("serialize experiment")?;
        sqlx::query(
            r#"
            UPDATE experiments SET
                status = $2, started_at = $3, cleaned_up = $4, error = $5, body = $6
            WHERE experiment_id = $1
            "#,
        )
        .bind(&experiment.experiment_id)
        .bind(experiment.status.as_str())
        .bind(experiment.started_at)
        .bind(experiment.cleaned_up)
        .bind(&experiment.error)
        .bind(body)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_for_cleanup(&self) -> Result<Vec<Experiment>> {
        let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
            r#"
            UPDATE experiments
            SET cleaned_up = TRUE
            WHERE cleaned_up = FALSE AND status IN ($1, $2)
            RETURNING body
            "#,
        )
        .bind(ExperimentStatus::Finished.as_str())
        .bind(ExperimentStatus::Unknown.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(body,)| serde_json::from_value(body).context("deserialize experiment"))
            .collect()
    }
}
