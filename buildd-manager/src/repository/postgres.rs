//! Postgres-backed collaborators

use async_trait::async_trait;
use buildd_core::domain::builder::Builder;
use buildd_core::domain::job::{BuildQueue, BuildStatus};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    BuilderRepository, QueueRepository, StatusSink, StoreError, StoreResult, builder_repository,
    queue_repository,
};

/// Store implementing every collaborator trait on one connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl BuilderRepository for PgStore {
    /// Both reads share one snapshot, so a job is never paired with a
    /// builder state from a different moment
    async fn list_with_jobs(&self) -> StoreResult<Vec<(Builder, Option<BuildQueue>)>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;
        let builders = builder_repository::list_all(&mut *tx).await?;
        let assigned = queue_repository::list_assigned(&mut *tx).await?;
        tx.commit().await?;

        let mut jobs: HashMap<String, BuildQueue> = assigned
            .into_iter()
            .filter_map(|job| job.builder.clone().map(|name| (name, job)))
            .collect();

        Ok(builders
            .into_iter()
            .map(|builder| {
                let job = jobs.remove(&builder.name);
                (builder, job)
            })
            .collect())
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<Builder>> {
        Ok(builder_repository::find_by_name(&self.pool, name).await?)
    }

    async fn current_job(&self, name: &str) -> StoreResult<Option<BuildQueue>> {
        Ok(queue_repository::find_by_builder(&self.pool, name).await?)
    }

    async fn got_failure(&self, name: &str) -> StoreResult<u32> {
        builder_repository::increment_failure_count(&self.pool, name)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("builder {}", name)))
    }

    async fn reset_failure_count(&self, name: &str) -> StoreResult<()> {
        if !builder_repository::reset_failure_count(&self.pool, name).await? {
            return Err(StoreError::NotFound(format!("builder {}", name)));
        }
        Ok(())
    }

    async fn fail_builder(&self, name: &str, notes: &str) -> StoreResult<()> {
        if !builder_repository::fail(&self.pool, name, notes).await? {
            return Err(StoreError::NotFound(format!("builder {}", name)));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for PgStore {
    async fn find_by_id(&self, job_id: Uuid) -> StoreResult<Option<BuildQueue>> {
        Ok(queue_repository::find_by_id(&self.pool, job_id).await?)
    }

    async fn acquire_candidate(
        &self,
        virtualized: bool,
        processors: &[String],
    ) -> StoreResult<Option<BuildQueue>> {
        Ok(queue_repository::find_candidate(&self.pool, virtualized, processors).await?)
    }

    async fn mark_as_building(
        &self,
        job_id: Uuid,
        builder: &str,
        started: DateTime<Utc>,
    ) -> StoreResult<bool> {
        Ok(queue_repository::update_to_building(&self.pool, job_id, builder, started).await?)
    }

    async fn reset(&self, job_id: Uuid) -> StoreResult<()> {
        if !queue_repository::reset(&self.pool, job_id).await? {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    async fn update_logtail(&self, job_id: Uuid, logtail: &str) -> StoreResult<()> {
        if !queue_repository::update_logtail(&self.pool, job_id, logtail).await? {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        Ok(())
    }

    async fn job_got_failure(&self, job_id: Uuid) -> StoreResult<u32> {
        queue_repository::increment_failure_count(&self.pool, job_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", job_id)))
    }
}

#[async_trait]
impl StatusSink for PgStore {
    async fn update_status(&self, job_id: Uuid, status: BuildStatus) -> StoreResult<()> {
        if !queue_repository::update_status(&self.pool, job_id, status).await? {
            return Err(StoreError::NotFound(format!("job {}", job_id)));
        }
        tracing::debug!("Job {} is now {}", job_id, status);
        Ok(())
    }
}
