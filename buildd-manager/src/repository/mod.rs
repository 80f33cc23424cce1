//! Repository Module
//!
//! Data access layer for the manager. The scanner core only sees the three
//! collaborator traits below:
//! - `BuilderRepository`: the builder registry, keyed by builder name
//! - `QueueRepository`: the build queue and job assignment
//! - `StatusSink`: where build status transitions are recorded
//!
//! `PgStore` implements them on Postgres; `MemoryStore` in process memory.
//! Every mutating call is applied on its own, so one builder's failed
//! update never rolls back another's.

pub mod builder;
pub mod memory;
pub mod postgres;
pub mod queue;

// Re-export for convenience
pub use builder as builder_repository;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use queue as queue_repository;

use async_trait::async_trait;
use buildd_core::domain::builder::Builder;
use buildd_core::domain::job::{BuildQueue, BuildStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Persistence error type
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Builder registry
#[async_trait]
pub trait BuilderRepository: Send + Sync {
    /// All builders with the job each one holds, in one bulk read
    async fn list_with_jobs(&self) -> StoreResult<Vec<(Builder, Option<BuildQueue>)>>;

    /// Point lookup of a builder
    async fn find_by_name(&self, name: &str) -> StoreResult<Option<Builder>>;

    /// The job currently held by the builder
    async fn current_job(&self, name: &str) -> StoreResult<Option<BuildQueue>>;

    /// Increment the builder's failure count, returning the new value
    async fn got_failure(&self, name: &str) -> StoreResult<u32>;

    async fn reset_failure_count(&self, name: &str) -> StoreResult<()>;

    /// Disable the builder, recording why
    async fn fail_builder(&self, name: &str, notes: &str) -> StoreResult<()>;
}

/// Build queue
#[async_trait]
pub trait QueueRepository: Send + Sync {
    async fn find_by_id(&self, job_id: Uuid) -> StoreResult<Option<BuildQueue>>;

    /// Highest-priority pending job a builder with these capabilities can run
    async fn acquire_candidate(
        &self,
        virtualized: bool,
        processors: &[String],
    ) -> StoreResult<Option<BuildQueue>>;

    /// Assign a pending job to `builder` and start it
    ///
    /// Returns `false` if another builder claimed the job first.
    async fn mark_as_building(
        &self,
        job_id: Uuid,
        builder: &str,
        started: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Unassign the job and return it to the queue as NEEDSBUILD
    ///
    /// A CANCELLING job is never requeued: it becomes CANCELLED instead.
    async fn reset(&self, job_id: Uuid) -> StoreResult<()>;

    async fn update_logtail(&self, job_id: Uuid, logtail: &str) -> StoreResult<()>;

    /// Increment the job's failure count, returning the new value
    async fn job_got_failure(&self, job_id: Uuid) -> StoreResult<u32>;
}

/// Recorder of build status transitions
#[async_trait]
pub trait StatusSink: Send + Sync {
    /// Record a new status; terminal statuses release the job from its builder
    async fn update_status(&self, job_id: Uuid, status: BuildStatus) -> StoreResult<()>;
}

/// Handles on the three collaborators, usually backed by one store
#[derive(Clone)]
pub struct Repositories {
    pub builders: Arc<dyn BuilderRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub status: Arc<dyn StatusSink>,
}

impl Repositories {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: BuilderRepository + QueueRepository + StatusSink + 'static,
    {
        Self {
            builders: store.clone(),
            queue: store.clone(),
            status: store,
        }
    }
}
