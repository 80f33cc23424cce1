//! In-memory collaborators
//!
//! Keeps the whole registry and queue in process memory. Used by the test
//! suites and for running a manager against a static farm without Postgres.

use async_trait::async_trait;
use buildd_core::domain::builder::{Builder, supports_processor};
use buildd_core::domain::job::{BuildQueue, BuildStatus};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{BuilderRepository, QueueRepository, StatusSink, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    builders: BTreeMap<String, Builder>,
    jobs: Vec<BuildQueue>,
    offline: bool,
}

impl State {
    fn check_online(&self) -> StoreResult<()> {
        if self.offline {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn builder_mut(&mut self, name: &str) -> StoreResult<&mut Builder> {
        self.builders
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(format!("builder {}", name)))
    }

    fn job_mut(&mut self, id: Uuid) -> StoreResult<&mut BuildQueue> {
        self.jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))
    }

    fn job_held_by(&self, name: &str) -> Option<BuildQueue> {
        self.jobs
            .iter()
            .find(|j| j.builder.as_deref() == Some(name))
            .cloned()
    }
}

/// Registry, queue and status sink held in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a builder
    pub fn add_builder(&self, builder: Builder) {
        self.state
            .lock()
            .builders
            .insert(builder.name.clone(), builder);
    }

    /// Unregister a builder, leaving its jobs as they are
    pub fn remove_builder(&self, name: &str) -> Option<Builder> {
        self.state.lock().builders.remove(name)
    }

    /// Queue a job as given, including any builder assignment
    pub fn add_job(&self, job: BuildQueue) -> Uuid {
        let id = job.id;
        self.state.lock().jobs.push(job);
        id
    }

    pub fn builder(&self, name: &str) -> Option<Builder> {
        self.state.lock().builders.get(name).cloned()
    }

    pub fn job(&self, id: Uuid) -> Option<BuildQueue> {
        self.state.lock().jobs.iter().find(|j| j.id == id).cloned()
    }

    /// Every job, in insertion order
    pub fn jobs(&self) -> Vec<BuildQueue> {
        self.state.lock().jobs.clone()
    }

    /// Apply an administrative change to a builder
    pub fn update_builder(&self, name: &str, f: impl FnOnce(&mut Builder)) -> StoreResult<()> {
        let mut state = self.state.lock();
        f(state.builder_mut(name)?);
        Ok(())
    }

    /// Apply an external change to a job, such as a cancellation request
    pub fn update_job(&self, id: Uuid, f: impl FnOnce(&mut BuildQueue)) -> StoreResult<()> {
        let mut state = self.state.lock();
        f(state.job_mut(id)?);
        Ok(())
    }

    /// Make every subsequent call fail as if the database were unreachable
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }
}

#[async_trait]
impl BuilderRepository for MemoryStore {
    async fn list_with_jobs(&self) -> StoreResult<Vec<(Builder, Option<BuildQueue>)>> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state
            .builders
            .values()
            .map(|b| (b.clone(), state.job_held_by(&b.name)))
            .collect())
    }

    async fn find_by_name(&self, name: &str) -> StoreResult<Option<Builder>> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.builders.get(name).cloned())
    }

    async fn current_job(&self, name: &str) -> StoreResult<Option<BuildQueue>> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.job_held_by(name))
    }

    async fn got_failure(&self, name: &str) -> StoreResult<u32> {
        let mut state = self.state.lock();
        state.check_online()?;
        let builder = state.builder_mut(name)?;
        builder.failure_count += 1;
        Ok(builder.failure_count)
    }

    async fn reset_failure_count(&self, name: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        state.builder_mut(name)?.failure_count = 0;
        Ok(())
    }

    async fn fail_builder(&self, name: &str, notes: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        let builder = state.builder_mut(name)?;
        builder.builderok = false;
        builder.failnotes = Some(notes.to_string());
        Ok(())
    }
}

#[async_trait]
impl QueueRepository for MemoryStore {
    async fn find_by_id(&self, job_id: Uuid) -> StoreResult<Option<BuildQueue>> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn acquire_candidate(
        &self,
        virtualized: bool,
        processors: &[String],
    ) -> StoreResult<Option<BuildQueue>> {
        let state = self.state.lock();
        state.check_online()?;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == BuildStatus::NeedsBuild && j.builder.is_none())
            .filter(|j| j.virtualized == virtualized)
            .filter(|j| supports_processor(processors, j.processor.as_deref()))
            .min_by(|a, b| {
                b.lastscore
                    .cmp(&a.lastscore)
                    .then(a.requested_at.cmp(&b.requested_at))
            })
            .cloned())
    }

    async fn mark_as_building(
        &self,
        job_id: Uuid,
        builder: &str,
        started: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut state = self.state.lock();
        state.check_online()?;
        if state.job_held_by(builder).is_some() {
            return Ok(false);
        }
        let job = state.job_mut(job_id)?;
        if job.builder.is_some() || job.status != BuildStatus::NeedsBuild {
            return Ok(false);
        }
        job.builder = Some(builder.to_string());
        job.status = BuildStatus::Building;
        job.date_started = Some(started);
        job.logtail = None;
        Ok(true)
    }

    async fn reset(&self, job_id: Uuid) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        let job = state.job_mut(job_id)?;
        job.builder = None;
        job.logtail = None;
        if job.status == BuildStatus::Cancelling {
            job.status = BuildStatus::Cancelled;
        } else {
            job.status = BuildStatus::NeedsBuild;
            job.date_started = None;
        }
        Ok(())
    }

    async fn update_logtail(&self, job_id: Uuid, logtail: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        state.job_mut(job_id)?.logtail = Some(logtail.to_string());
        Ok(())
    }

    async fn job_got_failure(&self, job_id: Uuid) -> StoreResult<u32> {
        let mut state = self.state.lock();
        state.check_online()?;
        let job = state.job_mut(job_id)?;
        job.failure_count += 1;
        Ok(job.failure_count)
    }
}

#[async_trait]
impl StatusSink for MemoryStore {
    async fn update_status(&self, job_id: Uuid, status: BuildStatus) -> StoreResult<()> {
        let mut state = self.state.lock();
        state.check_online()?;
        let job = state.job_mut(job_id)?;
        job.status = status;
        if status.is_terminal() {
            job.builder = None;
        }
        Ok(())
    }
}
