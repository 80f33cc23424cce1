//! Builder interactor
//!
//! Performs the individual state transitions of one builder against its
//! worker: rescuing a lost worker, folding worker status into the job,
//! dispatching a new job, and the resume-or-disable escalation step. The
//! scanner decides which of these to run on each tick.

use buildd_client::Worker;
use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::{BuildQueue, BuildStatus, FileRef};
use buildd_core::domain::worker::{BuildOutcome, WorkerState};
use buildd_core::dto::worker::{ResumeOutput, WorkerStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::behavior::{BuildBehavior, behavior_for, build_cookie};
use crate::clock::Clock;
use crate::error::{ScanError, ScanResult};
use crate::repository::Repositories;

const ABORTING_LOGTAIL: &str = "Waiting for worker process to be terminated";

pub struct BuilderInteractor {
    repos: Repositories,
    clock: Arc<dyn Clock>,
}

impl BuilderInteractor {
    pub fn new(repos: Repositories, clock: Arc<dyn Clock>) -> Self {
        Self { repos, clock }
    }

    /// Reconcile a worker holding something other than the expected build
    ///
    /// Returns `true` if the worker was lost. The caller resets the job.
    pub async fn rescue_if_lost(
        &self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
        status: &WorkerStatus,
        expected_cookie: Option<&str>,
    ) -> ScanResult<bool> {
        let actual = status.cookie();
        if actual == expected_cookie {
            return Ok(false);
        }

        info!(
            "Builder {} is lost: worker is {} with {:?}, expected {:?}",
            vitals.name, status.builder_status, actual, expected_cookie
        );

        match status.builder_status {
            WorkerState::Waiting => {
                worker.clean().await?;
                info!("Cleaned unexpected build {:?} on {}", actual, vitals.name);
            }
            WorkerState::Building => {
                worker.abort().await?;
                info!("Aborted unexpected build {:?} on {}", actual, vitals.name);
            }
            // Already terminating, or holding nothing at all
            WorkerState::Aborting | WorkerState::Idle => {}
        }

        Ok(true)
    }

    /// Fold the worker's status into the job it is running
    pub async fn update_build(
        &self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
        status: &WorkerStatus,
    ) -> ScanResult<()> {
        let Some(job) = &vitals.build_queue else {
            return Ok(());
        };
        let cookie = build_cookie(job);

        match status.builder_status {
            WorkerState::Building => {
                if let Some(logtail) = &status.logtail {
                    self.repos.queue.update_logtail(job.id, logtail).await?;
                }
                debug!("Build {} still running on {}", cookie, vitals.name);
            }
            WorkerState::Aborting => {
                self.repos
                    .queue
                    .update_logtail(job.id, ABORTING_LOGTAIL)
                    .await?;
            }
            WorkerState::Waiting => {
                let outcome = status.build_status.ok_or_else(|| {
                    ScanError::BuildDaemon(format!(
                        "{} is WAITING on {} without a build status",
                        vitals.name, cookie
                    ))
                })?;
                if let Some(logtail) = &status.logtail {
                    self.repos.queue.update_logtail(job.id, logtail).await?;
                }
                self.handle_outcome(vitals, job, &cookie, outcome).await?;
                worker.clean().await?;
            }
            WorkerState::Idle => {
                return Err(ScanError::BuildDaemon(format!(
                    "{} is IDLE but should be running {}",
                    vitals.name, cookie
                )));
            }
        }

        Ok(())
    }

    async fn handle_outcome(
        &self,
        vitals: &BuilderVitals,
        job: &BuildQueue,
        cookie: &str,
        outcome: BuildOutcome,
    ) -> ScanResult<()> {
        info!("Build {} on {} finished: {}", cookie, vitals.name, outcome);

        let status = match outcome {
            BuildOutcome::Ok => BuildStatus::FullyBuilt,
            BuildOutcome::PackageFail => BuildStatus::FailedToBuild,
            BuildOutcome::DepFail => BuildStatus::ManualDepWait,
            BuildOutcome::ChrootFail => BuildStatus::ChrootWait,
            BuildOutcome::BuilderFail => {
                warn!("Disabling {}: worker reported BUILDERFAIL", vitals.name);
                self.repos
                    .builders
                    .fail_builder(&vitals.name, "Builder returned BUILDERFAIL when asked for its status")
                    .await?;
                self.repos.queue.reset(job.id).await?;
                return Ok(());
            }
            BuildOutcome::GivenBack => {
                info!("Build {} given back, returning it to the queue", cookie);
                self.repos.queue.reset(job.id).await?;
                return Ok(());
            }
            BuildOutcome::Aborted if job.status == BuildStatus::Cancelling => BuildStatus::Cancelled,
            BuildOutcome::Aborted => {
                info!("Build {} aborted without a cancel request, requeueing", cookie);
                self.repos.queue.reset(job.id).await?;
                return Ok(());
            }
        };

        self.repos.status.update_status(job.id, status).await?;
        Ok(())
    }

    /// Dispatch the best pending job to an idle builder
    ///
    /// Returns the dispatched job, or `None` if there was nothing to do.
    /// On failure the candidate goes back to the queue before the error is
    /// returned.
    pub async fn find_and_start_job(
        &self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
    ) -> ScanResult<Option<BuildQueue>> {
        let Some(candidate) = self
            .repos
            .queue
            .acquire_candidate(vitals.virtualized, &vitals.processors)
            .await?
        else {
            debug!("No build candidates available for builder {}", vitals.name);
            return Ok(None);
        };

        let behavior = behavior_for(candidate.clone());
        if let Err(e) = behavior.verify(vitals) {
            self.fail_unbuildable(&candidate, vitals, &e).await?;
            return Ok(None);
        }

        let started = self.clock.now();
        if !self
            .repos
            .queue
            .mark_as_building(candidate.id, &vitals.name, started)
            .await?
        {
            debug!(
                "Job {} was claimed by another builder before {}",
                behavior.build_cookie(),
                vitals.name
            );
            return Ok(None);
        }

        if let Err(e) = self.start_build(vitals, worker, behavior.as_ref()).await {
            if matches!(e, ScanError::CannotBuild(_)) {
                self.fail_unbuildable(&candidate, vitals, &e).await?;
                return Ok(None);
            }
            warn!(
                "Dispatching {} to {} failed, returning it to the queue: {}",
                behavior.build_cookie(),
                vitals.name,
                e
            );
            self.repos.queue.reset(candidate.id).await?;
            return Err(e);
        }

        Ok(self.repos.queue.find_by_id(candidate.id).await?)
    }

    /// Fail a job that no builder can run; the builder is not to blame
    async fn fail_unbuildable(
        &self,
        job: &BuildQueue,
        vitals: &BuilderVitals,
        error: &ScanError,
    ) -> ScanResult<()> {
        warn!(
            "Failing {}: it cannot be built on {}: {}",
            build_cookie(job),
            vitals.name,
            error
        );
        self.repos
            .status
            .update_status(job.id, BuildStatus::FailedToBuild)
            .await?;
        Ok(())
    }

    async fn start_build(
        &self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
        behavior: &dyn BuildBehavior,
    ) -> ScanResult<()> {
        let cookie = behavior.build_cookie();
        info!("Dispatching {} to {}", cookie, vitals.name);

        if vitals.virtualized {
            self.resume_worker_host(vitals, worker).await?;
            worker.echo("ping").await?;
        }

        let request = behavior.compose_build_request()?;
        if let Some(chroot) = &request.chroot {
            ensure_present(vitals, worker, chroot).await?;
        }
        for file in request.files.values() {
            ensure_present(vitals, worker, file).await?;
        }

        let response = worker.build(&cookie, &request).await?;
        if response.status != WorkerState::Building {
            return Err(ScanError::BuildDaemon(format!(
                "{} refused to build {}: {} {}",
                vitals.name, cookie, response.status, response.info
            )));
        }

        info!("Build {} started on {}", cookie, vitals.name);
        Ok(())
    }

    /// Power-cycle a virtual builder's worker
    pub async fn resume_worker_host(
        &self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
    ) -> ScanResult<ResumeOutput> {
        if !vitals.virtualized {
            return Err(ScanError::CannotResumeHost(format!(
                "Builder {} is not virtualized",
                vitals.name
            )));
        }
        if vitals.vm_host.is_none() {
            return Err(ScanError::CannotResumeHost(format!(
                "Builder {} has no vm_host",
                vitals.name
            )));
        }

        info!("Resuming {} ({})", vitals.name, vitals.url);
        let output = worker
            .resume()
            .await
            .map_err(|e| ScanError::CannotResumeHost(e.to_string()))?;
        debug!("Resumed {}: {}", vitals.name, output.stdout.trim());
        Ok(output)
    }

    /// Escalation step: resume a virtual builder, disable a real one
    pub async fn reset_or_fail(
        &self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
        error: &ScanError,
    ) -> ScanResult<()> {
        if vitals.virtualized {
            if error.is_resume_failure() {
                warn!(
                    "Not resuming {} again after a failed resume: {}",
                    vitals.name, error
                );
                return Ok(());
            }
            warn!("Resetting builder {}: {}", vitals.url, error);
            self.resume_worker_host(vitals, worker).await?;
        } else {
            warn!("Disabling builder {}: {}", vitals.url, error);
            self.repos
                .builders
                .fail_builder(&vitals.name, &error.to_string())
                .await?;
        }
        Ok(())
    }
}

async fn ensure_present(
    vitals: &BuilderVitals,
    worker: &dyn Worker,
    file: &FileRef,
) -> ScanResult<()> {
    let response = worker.ensure_present(file).await?;
    if !response.present {
        return Err(ScanError::CannotFetchFile {
            url: file.url.clone(),
            info: format!("{} on {}", response.info, vitals.name),
        });
    }
    Ok(())
}
