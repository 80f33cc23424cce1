//! Per-builder scanner
//!
//! One `WorkerScanner` runs for every builder. Each tick it reads the
//! builder's vitals, then in order:
//!
//! 1. handles a pending cancellation (abort, wait, then force it through),
//! 2. polls the worker and rescues it if it holds an unexpected build,
//! 3. refuses to dispatch to disabled or lost builders,
//! 4. updates the running job, or dispatches a new one.
//!
//! A failed tick bumps the failure counts and runs the failure assessment.
//! Nothing escapes a tick: the loop always reschedules itself.
//!
//! The loop owns its scanner and only schedules the next tick after the
//! current one returns, so a builder is never scanned twice at once.

pub mod failure;

use buildd_client::Worker;
use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::BuildStatus;
use chrono::{DateTime, Utc};
use rand::RngExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::behavior::build_cookie;
use crate::clock::Clock;
use crate::error::{ScanError, ScanResult};
use crate::factory::BuilderFactory;
use crate::interactor::BuilderInteractor;
use crate::repository::Repositories;
use crate::worker::WorkerFactory;
use failure::{BuilderAction, JobAction, Thresholds, assess_failure_counts};

/// Outcome of one scan cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The factory cache had not been refreshed since the last scan
    Skipped,
    Succeeded,
    /// The scan failed and the failure was assessed
    Failed,
    /// The builder is no longer registered and the scanner should stop
    Gone,
}

/// Timing and escalation settings shared by all scanners
#[derive(Debug, Clone, Copy)]
pub struct ScannerSettings {
    pub scan_interval: Duration,
    pub scan_jitter: f64,
    pub cancel_timeout: Duration,
    pub thresholds: Thresholds,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(15),
            scan_jitter: 0.2,
            cancel_timeout: Duration::from_secs(180),
            thresholds: Thresholds::default(),
        }
    }
}

pub struct WorkerScanner {
    builder_name: String,
    factory: Arc<dyn BuilderFactory>,
    workers: Arc<dyn WorkerFactory>,
    repos: Repositories,
    interactor: BuilderInteractor,
    clock: Arc<dyn Clock>,
    settings: ScannerSettings,
    date_cancel: Option<DateTime<Utc>>,
    date_scanned: Option<DateTime<Utc>>,
    /// Cookie of the last job seen, keyed by queue entry and build
    expected_cookie: Option<((Uuid, Uuid), String)>,
}

impl WorkerScanner {
    pub fn new(
        builder_name: impl Into<String>,
        factory: Arc<dyn BuilderFactory>,
        workers: Arc<dyn WorkerFactory>,
        repos: Repositories,
        clock: Arc<dyn Clock>,
        settings: ScannerSettings,
    ) -> Self {
        let interactor = BuilderInteractor::new(repos.clone(), clock.clone());
        Self {
            builder_name: builder_name.into(),
            factory,
            workers,
            repos,
            interactor,
            clock,
            settings,
            date_cancel: None,
            date_scanned: None,
            expected_cookie: None,
        }
    }

    pub fn builder_name(&self) -> &str {
        &self.builder_name
    }

    /// Scan repeatedly until `shutdown` fires
    ///
    /// The first tick is staggered by a random fraction of the interval so
    /// builders started together do not scan in lock-step.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            "Scanning builder {} every {:?}",
            self.builder_name, self.settings.scan_interval
        );

        let mut delay = initial_delay(self.settings.scan_interval, self.settings.scan_jitter);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            // A cycle cut short here is repaired by the next run's lost-worker check
            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.single_cycle() => outcome,
            };
            if outcome == CycleOutcome::Gone {
                info!("Builder {} was removed", self.builder_name);
                break;
            }
            delay = jittered(self.settings.scan_interval, self.settings.scan_jitter);
        }

        info!("Stopped scanning builder {}", self.builder_name);
    }

    /// Run one scan, handling any failure it raises
    pub async fn single_cycle(&mut self) -> CycleOutcome {
        if self.is_cache_stale() {
            debug!("Skipping builder {} (cache out of date)", self.builder_name);
            return CycleOutcome::Skipped;
        }

        let outcome = match self.scan().await {
            Ok(false) => CycleOutcome::Gone,
            Ok(true) => {
                if let Err(e) = self
                    .repos
                    .builders
                    .reset_failure_count(&self.builder_name)
                    .await
                {
                    warn!(
                        "Could not reset failure count of {}: {}",
                        self.builder_name, e
                    );
                }
                CycleOutcome::Succeeded
            }
            Err(e) => {
                self.scan_failed(&e).await;
                CycleOutcome::Failed
            }
        };

        self.date_scanned = Some(self.clock.now());
        outcome
    }

    fn is_cache_stale(&self) -> bool {
        match (self.factory.date_updated(), self.date_scanned) {
            (None, _) => true,
            (Some(updated), Some(scanned)) => scanned > updated,
            (Some(_), None) => false,
        }
    }

    /// Advance the builder by one step
    ///
    /// Returns `false` if the builder is no longer registered.
    pub async fn scan(&mut self) -> ScanResult<bool> {
        let Some(vitals) = self.factory.get_vitals(&self.builder_name).await? else {
            debug!("Builder {} is no longer registered", self.builder_name);
            return Ok(false);
        };
        let worker = self.workers.worker_for(&vitals)?;

        if self.check_cancellation(&vitals, worker.as_ref()).await? {
            return Ok(true);
        }

        let mut lost = false;
        let mut worker_status = None;
        if vitals.builderok {
            let status = worker.status().await?;
            let expected = self.expected_cookie(&vitals);
            lost = self
                .interactor
                .rescue_if_lost(&vitals, worker.as_ref(), &status, expected.as_deref())
                .await?;
            worker_status = Some(status);
        }

        if !vitals.builderok || lost {
            if let Some(job) = &vitals.build_queue {
                let reason = if lost { "is lost" } else { "is disabled" };
                warn!(
                    "Builder {} {}. Resetting job {}",
                    vitals.name,
                    reason,
                    build_cookie(job)
                );
                self.repos.queue.reset(job.id).await?;
            }
            return Ok(true);
        }

        match (&vitals.build_queue, worker_status) {
            (Some(_), Some(status)) => {
                self.interactor
                    .update_build(&vitals, worker.as_ref(), &status)
                    .await?;
            }
            (None, _) if vitals.manual => {
                debug!("{} is in manual mode, not dispatching", vitals.name);
            }
            _ => {
                if let Some(job) = self
                    .interactor
                    .find_and_start_job(&vitals, worker.as_ref())
                    .await?
                {
                    debug!("Dispatched {} to {}", build_cookie(&job), vitals.name);
                }
            }
        }
        Ok(true)
    }

    /// Handle a job the user asked to cancel
    ///
    /// Returns `true` if the job was cancelled and the scan should stop.
    pub async fn check_cancellation(
        &mut self,
        vitals: &BuilderVitals,
        worker: &dyn Worker,
    ) -> ScanResult<bool> {
        let Some(job) = vitals
            .build_queue
            .as_ref()
            .filter(|job| job.status == BuildStatus::Cancelling)
        else {
            self.date_cancel = None;
            return Ok(false);
        };

        let cookie = build_cookie(job);
        let now = self.clock.now();

        let Some(deadline) = self.date_cancel else {
            info!("Cancelling {} on {}", cookie, vitals.name);
            worker.abort().await?;
            self.date_cancel = Some(now + cancel_timeout(self.settings.cancel_timeout));
            return Ok(false);
        };

        if now < deadline {
            info!("Waiting for {} on {} to cancel", cookie, vitals.name);
            return Ok(false);
        }

        if !vitals.virtualized {
            // Cannot be forced; ask again and start a new wait
            warn!(
                "Timeout waiting for {} to cancel on non-virtual builder {}, aborting again",
                cookie, vitals.name
            );
            self.date_cancel = None;
            return Ok(false);
        }

        warn!(
            "Timeout waiting for {} to cancel on {}, resuming",
            cookie, vitals.name
        );
        self.interactor.resume_worker_host(vitals, worker).await?;
        self.repos
            .status
            .update_status(job.id, BuildStatus::Cancelled)
            .await?;
        self.date_cancel = None;
        info!("Cancelled {} on {}", cookie, vitals.name);
        Ok(true)
    }

    /// Cookie the worker should report for the builder's current job
    fn expected_cookie(&mut self, vitals: &BuilderVitals) -> Option<String> {
        let job = vitals.build_queue.as_ref()?;
        let key = (job.id, job.build_id);
        match &self.expected_cookie {
            Some((cached, cookie)) if *cached == key => Some(cookie.clone()),
            _ => {
                let cookie = build_cookie(job);
                self.expected_cookie = Some((key, cookie.clone()));
                Some(cookie)
            }
        }
    }

    async fn scan_failed(&mut self, error: &ScanError) {
        if error.is_expected() {
            warn!("Scanning {} failed: {}", self.builder_name, error);
        } else {
            error!("Scanning {} failed unexpectedly: {:?}", self.builder_name, error);
        }

        if let Err(e) = self.assess_failure(error).await {
            error!(
                "Miserable failure when trying to handle failure of {}: {}",
                self.builder_name, e
            );
        }
    }

    async fn assess_failure(&mut self, error: &ScanError) -> ScanResult<()> {
        let name = self.builder_name.clone();
        let builder_failures = self.repos.builders.got_failure(&name).await?;
        let job = self.repos.builders.current_job(&name).await?;
        let job_failures = match &job {
            Some(job) => Some(self.repos.queue.job_got_failure(job.id).await?),
            None => None,
        };

        let judgement =
            assess_failure_counts(&self.settings.thresholds, builder_failures, job_failures);
        debug!(
            "Failure counts for {}: builder {}, job {:?} -> {:?}",
            name, builder_failures, job_failures, judgement
        );

        if let Some(job) = &job {
            match judgement.job {
                JobAction::None => {}
                JobAction::Reset => {
                    info!("Requeueing {} after failure on {}", build_cookie(job), name);
                    self.repos.queue.reset(job.id).await?;
                }
                JobAction::Fail => {
                    info!(
                        "Failing {}: it failed more often than builder {}",
                        build_cookie(job),
                        name
                    );
                    self.repos
                        .status
                        .update_status(job.id, BuildStatus::FailedToBuild)
                        .await?;
                }
            }
        }

        match judgement.builder {
            BuilderAction::None => {}
            BuilderAction::ResetFailureCount => {
                self.repos.builders.reset_failure_count(&name).await?;
            }
            BuilderAction::ResetOrFail => {
                let Some(builder) = self.repos.builders.find_by_name(&name).await? else {
                    return Ok(());
                };
                let vitals = BuilderVitals::from_builder(&builder, None);
                let worker = self.workers.worker_for(&vitals)?;
                self.interactor
                    .reset_or_fail(&vitals, worker.as_ref(), error)
                    .await?;
            }
            BuilderAction::Disable => {
                warn!(
                    "Disabling builder {} after {} failures: {}",
                    name, builder_failures, error
                );
                self.repos
                    .builders
                    .fail_builder(&name, &error.to_string())
                    .await?;
            }
        }

        Ok(())
    }
}

fn cancel_timeout(timeout: Duration) -> chrono::Duration {
    chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::days(365))
}

/// First delay: a random point within the jitter window
fn initial_delay(interval: Duration, jitter: f64) -> Duration {
    let spread = interval.as_secs_f64() * jitter;
    if spread <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(rand::rng().random_range(0.0..spread))
}

/// Interval shifted by up to `jitter` of itself either way
fn jittered(interval: Duration, jitter: f64) -> Duration {
    let base = interval.as_secs_f64();
    let spread = base * jitter;
    if spread <= 0.0 {
        return interval;
    }
    let offset = rand::rng().random_range(-spread..spread);
    Duration::from_secs_f64((base + offset).max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jitter_stays_in_window() {
        let interval = Duration::from_secs(10);
        for _ in 0..100 {
            let delay = jittered(interval, 0.2);
            assert!(delay >= Duration::from_secs(8) && delay <= Duration::from_secs(12));
            assert!(initial_delay(interval, 0.2) < Duration::from_secs(2));
        }
    }

    #[test]
    fn test_no_jitter() {
        let interval = Duration::from_secs(10);
        assert_eq!(jittered(interval, 0.0), interval);
        assert_eq!(initial_delay(interval, 0.0), Duration::ZERO);
    }
}
