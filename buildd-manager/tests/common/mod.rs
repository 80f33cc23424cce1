//! Shared harness: an in-memory farm with scripted workers and a fake clock

#![allow(dead_code)]

use buildd_core::domain::builder::Builder;
use buildd_core::domain::job::{BuildQueue, BuildStatus, FileRef, JobKind};
use buildd_core::dto::worker::WorkerStatus;
use buildd_manager::behavior::build_cookie;
use buildd_manager::clock::{Clock, FakeClock};
use buildd_manager::factory::DirectBuilderFactory;
use buildd_manager::repository::{MemoryStore, Repositories};
use buildd_manager::scanner::failure::Thresholds;
use buildd_manager::worker::{FakeWorker, FakeWorkerFactory};
use buildd_manager::{ScannerSettings, WorkerScanner};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub struct Farm {
    pub store: Arc<MemoryStore>,
    pub clock: FakeClock,
    pub workers: Arc<FakeWorkerFactory>,
    pub settings: ScannerSettings,
}

impl Farm {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            clock: FakeClock::new(),
            workers: Arc::new(FakeWorkerFactory::new()),
            settings: ScannerSettings {
                scan_interval: Duration::from_secs(15),
                scan_jitter: 0.0,
                cancel_timeout: Duration::from_secs(60),
                thresholds: Thresholds {
                    reset_threshold: 5,
                    reset_failure_threshold: 3,
                },
            },
        }
    }

    pub fn repos(&self) -> Repositories {
        Repositories::from_store(self.store.clone())
    }

    pub fn add_builder(&self, builder: Builder) -> Arc<FakeWorker> {
        let worker = self.workers.worker(&builder.name);
        self.store.add_builder(builder);
        worker
    }

    pub fn scanner(&self, name: &str) -> WorkerScanner {
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        WorkerScanner::new(
            name,
            Arc::new(DirectBuilderFactory::new(self.store.clone(), clock.clone())),
            self.workers.clone(),
            self.repos(),
            clock,
            self.settings,
        )
    }

    /// Put `job` on `builder` as if it had been dispatched, with the worker
    /// building it
    pub fn assign(&self, mut job: BuildQueue, builder: &str) -> Uuid {
        job.builder = Some(builder.to_string());
        job.status = BuildStatus::Building;
        job.date_started = Some(self.clock.now());
        self.workers
            .worker(builder)
            .set_status(WorkerStatus::building(build_cookie(&job)));
        self.store.add_job(job)
    }

    pub fn job(&self, id: Uuid) -> BuildQueue {
        self.store.job(id).expect("job exists")
    }

    pub fn builder(&self, name: &str) -> Builder {
        self.store.builder(name).expect("builder exists")
    }

    pub fn advance(&self, secs: u64) {
        self.clock.advance(Duration::from_secs(secs));
    }
}

pub fn package_job(title: &str) -> BuildQueue {
    BuildQueue::new(JobKind::BinaryPackageBuild, title)
        .with_chroot(FileRef::new("c0ffee", "http://librarian/chroot-amd64.tar.gz"))
        .with_file(
            format!("{}.dsc", title),
            FileRef::new("d5c", format!("http://librarian/{}.dsc", title)),
        )
}
