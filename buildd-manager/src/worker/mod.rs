//! Worker client construction
//!
//! Scanners ask a `WorkerFactory` for a fresh handle on every tick, built
//! from that tick's vitals, so a builder whose URL or VM host changed is
//! picked up without restarting its scanner.

use buildd_client::{ClientError, Worker, WorkerClient};
use buildd_core::domain::builder::BuilderVitals;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ScanResult;

#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeWorker, FakeWorkerFactory};

pub trait WorkerFactory: Send + Sync {
    fn worker_for(&self, vitals: &BuilderVitals) -> ScanResult<Arc<dyn Worker>>;
}

/// Builds `WorkerClient`s sharing one HTTP connection pool
pub struct HttpWorkerFactory {
    client: Client,
    timeout: Duration,
    resume_command: String,
}

impl HttpWorkerFactory {
    pub fn new(timeout: Duration, resume_command: impl Into<String>) -> ScanResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from)?;
        Ok(Self {
            client,
            timeout,
            resume_command: resume_command.into(),
        })
    }
}

impl WorkerFactory for HttpWorkerFactory {
    fn worker_for(&self, vitals: &BuilderVitals) -> ScanResult<Arc<dyn Worker>> {
        let worker = WorkerClient::with_client(
            vitals.url.clone(),
            vitals.vm_host.clone(),
            self.timeout,
            self.client.clone(),
        )
        .with_resume_command(self.resume_command.clone());
        Ok(Arc::new(worker))
    }
}
