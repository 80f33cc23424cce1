//! Scripted worker for tests

use async_trait::async_trait;
use buildd_client::{ClientError, Worker};
use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::FileRef;
use buildd_core::domain::worker::WorkerState;
use buildd_core::dto::worker::{
    BuildRequest, BuildResponse, EnsurePresentResponse, ResumeOutput, WorkerInfo, WorkerStatus,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::WorkerFactory;
use crate::error::ScanResult;

#[derive(Debug)]
struct Script {
    status: WorkerStatus,
    fault: Option<String>,
    hang: bool,
    resume_fails: bool,
    resume_times_out: bool,
    refuse_build: bool,
    missing_files: bool,
    calls: Vec<String>,
}

/// In-process worker that follows a script instead of the network
///
/// Behaves like an obedient worker: `build` starts building the given
/// cookie, `abort` moves to ABORTING, `clean` and `resume` return to IDLE.
/// Faults, hangs and refusals can be switched on to drive failure paths.
#[derive(Debug)]
pub struct FakeWorker {
    script: Mutex<Script>,
}

impl FakeWorker {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                status: WorkerStatus::idle(),
                fault: None,
                hang: false,
                resume_fails: false,
                resume_times_out: false,
                refuse_build: false,
                missing_files: false,
                calls: Vec::new(),
            }),
        }
    }

    pub fn set_status(&self, status: WorkerStatus) {
        self.script.lock().status = status;
    }

    pub fn status_now(&self) -> WorkerStatus {
        self.script.lock().status.clone()
    }

    /// Make every call except `resume` answer with a fault
    pub fn set_fault(&self, message: Option<&str>) {
        self.script.lock().fault = message.map(str::to_string);
    }

    /// Make `status` never return
    pub fn set_hang(&self, hang: bool) {
        self.script.lock().hang = hang;
    }

    pub fn set_resume_fails(&self, fails: bool) {
        self.script.lock().resume_fails = fails;
    }

    /// Make `resume` give up as if the power command hung
    pub fn set_resume_times_out(&self, times_out: bool) {
        self.script.lock().resume_times_out = times_out;
    }

    pub fn set_refuse_build(&self, refuse: bool) {
        self.script.lock().refuse_build = refuse;
    }

    pub fn set_missing_files(&self, missing: bool) {
        self.script.lock().missing_files = missing;
    }

    /// Names of the calls received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == method)
            .count()
    }

    /// Record a call and fail it if a fault is scripted
    fn record(&self, method: &str) -> buildd_client::Result<()> {
        let mut script = self.script.lock();
        script.calls.push(method.to_string());
        match &script.fault {
            Some(message) => Err(ClientError::Fault {
                code: 1,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for FakeWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for FakeWorker {
    async fn status(&self) -> buildd_client::Result<WorkerStatus> {
        self.record("status")?;
        let hang = self.script.lock().hang;
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(self.status_now())
    }

    async fn ensure_present(&self, _file: &FileRef) -> buildd_client::Result<EnsurePresentResponse> {
        self.record("ensure_present")?;
        let missing = self.script.lock().missing_files;
        Ok(EnsurePresentResponse {
            present: !missing,
            info: if missing { "404 Not Found".into() } else { String::new() },
        })
    }

    async fn build(&self, cookie: &str, _request: &BuildRequest) -> buildd_client::Result<BuildResponse> {
        self.record("build")?;
        let mut script = self.script.lock();
        if script.refuse_build {
            return Ok(BuildResponse {
                status: WorkerState::Idle,
                info: "unknown builder type".into(),
            });
        }
        script.status = WorkerStatus::building(cookie);
        Ok(BuildResponse {
            status: WorkerState::Building,
            info: String::new(),
        })
    }

    async fn abort(&self) -> buildd_client::Result<()> {
        self.record("abort")?;
        let mut script = self.script.lock();
        if let (WorkerState::Building, Some(cookie)) =
            (script.status.builder_status, script.status.build_id.clone())
        {
            script.status = WorkerStatus::aborting(cookie);
        }
        Ok(())
    }

    async fn clean(&self) -> buildd_client::Result<()> {
        self.record("clean")?;
        self.script.lock().status = WorkerStatus::idle();
        Ok(())
    }

    async fn echo(&self, message: &str) -> buildd_client::Result<String> {
        self.record("echo")?;
        Ok(message.to_string())
    }

    async fn info(&self) -> buildd_client::Result<WorkerInfo> {
        self.record("info")?;
        Ok(WorkerInfo {
            protocol_version: "1.0".into(),
            arch: vec!["amd64".into()],
            builder_types: vec!["binarypackage".into()],
        })
    }

    async fn resume(&self) -> buildd_client::Result<ResumeOutput> {
        let mut script = self.script.lock();
        script.calls.push("resume".to_string());
        if script.resume_times_out {
            return Err(ClientError::Timeout(
                "resume of vmhost did not finish within 40s".into(),
            ));
        }
        if script.resume_fails {
            return Err(ClientError::ResumeFailed {
                stdout: String::new(),
                stderr: "ssh: connect to host vmhost: Connection refused".into(),
                exit_code: 255,
            });
        }
        script.status = WorkerStatus::idle();
        Ok(ResumeOutput {
            stdout: "vm reset".into(),
            stderr: String::new(),
            exit_code: 0,
        })
    }
}

/// Hands out one `FakeWorker` per builder name
#[derive(Debug, Default)]
pub struct FakeWorkerFactory {
    workers: Mutex<HashMap<String, Arc<FakeWorker>>>,
}

impl FakeWorkerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// The worker standing in for `name`, created idle on first use
    pub fn worker(&self, name: &str) -> Arc<FakeWorker> {
        self.workers
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(FakeWorker::new()))
            .clone()
    }
}

impl WorkerFactory for FakeWorkerFactory {
    fn worker_for(&self, vitals: &BuilderVitals) -> ScanResult<Arc<dyn Worker>> {
        Ok(self.worker(&vitals.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fake_worker_lifecycle() {
        let worker = FakeWorker::new();
        let request = BuildRequest {
            builder_type: "binarypackage".into(),
            chroot: None,
            files: HashMap::new(),
            args: HashMap::new(),
        };

        worker.build("PACKAGEBUILD-1", &request).await.unwrap();
        assert_eq!(
            worker.status().await.unwrap().cookie(),
            Some("PACKAGEBUILD-1")
        );

        worker.abort().await.unwrap();
        assert_eq!(worker.status_now().builder_status, WorkerState::Aborting);

        worker.clean().await.unwrap();
        assert_eq!(worker.status_now(), WorkerStatus::idle());
        assert_eq!(worker.calls(), vec!["build", "status", "abort", "clean"]);
    }

    #[tokio::test]
    async fn test_fake_worker_faults_spare_resume() {
        let worker = FakeWorker::new();
        worker.set_fault(Some("connection refused"));
        assert!(worker.status().await.is_err());
        assert!(worker.resume().await.is_ok());
        assert_eq!(worker.call_count("resume"), 1);
    }

    #[test]
    fn test_factory_reuses_workers() {
        let factory = FakeWorkerFactory::new();
        let bob = factory.worker("bob");
        bob.set_status(WorkerStatus::building("x"));
        assert_eq!(
            factory.worker("bob").status_now(),
            WorkerStatus::building("x")
        );
    }
}
