//! Worker RPC DTOs
//!
//! Every call to a worker is a `RpcRequest` posted to its endpoint; every
//! answer is a `RpcResponse` carrying either a result or a fault.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::job::FileRef;
use crate::domain::worker::{BuildOutcome, WorkerState};

/// A single remote procedure call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    pub method: String,
    pub params: Vec<serde_json::Value>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Vec<serde_json::Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Answer to an `RpcRequest`
///
/// Exactly one of `result` and `fault` is expected to be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub fault: Option<RpcFault>,
}

/// Application-level fault reported by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcFault {
    pub code: i32,
    pub message: String,
}

/// Snapshot returned by the worker's `status` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub builder_status: WorkerState,

    /// Cookie of the build the worker holds; absent when idle
    #[serde(default)]
    pub build_id: Option<String>,

    /// Outcome of the finished build; only set while WAITING
    #[serde(default)]
    pub build_status: Option<BuildOutcome>,

    /// Most recent excerpt of the build log
    #[serde(default)]
    pub logtail: Option<String>,

    /// Result files the worker holds, name to sha1
    #[serde(default)]
    pub filemap: HashMap<String, String>,

    #[serde(default)]
    pub dependencies: Option<String>,
}

impl WorkerStatus {
    pub fn idle() -> Self {
        Self {
            builder_status: WorkerState::Idle,
            build_id: None,
            build_status: None,
            logtail: None,
            filemap: HashMap::new(),
            dependencies: None,
        }
    }

    pub fn building(cookie: impl Into<String>) -> Self {
        Self {
            builder_status: WorkerState::Building,
            build_id: Some(cookie.into()),
            ..Self::idle()
        }
    }

    pub fn waiting(cookie: impl Into<String>, outcome: BuildOutcome) -> Self {
        Self {
            builder_status: WorkerState::Waiting,
            build_id: Some(cookie.into()),
            build_status: Some(outcome),
            ..Self::idle()
        }
    }

    pub fn aborting(cookie: impl Into<String>) -> Self {
        Self {
            builder_status: WorkerState::Aborting,
            build_id: Some(cookie.into()),
            ..Self::idle()
        }
    }

    pub fn with_logtail(mut self, logtail: impl Into<String>) -> Self {
        self.logtail = Some(logtail.into());
        self
    }

    /// Cookie of the build the worker is holding
    ///
    /// An idle worker holds no build, whatever `build_id` says.
    pub fn cookie(&self) -> Option<&str> {
        match self.builder_status {
            WorkerState::Idle => None,
            _ => self.build_id.as_deref(),
        }
    }
}

/// Payload sent with a `build` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Worker-side build manager to run (e.g. "binarypackage")
    pub builder_type: String,
    pub chroot: Option<FileRef>,
    pub files: HashMap<String, FileRef>,
    pub args: HashMap<String, serde_json::Value>,
}

/// Answer to a `build` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildResponse {
    pub status: WorkerState,
    #[serde(default)]
    pub info: String,
}

/// Answer to an `ensurepresent` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnsurePresentResponse {
    pub present: bool,
    #[serde(default)]
    pub info: String,
}

/// Answer to an `info` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub protocol_version: String,
    pub arch: Vec<String>,
    pub builder_types: Vec<String>,
}

/// Captured output of a host-side power-cycle command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_worker_has_no_cookie() {
        let mut status = WorkerStatus::idle();
        status.build_id = Some("PACKAGEBUILD-stale".to_string());
        assert_eq!(status.cookie(), None);
    }

    #[test]
    fn test_busy_worker_cookie() {
        assert_eq!(WorkerStatus::building("c1").cookie(), Some("c1"));
        assert_eq!(
            WorkerStatus::waiting("c2", BuildOutcome::Ok).cookie(),
            Some("c2")
        );
        assert_eq!(WorkerStatus::aborting("c3").cookie(), Some("c3"));
    }

    #[test]
    fn test_status_decodes_with_missing_fields() {
        let status: WorkerStatus =
            serde_json::from_str(r#"{"builder_status": "BUILDING", "build_id": "x-1"}"#).unwrap();
        assert_eq!(status.builder_status, WorkerState::Building);
        assert_eq!(status.cookie(), Some("x-1"));
        assert!(status.filemap.is_empty());
    }

    #[test]
    fn test_fault_response_decodes() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"fault": {"code": 8002, "message": "bad args"}}"#).unwrap();
        assert!(response.result.is_none());
        assert_eq!(response.fault.unwrap().code, 8002);
    }
}
