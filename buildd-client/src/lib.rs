//! buildd Worker Client
//!
//! A type-safe client for the RPC interface exposed by remote build workers.
//!
//! The manager holds one `WorkerClient` per builder. Every call except
//! `resume` is a JSON `RpcRequest` posted to `{url}/rpc`; `resume` runs the
//! configured power-control command against the builder's VM host.
//!
//! # Example
//!
//! ```no_run
//! use buildd_client::{Worker, WorkerClient};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> buildd_client::Result<()> {
//!     let worker = WorkerClient::new("http://bob.buildd:8221", None, Duration::from_secs(40))?;
//!     let status = worker.status().await?;
//!     println!("bob is {}", status.builder_status);
//!     Ok(())
//! }
//! ```

pub mod error;
mod resume;
mod rpc;

pub use error::{ClientError, Result};

use async_trait::async_trait;
use buildd_core::domain::job::FileRef;
use buildd_core::dto::worker::{
    BuildRequest, BuildResponse, EnsurePresentResponse, ResumeOutput, RpcResponse, WorkerInfo,
    WorkerStatus,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Default command used to power-cycle a virtual worker
pub const DEFAULT_RESUME_COMMAND: &str = "ssh ~ppa@{vm_host} ppa-reset {buildd_name}";

/// Operations the manager can perform on a remote build worker
///
/// Any call may fail with a transport error or an application fault.
/// `resume` is the only call that is valid against an unresponsive worker;
/// it must be safe to repeat against a worker that is already off.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Current activity of the worker
    async fn status(&self) -> Result<WorkerStatus>;

    /// Ask the worker to fetch `file` into its cache if it lacks it
    async fn ensure_present(&self, file: &FileRef) -> Result<EnsurePresentResponse>;

    /// Start a build identified by `cookie`
    async fn build(&self, cookie: &str, request: &BuildRequest) -> Result<BuildResponse>;

    /// Request graceful termination of the current build
    async fn abort(&self) -> Result<()>;

    /// Discard the results of a finished build, returning to IDLE
    async fn clean(&self) -> Result<()>;

    /// Round-trip `message`; used to wake a freshly resumed worker
    async fn echo(&self, message: &str) -> Result<String>;

    /// Protocol version and capabilities
    async fn info(&self) -> Result<WorkerInfo>;

    /// Power-cycle the worker's virtual machine
    async fn resume(&self) -> Result<ResumeOutput>;
}

/// HTTP client for a single build worker
#[derive(Debug, Clone)]
pub struct WorkerClient {
    /// Base URL of the worker (e.g., "http://bob.buildd:8221")
    base_url: String,
    /// Host controlling the worker's virtual machine
    vm_host: Option<String>,
    /// Upper bound for any RPC call and for the resume command
    timeout: Duration,
    /// Template with `{vm_host}` and `{buildd_name}` placeholders
    resume_command: String,
    /// HTTP client instance
    client: Client,
}

impl WorkerClient {
    /// Create a new worker client
    ///
    /// # Arguments
    /// * `base_url` - The worker's RPC endpoint
    /// * `vm_host` - VM host for virtualized workers
    /// * `timeout` - Socket timeout applied to every call
    pub fn new(
        base_url: impl Into<String>,
        vm_host: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ClientError::from)?;
        Ok(Self::with_client(base_url, vm_host, timeout, client))
    }

    /// Create a new worker client with a custom HTTP client
    ///
    /// The caller is responsible for configuring the client's timeouts.
    pub fn with_client(
        base_url: impl Into<String>,
        vm_host: Option<String>,
        timeout: Duration,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            vm_host,
            timeout,
            resume_command: DEFAULT_RESUME_COMMAND.to_string(),
            client,
        }
    }

    /// Override the power-cycle command template
    pub fn with_resume_command(mut self, template: impl Into<String>) -> Self {
        self.resume_command = template.into();
        self
    }

    /// Get the base URL of the worker
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn vm_host(&self) -> Option<&str> {
        self.vm_host.as_deref()
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an RPC response and deserialize its result
    ///
    /// Checks the HTTP status first, then unwraps the RPC envelope.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        let envelope: RpcResponse = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse RPC response: {}", e)))?;

        decode_envelope(envelope)
    }
}

/// Unwrap an RPC envelope into its typed result
fn decode_envelope<T: DeserializeOwned>(envelope: RpcResponse) -> Result<T> {
    if let Some(fault) = envelope.fault {
        return Err(ClientError::Fault {
            code: fault.code,
            message: fault.message,
        });
    }

    let value = envelope.result.unwrap_or(serde_json::Value::Null);
    serde_json::from_value(value)
        .map_err(|e| ClientError::ParseError(format!("Unexpected RPC result: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildd_core::dto::worker::RpcFault;
    use serde_json::json;

    #[test]
    fn test_client_creation() {
        let client = WorkerClient::new("http://bob:8221", None, Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://bob:8221");
        assert_eq!(client.vm_host(), None);
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = WorkerClient::new(
            "http://bob:8221/",
            Some("vmhost".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.base_url(), "http://bob:8221");
        assert_eq!(client.vm_host(), Some("vmhost"));
    }

    #[test]
    fn test_decode_fault() {
        let envelope = RpcResponse {
            result: None,
            fault: Some(RpcFault {
                code: 8002,
                message: "unknown builder type".into(),
            }),
        };
        let err = decode_envelope::<WorkerStatus>(envelope).unwrap_err();
        assert!(matches!(err, ClientError::Fault { code: 8002, .. }));
    }

    #[test]
    fn test_decode_result() {
        let envelope = RpcResponse {
            result: Some(json!({"builder_status": "IDLE"})),
            fault: None,
        };
        let status: WorkerStatus = decode_envelope(envelope).unwrap();
        assert_eq!(status, WorkerStatus::idle());
    }

    #[test]
    fn test_decode_unit_result() {
        let envelope = RpcResponse {
            result: None,
            fault: None,
        };
        let unit: Result<()> = decode_envelope(envelope);
        assert!(unit.is_ok());
    }

    #[test]
    fn test_decode_malformed_result() {
        let envelope = RpcResponse {
            result: Some(json!({"builder_status": "ASLEEP"})),
            fault: None,
        };
        let err = decode_envelope::<WorkerStatus>(envelope).unwrap_err();
        assert!(matches!(err, ClientError::ParseError(_)));
    }
}
