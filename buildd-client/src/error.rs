//! Error types for the worker client

use thiserror::Error;

/// Result type alias for worker operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to a build worker
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failed (connection refused, reset, DNS, ...)
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[source] reqwest::Error),

    /// The call did not complete within the socket timeout
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Worker endpoint answered with a non-success HTTP status
    #[error("Worker error (status {status}): {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Body of the error response
        message: String,
    },

    /// Worker reported an application-level fault
    #[error("Worker fault {code}: {message}")]
    Fault { code: i32, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Power-cycle command exited unsuccessfully
    #[error("Resuming failed:\nOUT:\n{stdout}\nERR:\n{stderr}\n")]
    ResumeFailed {
        stdout: String,
        stderr: String,
        exit_code: i32,
    },

    /// The call cannot be made against this worker
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Create an API error from status code and message
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiError {
            status,
            message: message.into(),
        }
    }

    /// Network-level failure, as opposed to the worker answering badly
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::RequestFailed(_) | Self::Timeout(_))
    }

    /// Worker answered, but with a fault or an unusable reply
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::Fault { .. } | Self::ApiError { .. } | Self::ParseError(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout(err.to_string())
        } else {
            ClientError::RequestFailed(err)
        }
    }
}
