//! Scan error taxonomy
//!
//! Every failure a scan can hit is a `ScanError`. Worker and store errors
//! feed the failure-assessment policy; none of them escape a builder's tick.

use buildd_client::ClientError;
use thiserror::Error;

use crate::repository::StoreError;

pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Debug, Error)]
pub enum ScanError {
    /// Transport or application fault talking to the worker
    #[error(transparent)]
    Worker(#[from] ClientError),

    /// Persistence collaborator failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Worker answered in a state the manager cannot work with
    #[error("Build daemon error: {0}")]
    BuildDaemon(String),

    /// Worker could not fetch a file required by the build
    #[error("Worker could not fetch {url}: {info}")]
    CannotFetchFile { url: String, info: String },

    /// Worker could not be power-cycled
    #[error("Cannot resume host: {0}")]
    CannotResumeHost(String),

    /// The job cannot run on this builder
    #[error("Cannot build: {0}")]
    CannotBuild(String),
}

impl ScanError {
    /// Failures whose message is self-explanatory in the log
    pub fn is_expected(&self) -> bool {
        !matches!(self, ScanError::Store(_))
    }

    /// Whether the failure was itself a failed attempt to resume
    pub fn is_resume_failure(&self) -> bool {
        matches!(
            self,
            ScanError::CannotResumeHost(_) | ScanError::Worker(ClientError::ResumeFailed { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_failures() {
        assert!(ScanError::CannotResumeHost("no vm_host".into()).is_resume_failure());
        assert!(
            ScanError::Worker(ClientError::ResumeFailed {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 1
            })
            .is_resume_failure()
        );
        assert!(!ScanError::BuildDaemon("refused".into()).is_resume_failure());
    }

    #[test]
    fn test_store_errors_are_unexpected() {
        assert!(!ScanError::Store(StoreError::NotFound("bob".into())).is_expected());
        assert!(ScanError::CannotBuild("no chroot".into()).is_expected());
    }
}
