//! Power-cycling virtual workers
//!
//! The worker itself cannot be asked to reboot when it is unresponsive, so
//! resume runs a command on the manager side that resets the VM through its
//! host. The command template is split on whitespace after substitution.

use buildd_core::dto::worker::ResumeOutput;
use tokio::process::Command;
use tracing::info;

use crate::WorkerClient;
use crate::error::{ClientError, Result};

impl WorkerClient {
    /// Runs the resume command, bounded by the socket timeout
    pub(crate) async fn run_resume_command(&self) -> Result<ResumeOutput> {
        let vm_host = self.vm_host.as_deref().ok_or_else(|| {
            ClientError::InvalidRequest(format!("{} has no vm_host to resume", self.base_url))
        })?;

        let argv = resume_argv(&self.resume_command, vm_host, &buildd_name(&self.base_url));
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| ClientError::InvalidRequest("empty resume command".to_string()))?;

        info!("Running resume command for {}: {}", self.base_url, argv.join(" "));

        let child = Command::new(program).args(args).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                ClientError::Timeout(format!(
                    "resume of {} did not finish within {:?}",
                    self.base_url, self.timeout
                ))
            })?
            .map_err(|e| ClientError::ResumeFailed {
                stdout: String::new(),
                stderr: e.to_string(),
                exit_code: -1,
            })?;

        let result = ResumeOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };

        if !output.status.success() {
            return Err(ClientError::ResumeFailed {
                stdout: result.stdout,
                stderr: result.stderr,
                exit_code: result.exit_code,
            });
        }

        Ok(result)
    }
}

/// Expand the command template into an argument vector
fn resume_argv(template: &str, vm_host: &str, buildd_name: &str) -> Vec<String> {
    template
        .replace("{vm_host}", vm_host)
        .replace("{buildd_name}", buildd_name)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Short host name of the worker: first label of the URL's host
fn buildd_name(base_url: &str) -> String {
    reqwest::Url::parse(base_url)
        .ok()
        .and_then(|url| {
            url.host_str()
                .and_then(|host| host.split('.').next())
                .map(str::to_string)
        })
        .unwrap_or_else(|| base_url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Worker;
    use std::time::Duration;

    #[test]
    fn test_resume_argv_substitution() {
        let argv = resume_argv(
            "ssh ~ppa@{vm_host} ppa-reset {buildd_name}",
            "scramble.ppa",
            "bob",
        );
        assert_eq!(argv, vec!["ssh", "~ppa@scramble.ppa", "ppa-reset", "bob"]);
    }

    #[test]
    fn test_buildd_name_from_url() {
        assert_eq!(buildd_name("http://bob.buildd.example:8221"), "bob");
        assert_eq!(buildd_name("http://frog:8221/"), "frog");
        assert_eq!(buildd_name("not a url"), "not a url");
    }

    #[tokio::test]
    async fn test_resume_requires_vm_host() {
        let client = WorkerClient::new("http://bob:8221", None, Duration::from_secs(5)).unwrap();
        let err = client.resume().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_resume_success() {
        let client = WorkerClient::new(
            "http://bob:8221",
            Some("host".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_resume_command("echo {vm_host} {buildd_name}");

        let output = client.resume().await.unwrap();
        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "host bob");
    }

    #[tokio::test]
    async fn test_resume_failure_carries_output() {
        let client = WorkerClient::new(
            "http://bob:8221",
            Some("host".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
        .with_resume_command("false {vm_host}");

        let err = client.resume().await.unwrap_err();
        assert!(matches!(err, ClientError::ResumeFailed { exit_code: 1, .. }));
    }
}
