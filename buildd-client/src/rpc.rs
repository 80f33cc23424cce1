//! Worker RPC calls

use async_trait::async_trait;
use buildd_core::domain::job::FileRef;
use buildd_core::dto::worker::{
    BuildRequest, BuildResponse, EnsurePresentResponse, ResumeOutput, RpcRequest, WorkerInfo,
    WorkerStatus,
};
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::{Worker, WorkerClient};

impl WorkerClient {
    /// Post one RPC call and decode its result
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}/rpc", self.base_url);
        debug!("{} <- {}", self.base_url, method);

        let response = self
            .client
            .post(&url)
            .json(&RpcRequest::new(method, params))
            .send()
            .await?;

        self.handle_response(response).await
    }
}

#[async_trait]
impl Worker for WorkerClient {
    async fn status(&self) -> Result<WorkerStatus> {
        self.call("status", Vec::new()).await
    }

    async fn ensure_present(&self, file: &FileRef) -> Result<EnsurePresentResponse> {
        self.call("ensurepresent", vec![json!(file.sha1), json!(file.url)])
            .await
    }

    async fn build(&self, cookie: &str, request: &BuildRequest) -> Result<BuildResponse> {
        let chroot_sha1 = request.chroot.as_ref().map(|c| c.sha1.clone());
        let filemap: std::collections::HashMap<&str, &str> = request
            .files
            .iter()
            .map(|(name, file)| (name.as_str(), file.sha1.as_str()))
            .collect();

        self.call(
            "build",
            vec![
                json!(cookie),
                json!(request.builder_type),
                json!(chroot_sha1),
                json!(filemap),
                json!(request.args),
            ],
        )
        .await
    }

    async fn abort(&self) -> Result<()> {
        self.call("abort", Vec::new()).await
    }

    async fn clean(&self) -> Result<()> {
        self.call("clean", Vec::new()).await
    }

    async fn echo(&self, message: &str) -> Result<String> {
        self.call("echo", vec![json!(message)]).await
    }

    async fn info(&self) -> Result<WorkerInfo> {
        self.call("info", Vec::new()).await
    }

    async fn resume(&self) -> Result<ResumeOutput> {
        self.run_resume_command().await
    }
}
