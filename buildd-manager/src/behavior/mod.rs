//! Build behaviors
//!
//! Each job kind knows how to identify itself to a worker (the build
//! cookie), which worker-side build manager runs it, whether a given
//! builder may run it, and what payload the `build` call carries.

mod binary;
mod recipe;
mod translation;

pub use binary::BinaryPackageBuildBehavior;
pub use recipe::RecipeBuildBehavior;
pub use translation::TranslationTemplatesBuildBehavior;

use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::{BuildQueue, JobKind};
use buildd_core::dto::worker::BuildRequest;

use crate::error::{ScanError, ScanResult};

pub trait BuildBehavior: Send + Sync {
    /// The job this behavior drives
    fn job(&self) -> &BuildQueue;

    /// Name of the worker-side build manager
    fn builder_type(&self) -> &'static str;

    /// Check that the job can be dispatched to the builder
    fn verify(&self, vitals: &BuilderVitals) -> ScanResult<()>;

    /// Arguments specific to this job kind
    fn extra_args(&self) -> ScanResult<serde_json::Map<String, serde_json::Value>>;

    /// Cookie a worker running this job reports back
    fn build_cookie(&self) -> String {
        build_cookie(self.job())
    }

    /// Payload of the `build` call
    fn compose_build_request(&self) -> ScanResult<BuildRequest> {
        let job = self.job();
        let mut args = job.args.clone();
        args.extend(self.extra_args()?);
        Ok(BuildRequest {
            builder_type: self.builder_type().to_string(),
            chroot: job.chroot.clone(),
            files: job.files.clone(),
            args,
        })
    }
}

/// Select the behavior for a job by its kind
pub fn behavior_for(job: BuildQueue) -> Box<dyn BuildBehavior> {
    match job.kind {
        JobKind::BinaryPackageBuild => Box::new(BinaryPackageBuildBehavior::new(job)),
        JobKind::RecipeBuild => Box::new(RecipeBuildBehavior::new(job)),
        JobKind::TranslationTemplatesBuild => Box::new(TranslationTemplatesBuildBehavior::new(job)),
    }
}

/// `{KIND}-{build_id}`, e.g. `PACKAGEBUILD-<uuid>`
pub fn build_cookie(job: &BuildQueue) -> String {
    format!("{}-{}", job.kind, job.build_id)
}

/// Checks common to every job kind
fn verify_common(job: &BuildQueue, vitals: &BuilderVitals) -> ScanResult<()> {
    if job.virtualized && !vitals.virtualized {
        return Err(ScanError::CannotBuild(format!(
            "Attempt to build virtual item {} on a non-virtual builder {}",
            job.title, vitals.name
        )));
    }

    if job.chroot.is_none() {
        return Err(ScanError::CannotBuild(format!(
            "Missing chroot for {}",
            job.title
        )));
    }

    Ok(())
}

/// Fetch a string argument the job kind requires
fn required_arg<'a>(job: &'a BuildQueue, key: &str) -> ScanResult<&'a str> {
    job.args
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ScanError::CannotBuild(format!("{} has no {}", job.title, key)))
}
