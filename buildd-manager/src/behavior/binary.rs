use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::BuildQueue;
use serde_json::{Map, Value, json};

use super::{BuildBehavior, verify_common};
use crate::error::{ScanError, ScanResult};

/// Builds binary packages from a source package
pub struct BinaryPackageBuildBehavior {
    job: BuildQueue,
}

impl BinaryPackageBuildBehavior {
    pub fn new(job: BuildQueue) -> Self {
        Self { job }
    }
}

impl BuildBehavior for BinaryPackageBuildBehavior {
    fn job(&self) -> &BuildQueue {
        &self.job
    }

    fn builder_type(&self) -> &'static str {
        "binarypackage"
    }

    fn verify(&self, vitals: &BuilderVitals) -> ScanResult<()> {
        verify_common(&self.job, vitals)?;

        if let Some(processor) = self.job.processor.as_deref()
            && !vitals.supports(Some(processor))
        {
            return Err(ScanError::CannotBuild(format!(
                "{} cannot build for {}",
                vitals.name, processor
            )));
        }

        Ok(())
    }

    fn extra_args(&self) -> ScanResult<Map<String, Value>> {
        let mut args = Map::new();
        if let Some(processor) = &self.job.processor {
            args.insert("arch_tag".to_string(), json!(processor));
        }
        Ok(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildd_core::domain::builder::Builder;
    use buildd_core::domain::job::{FileRef, JobKind};

    fn job() -> BuildQueue {
        BuildQueue::new(JobKind::BinaryPackageBuild, "hello_1.0")
            .with_processor("amd64")
            .with_chroot(FileRef::new("c0ffee", "http://librarian/chroot.tar.gz"))
            .with_file("hello_1.0.dsc", FileRef::new("d5c", "http://librarian/hello_1.0.dsc"))
    }

    #[test]
    fn test_processor_must_be_supported() {
        let behavior = BinaryPackageBuildBehavior::new(job());
        let arm = Builder::new("bob", "http://bob:8221").with_processor("arm64");
        assert!(behavior.verify(&BuilderVitals::from_builder(&arm, None)).is_err());

        let amd = Builder::new("bob", "http://bob:8221").with_processor("amd64");
        assert!(behavior.verify(&BuilderVitals::from_builder(&amd, None)).is_ok());
    }

    #[test]
    fn test_builder_without_processors_builds_anything() {
        // Offered by the queue, so verify must accept it too
        let any = Builder::new("bob", "http://bob:8221");
        let vitals = BuilderVitals::from_builder(&any, None);
        assert!(vitals.supports(job().processor.as_deref()));
        assert!(BinaryPackageBuildBehavior::new(job()).verify(&vitals).is_ok());
    }

    #[test]
    fn test_request_carries_arch_tag() {
        let request = BinaryPackageBuildBehavior::new(job())
            .compose_build_request()
            .unwrap();
        assert_eq!(request.builder_type, "binarypackage");
        assert_eq!(request.args["arch_tag"], json!("amd64"));
        assert!(request.files.contains_key("hello_1.0.dsc"));
    }
}
