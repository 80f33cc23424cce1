use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::BuildQueue;
use serde_json::{Map, Value, json};

use super::{BuildBehavior, required_arg, verify_common};
use crate::error::ScanResult;

/// Generates translation templates from a branch
pub struct TranslationTemplatesBuildBehavior {
    job: BuildQueue,
}

impl TranslationTemplatesBuildBehavior {
    pub fn new(job: BuildQueue) -> Self {
        Self { job }
    }
}

impl BuildBehavior for TranslationTemplatesBuildBehavior {
    fn job(&self) -> &BuildQueue {
        &self.job
    }

    fn builder_type(&self) -> &'static str {
        "translation-templates"
    }

    fn verify(&self, vitals: &BuilderVitals) -> ScanResult<()> {
        verify_common(&self.job, vitals)?;
        required_arg(&self.job, "branch_url")?;
        Ok(())
    }

    fn extra_args(&self) -> ScanResult<Map<String, Value>> {
        let mut args = Map::new();
        args.insert(
            "branch_url".to_string(),
            json!(required_arg(&self.job, "branch_url")?),
        );
        Ok(args)
    }
}
