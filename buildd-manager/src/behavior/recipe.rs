use buildd_core::domain::builder::BuilderVitals;
use buildd_core::domain::job::BuildQueue;
use serde_json::{Map, Value, json};

use super::{BuildBehavior, required_arg, verify_common};
use crate::error::{ScanError, ScanResult};

/// Builds a source package from a branch recipe
///
/// Recipes run arbitrary branch code, so they only ever go to virtual
/// builders.
pub struct RecipeBuildBehavior {
    job: BuildQueue,
}

impl RecipeBuildBehavior {
    pub fn new(job: BuildQueue) -> Self {
        Self { job }
    }
}

impl BuildBehavior for RecipeBuildBehavior {
    fn job(&self) -> &BuildQueue {
        &self.job
    }

    fn builder_type(&self) -> &'static str {
        "sourcepackagerecipe"
    }

    fn verify(&self, vitals: &BuilderVitals) -> ScanResult<()> {
        if !vitals.virtualized {
            return Err(ScanError::CannotBuild(format!(
                "Attempt to build recipe {} on a non-virtual builder {}",
                self.job.title, vitals.name
            )));
        }
        verify_common(&self.job, vitals)?;
        required_arg(&self.job, "recipe_text")?;
        Ok(())
    }

    fn extra_args(&self) -> ScanResult<Map<String, Value>> {
        let mut args = Map::new();
        args.insert(
            "recipe_text".to_string(),
            json!(required_arg(&self.job, "recipe_text")?),
        );
        args.insert("archive_purpose".to_string(), json!("PPA"));
        Ok(args)
    }
}
