//! Failure assessment
//!
//! After a failed scan both the builder's and the job's failure counts have
//! been bumped. Comparing them tells us which of the two to blame:
//!
//! - job count > builder count: the job breaks every builder it touches.
//!   Fail it for good and exonerate the builder.
//! - builder count > job count: the builder is at fault. Requeue the job,
//!   and every `reset_threshold` failures try to revive the builder
//!   (resume if virtual, disable otherwise). Once the count reaches
//!   `reset_threshold * reset_failure_threshold`, disable it.
//! - equal counts: nothing can be concluded, so only requeue the job.
//!
//! Retry, then soft reset, then hard disable.

/// Tuning of the escalation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    /// Builder failures between reset attempts
    pub reset_threshold: u32,
    /// Reset attempts before the builder is disabled
    pub reset_failure_threshold: u32,
}

impl Thresholds {
    /// Failure count at which a builder is disabled outright
    pub fn disable_at(&self) -> u32 {
        self.reset_threshold
            .saturating_mul(self.reset_failure_threshold)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            reset_threshold: 5,
            reset_failure_threshold: 3,
        }
    }
}

/// What happens to the builder's current job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAction {
    None,
    /// Return to the queue for another attempt
    Reset,
    /// Mark FAILEDTOBUILD so it is never dispatched again
    Fail,
}

/// What happens to the builder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderAction {
    None,
    /// Exonerated: failure count back to zero
    ResetFailureCount,
    /// Resume if virtual, otherwise disable
    ResetOrFail,
    /// Permanently disable
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Judgement {
    pub job: JobAction,
    pub builder: BuilderAction,
}

/// Decide the remediation for a failed scan
///
/// `job_failures` is `None` when the builder holds no job.
pub fn assess_failure_counts(
    thresholds: &Thresholds,
    builder_failures: u32,
    job_failures: Option<u32>,
) -> Judgement {
    let job_count = job_failures.unwrap_or(0);

    if job_failures.is_some() && builder_failures == job_count {
        return Judgement {
            job: JobAction::Reset,
            builder: BuilderAction::None,
        };
    }

    if job_count > builder_failures {
        return Judgement {
            job: JobAction::Fail,
            builder: BuilderAction::ResetFailureCount,
        };
    }

    let job = if job_failures.is_some() {
        JobAction::Reset
    } else {
        JobAction::None
    };

    let builder = if builder_failures >= thresholds.disable_at() {
        BuilderAction::Disable
    } else if thresholds.reset_threshold > 0 && builder_failures % thresholds.reset_threshold == 0
    {
        BuilderAction::ResetOrFail
    } else {
        BuilderAction::None
    };

    Judgement { job, builder }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: Thresholds = Thresholds {
        reset_threshold: 5,
        reset_failure_threshold: 3,
    };

    #[test]
    fn test_equal_counts_only_reset_job() {
        let judgement = assess_failure_counts(&T, 5, Some(5));
        assert_eq!(judgement.job, JobAction::Reset);
        assert_eq!(judgement.builder, BuilderAction::None);
    }

    #[test]
    fn test_job_blamed_when_it_fails_more() {
        let judgement = assess_failure_counts(&T, 1, Some(3));
        assert_eq!(judgement.job, JobAction::Fail);
        assert_eq!(judgement.builder, BuilderAction::ResetFailureCount);
    }

    #[test]
    fn test_builder_blamed_below_threshold() {
        let judgement = assess_failure_counts(&T, 3, Some(1));
        assert_eq!(judgement.job, JobAction::Reset);
        assert_eq!(judgement.builder, BuilderAction::None);

        let judgement = assess_failure_counts(&T, 3, None);
        assert_eq!(judgement.job, JobAction::None);
        assert_eq!(judgement.builder, BuilderAction::None);
    }

    #[test]
    fn test_reset_every_threshold() {
        for count in [5, 10] {
            let judgement = assess_failure_counts(&T, count, None);
            assert_eq!(judgement.builder, BuilderAction::ResetOrFail, "count {}", count);
        }
        assert_eq!(
            assess_failure_counts(&T, 6, None).builder,
            BuilderAction::None
        );
    }

    #[test]
    fn test_disable_at_product_of_thresholds() {
        assert_eq!(
            assess_failure_counts(&T, 15, None).builder,
            BuilderAction::Disable
        );
        assert_eq!(
            assess_failure_counts(&T, 16, Some(2)).builder,
            BuilderAction::Disable
        );
    }

    #[test]
    fn test_escalation_sequence() {
        let actions: Vec<BuilderAction> = (1..=T.disable_at())
            .map(|count| assess_failure_counts(&T, count, None).builder)
            .collect();

        let resets = actions
            .iter()
            .filter(|a| **a == BuilderAction::ResetOrFail)
            .count();
        assert_eq!(resets as u32, T.reset_failure_threshold - 1);
        assert_eq!(actions.last(), Some(&BuilderAction::Disable));
    }
}
