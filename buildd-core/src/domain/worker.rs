//! States reported by a remote build worker

use serde::{Deserialize, Serialize};

/// What the worker is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerState {
    /// Ready for a new build
    Idle,
    /// Running a build
    Building,
    /// Finished a build and holding its results until cleaned
    Waiting,
    /// Terminating a build after an abort request
    Aborting,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerState::Idle => write!(f, "IDLE"),
            WorkerState::Building => write!(f, "BUILDING"),
            WorkerState::Waiting => write!(f, "WAITING"),
            WorkerState::Aborting => write!(f, "ABORTING"),
        }
    }
}

/// Result of a finished build, reported while the worker is WAITING
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildOutcome {
    Ok,
    PackageFail,
    DepFail,
    ChrootFail,
    BuilderFail,
    GivenBack,
    Aborted,
}

impl std::fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BuildOutcome::Ok => "OK",
            BuildOutcome::PackageFail => "PACKAGEFAIL",
            BuildOutcome::DepFail => "DEPFAIL",
            BuildOutcome::ChrootFail => "CHROOTFAIL",
            BuildOutcome::BuilderFail => "BUILDERFAIL",
            BuildOutcome::GivenBack => "GIVENBACK",
            BuildOutcome::Aborted => "ABORTED",
        };
        f.write_str(s)
    }
}
