//! Builder DTOs
//!
//! Summaries served by the manager's read-only status API.

use serde::{Deserialize, Serialize};

use crate::domain::builder::Builder;
use crate::domain::job::{BuildQueue, BuildStatus};

/// Summary information about a builder and its current job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderSummary {
    pub name: String,
    pub url: String,
    pub virtualized: bool,
    pub builderok: bool,
    pub manual: bool,
    pub failure_count: u32,
    pub failnotes: Option<String>,

    /// Title of the job the builder holds, if any
    pub current_job: Option<String>,

    /// Status of that job
    pub current_status: Option<BuildStatus>,
}

impl BuilderSummary {
    pub fn new(builder: Builder, job: Option<&BuildQueue>) -> Self {
        BuilderSummary {
            name: builder.name,
            url: builder.url,
            virtualized: builder.virtualized,
            builderok: builder.builderok,
            manual: builder.manual,
            failure_count: builder.failure_count,
            failnotes: builder.failnotes,
            current_job: job.map(|j| j.title.clone()),
            current_status: job.map(|j| j.status),
        }
    }
}
