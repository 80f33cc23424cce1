//! Build job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A queued or in-progress unit of build work
///
/// Structure shared between the manager (persists and dispatches) and the
/// status API. `builder` is the name of the builder currently holding the
/// job; `None` means the job is waiting in the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildQueue {
    pub id: Uuid,
    /// Identity of the underlying build record
    pub build_id: Uuid,
    pub kind: JobKind,
    pub title: String,
    pub status: BuildStatus,
    pub builder: Option<String>,
    /// Dispatch priority, higher first
    pub lastscore: i32,
    /// Whether the job must run on a virtualized builder
    pub virtualized: bool,
    /// Processor the job targets; `None` means any
    pub processor: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub date_started: Option<DateTime<Utc>>,
    pub logtail: Option<String>,
    /// Consecutive failures of the build record, independent of any builder
    pub failure_count: u32,
    /// Chroot tarball the worker must hold before building
    pub chroot: Option<FileRef>,
    /// Files pushed to the worker, keyed by the name the build expects
    pub files: HashMap<String, FileRef>,
    /// Job-kind specific build arguments
    pub args: HashMap<String, serde_json::Value>,
}

impl BuildQueue {
    /// Creates a pending job with default scheduling attributes
    pub fn new(kind: JobKind, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            build_id: Uuid::new_v4(),
            kind,
            title: title.into(),
            status: BuildStatus::NeedsBuild,
            builder: None,
            lastscore: 0,
            virtualized: false,
            processor: None,
            requested_at: Utc::now(),
            date_started: None,
            logtail: None,
            failure_count: 0,
            chroot: None,
            files: HashMap::new(),
            args: HashMap::new(),
        }
    }

    pub fn with_score(mut self, score: i32) -> Self {
        self.lastscore = score;
        self
    }

    pub fn with_virtualized(mut self, virtualized: bool) -> Self {
        self.virtualized = virtualized;
        self
    }

    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processor = Some(processor.into());
        self
    }

    pub fn with_chroot(mut self, chroot: FileRef) -> Self {
        self.chroot = Some(chroot);
        self
    }

    pub fn with_file(mut self, name: impl Into<String>, file: FileRef) -> Self {
        self.files.insert(name.into(), file);
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// Whether a builder currently holds this job
    pub fn is_assigned(&self) -> bool {
        self.builder.is_some()
    }
}

/// A file the worker fetches into its cache by content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub sha1: String,
    pub url: String,
}

impl FileRef {
    pub fn new(sha1: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            sha1: sha1.into(),
            url: url.into(),
        }
    }
}

/// Kind of build a job represents; selects its build behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    BinaryPackageBuild,
    RecipeBuild,
    TranslationTemplatesBuild,
}

impl JobKind {
    /// Stable tag used in build cookies and persisted rows
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::BinaryPackageBuild => "PACKAGEBUILD",
            JobKind::RecipeBuild => "RECIPEBRANCHBUILD",
            JobKind::TranslationTemplatesBuild => "TRANSLATIONTEMPLATESBUILD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PACKAGEBUILD" => Some(JobKind::BinaryPackageBuild),
            "RECIPEBRANCHBUILD" => Some(JobKind::RecipeBuild),
            "TRANSLATIONTEMPLATESBUILD" => Some(JobKind::TranslationTemplatesBuild),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Build status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BuildStatus {
    NeedsBuild,
    Building,
    Cancelling,
    Cancelled,
    FullyBuilt,
    FailedToBuild,
    ManualDepWait,
    ChrootWait,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::NeedsBuild => "NEEDSBUILD",
            BuildStatus::Building => "BUILDING",
            BuildStatus::Cancelling => "CANCELLING",
            BuildStatus::Cancelled => "CANCELLED",
            BuildStatus::FullyBuilt => "FULLYBUILT",
            BuildStatus::FailedToBuild => "FAILEDTOBUILD",
            BuildStatus::ManualDepWait => "MANUALDEPWAIT",
            BuildStatus::ChrootWait => "CHROOTWAIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "NEEDSBUILD" => Some(BuildStatus::NeedsBuild),
            "BUILDING" => Some(BuildStatus::Building),
            "CANCELLING" => Some(BuildStatus::Cancelling),
            "CANCELLED" => Some(BuildStatus::Cancelled),
            "FULLYBUILT" => Some(BuildStatus::FullyBuilt),
            "FAILEDTOBUILD" => Some(BuildStatus::FailedToBuild),
            "MANUALDEPWAIT" => Some(BuildStatus::ManualDepWait),
            "CHROOTWAIT" => Some(BuildStatus::ChrootWait),
            _ => None,
        }
    }

    /// Terminal statuses release the job from the queue
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            BuildStatus::NeedsBuild | BuildStatus::Building | BuildStatus::Cancelling
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
