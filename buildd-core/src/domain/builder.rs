//! Builder domain model
//!
//! Represents a physical or virtual machine that executes build jobs.

use serde::{Deserialize, Serialize};

use crate::domain::job::BuildQueue;

/// A build worker registered with the manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Builder {
    /// Unique name of the builder
    pub name: String,

    /// Endpoint of the worker's RPC interface
    pub url: String,

    /// Processors this builder can build for (e.g. "amd64")
    pub processors: Vec<String>,

    /// Whether this is a virtual machine that can be power-cycled
    pub virtualized: bool,

    /// Host that controls the virtual machine, if any
    pub vm_host: Option<String>,

    /// Whether the builder is healthy and enabled
    pub builderok: bool,

    /// Whether the builder is excluded from automatic dispatch
    pub manual: bool,

    /// Consecutive scan failures, reset on any successful scan
    pub failure_count: u32,

    /// Reason the builder was last disabled
    pub failnotes: Option<String>,
}

impl Builder {
    /// Creates an enabled, non-virtualized builder
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            processors: Vec::new(),
            virtualized: false,
            vm_host: None,
            builderok: true,
            manual: false,
            failure_count: 0,
            failnotes: None,
        }
    }

    /// Marks the builder as virtualized and controlled by `vm_host`
    pub fn virtual_on(mut self, vm_host: impl Into<String>) -> Self {
        self.virtualized = true;
        self.vm_host = Some(vm_host.into());
        self
    }

    pub fn with_processor(mut self, processor: impl Into<String>) -> Self {
        self.processors.push(processor.into());
        self
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }

    pub fn with_builderok(mut self, builderok: bool) -> Self {
        self.builderok = builderok;
        self
    }

    /// Whether this builder can build for `processor` (`None` matches any)
    pub fn supports(&self, processor: Option<&str>) -> bool {
        supports_processor(&self.processors, processor)
    }
}

/// Whether a builder with `processors` can build for `processor`
///
/// An empty list builds for anything, and a job with no processor runs anywhere.
pub fn supports_processor(processors: &[String], processor: Option<&str>) -> bool {
    match processor {
        None => true,
        Some(p) => processors.is_empty() || processors.iter().any(|own| own == p),
    }
}

/// Snapshot of a builder taken once per manager tick
///
/// Vitals are immutable. After a scan dispatches or cancels a job they are
/// stale until the next factory refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderVitals {
    pub name: String,
    pub url: String,
    pub processors: Vec<String>,
    pub virtualized: bool,
    pub vm_host: Option<String>,
    pub builderok: bool,
    pub manual: bool,
    pub build_queue: Option<BuildQueue>,
}

impl BuilderVitals {
    pub fn from_builder(builder: &Builder, build_queue: Option<BuildQueue>) -> Self {
        Self {
            name: builder.name.clone(),
            url: builder.url.clone(),
            processors: builder.processors.clone(),
            virtualized: builder.virtualized,
            vm_host: builder.vm_host.clone(),
            builderok: builder.builderok,
            manual: builder.manual,
            build_queue,
        }
    }

    pub fn supports(&self, processor: Option<&str>) -> bool {
        supports_processor(&self.processors, processor)
    }
}
