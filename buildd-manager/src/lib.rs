//! buildd manager
//!
//! Polls a farm of remote build workers, dispatches queued jobs to idle
//! ones, and recovers lost, broken and cancelled builds.
//!
//! The process runs one `WorkerScanner` task per builder under a
//! `BuilddManager`. Scanners read builder state through a shared
//! `BuilderFactory`, talk to workers through `buildd_client::Worker`, and
//! persist every transition through the collaborator traits in
//! `repository`.

pub mod api;
pub mod behavior;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod factory;
pub mod interactor;
pub mod manager;
pub mod repository;
pub mod scanner;
pub mod worker;

pub use config::Config;
pub use error::{ScanError, ScanResult};
pub use manager::{BuilddManager, ManagerSettings, NewBuildersScanner};
pub use scanner::{CycleOutcome, ScannerSettings, WorkerScanner};
