//! Core domain types
//!
//! These types describe the build farm as the manager sees it: builders,
//! the jobs queued for them, and the states a remote worker can report.
//! They are shared between the manager (which persists and acts on them)
//! and the worker client (which carries them over the wire).

pub mod builder;
pub mod job;
pub mod worker;
