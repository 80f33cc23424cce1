//! buildd Core
//!
//! Core types shared by the build-farm manager and the worker client.
//!
//! This crate contains:
//! - Domain types: builders, their per-cycle vitals, queued build jobs
//! - DTOs: the worker RPC envelope and payloads, and API summaries

pub mod domain;
pub mod dto;
