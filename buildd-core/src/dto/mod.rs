//! Data Transfer Objects
//!
//! This module contains DTOs exchanged between the manager and remote
//! workers over the RPC interface, and the summaries served by the
//! manager's status API.

pub mod builder;
pub mod worker;
