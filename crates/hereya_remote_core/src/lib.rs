//! Shared remote job execution primitives.
//!
//! This crate owns the deterministic parts of the worker contract: reading and
//! validating the job environment, backend selection, remote state wiring,
//! staging layout and the job lifecycle. It intentionally excludes the AWS SDK,
//! git and process spawning; those live in `hereya_remote_worker`.

pub mod backend;
pub mod contract;
pub mod error;
pub mod layout;
pub mod lifecycle;
pub mod provisioning;
pub mod state_backend;
pub mod tool_env;
