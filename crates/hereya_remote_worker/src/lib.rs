//! Runtime integration for remote job execution.
//!
//! This crate owns the side-effecting half of a job: cloning the package,
//! copying project source out of object storage, running the external tool,
//! and the pipeline that sequences them. Contract primitives come from
//! `hereya_remote_core`, re-exported as `runtime`.

pub mod adapters;
pub mod config;
pub mod handlers;
pub mod staging;

pub mod runtime {
    pub use hereya_remote_core::*;
}
