use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::contract::RemoteStateConfig;
use crate::error::JobError;

pub const BACKEND_FILE_NAME: &str = "backend.tf";
pub const STATE_OBJECT_NAME: &str = "terraform.tfstate";

/// Remote state location of one job. The lock table serializes mutating
/// operations per `state_key`, so jobs sharing an id share a lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStateReference {
    pub state_bucket: String,
    pub state_key: String,
    pub region: String,
    pub lock_table_name: String,
}

impl RemoteStateReference {
    pub fn for_job(job_id: &str, config: &RemoteStateConfig) -> Self {
        Self {
            state_bucket: config.bucket.clone(),
            state_key: state_key(job_id),
            region: config.region.clone(),
            lock_table_name: config.lock_table.clone(),
        }
    }
}

pub fn state_key(job_id: &str) -> String {
    format!("{job_id}/{STATE_OBJECT_NAME}")
}

pub fn render_backend_config(reference: &RemoteStateReference) -> String {
    format!(
        "terraform {{\n  backend \"s3\" {{\n    bucket         = \"{}\"\n    key            = \"{}\"\n    region         = \"{}\"\n    dynamodb_table = \"{}\"\n  }}\n}}\n",
        hcl_escape(&reference.state_bucket),
        hcl_escape(&reference.state_key),
        hcl_escape(&reference.region),
        hcl_escape(&reference.lock_table_name),
    )
}

/// Writes `backend.tf` into `work_dir`, replacing any existing file.
pub fn write_backend_config(
    work_dir: &Path,
    reference: &RemoteStateReference,
) -> Result<PathBuf, JobError> {
    let path = work_dir.join(BACKEND_FILE_NAME);
    fs::write(&path, render_backend_config(reference)).map_err(|error| {
        JobError::backend_wire(format!("failed to write '{}': {error}", path.display()))
    })?;
    Ok(path)
}

fn hcl_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            '\t' => escaped.push_str("\\t"),
            '$' | '%' if chars.peek() == Some(&'{') => {
                escaped.push(ch);
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}
