use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::adapters::object_store::ProjectSourceStore;
use crate::adapters::package_source::PackageFetcher;
use crate::adapters::tool_runner::{ToolInvocation, ToolRunner};
use crate::runtime::contract::ProjectSourceLocation;
use crate::runtime::error::JobError;
use crate::runtime::layout::{object_relative_path, source_prefix};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedProjectSource {
    pub dir: PathBuf,
    pub object_count: usize,
}

/// Clones the package repository into `destination`, which must be absent or empty.
pub fn stage_package_source(
    fetcher: &dyn PackageFetcher,
    repo_url: &str,
    destination: &Path,
) -> Result<PathBuf, JobError> {
    ensure_empty_dir(destination)?;
    fetcher
        .fetch(repo_url, destination)
        .map_err(JobError::SourceFetch)?;
    if !destination.is_dir() {
        return Err(JobError::source_fetch(format!(
            "package '{repo_url}' did not produce '{}'",
            destination.display()
        )));
    }
    Ok(destination.to_path_buf())
}

/// Copies every object under `location.key` into `destination`.
///
/// Objects are written in key order, so staging the same object set into a
/// fresh directory always yields the same tree. An empty prefix fails closed.
pub fn stage_project_source(
    store: &dyn ProjectSourceStore,
    location: &ProjectSourceLocation,
    destination: &Path,
) -> Result<StagedProjectSource, JobError> {
    ensure_empty_dir(destination)?;

    let prefix = source_prefix(&location.key);
    let keys = store
        .list_object_keys(&location.bucket, &prefix)
        .map_err(|error| {
            JobError::source_fetch(format!(
                "failed to list s3://{}/{prefix}: {error}",
                location.bucket
            ))
        })?;

    let mut files = BTreeMap::new();
    for key in keys {
        if let Some(relative) = object_relative_path(&prefix, &key).map_err(JobError::SourceFetch)? {
            files.insert(key, relative);
        }
    }

    if files.is_empty() {
        return Err(JobError::source_fetch(format!(
            "no project source objects found under s3://{}/{prefix}",
            location.bucket
        )));
    }

    for (key, relative) in &files {
        let body = store.read_object(&location.bucket, key).map_err(|error| {
            JobError::source_fetch(format!(
                "failed to read s3://{}/{key}: {error}",
                location.bucket
            ))
        })?;
        let target = destination.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|error| write_error(parent, error))?;
        }
        fs::write(&target, body).map_err(|error| write_error(&target, error))?;
    }

    Ok(StagedProjectSource {
        dir: destination.to_path_buf(),
        object_count: files.len(),
    })
}

/// Runs `npm install` in `package_dir` when it carries a `package.json`.
///
/// Returns whether the install ran.
pub fn prepare_package_dependencies(
    runner: &dyn ToolRunner,
    npm_program: &str,
    package_dir: &Path,
) -> Result<bool, JobError> {
    if !package_dir.join("package.json").is_file() {
        return Ok(false);
    }

    let invocation = ToolInvocation {
        program: npm_program.to_string(),
        args: vec!["install".into()],
        current_dir: package_dir.to_path_buf(),
        env: BTreeMap::new(),
    };
    let exit = runner
        .run(&invocation)
        .map_err(|error| JobError::source_fetch(format!("package install failed: {error}")))?;
    if !exit.success() {
        return Err(JobError::source_fetch(format!(
            "{npm_program} install exited with {}",
            describe_exit(exit.code)
        )));
    }
    Ok(true)
}

pub(crate) fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

fn ensure_empty_dir(dir: &Path) -> Result<(), JobError> {
    if dir.exists() {
        if !dir.is_dir() {
            return Err(JobError::source_fetch(format!(
                "staging path '{}' is not a directory",
                dir.display()
            )));
        }
        let mut entries = fs::read_dir(dir).map_err(|error| write_error(dir, error))?;
        if entries.next().is_some() {
            return Err(JobError::source_fetch(format!(
                "staging directory '{}' is not empty",
                dir.display()
            )));
        }
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|error| write_error(dir, error))
}

fn write_error(path: &Path, error: std::io::Error) -> JobError {
    JobError::source_fetch(format!("failed to stage '{}': {error}", path.display()))
}
