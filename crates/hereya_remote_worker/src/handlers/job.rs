use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info};

use crate::adapters::object_store::ProjectSourceStore;
use crate::adapters::package_source::PackageFetcher;
use crate::adapters::tool_runner::{ToolInvocation, ToolRunner};
use crate::config::WorkerConfig;
use crate::runtime::backend::{select_backend, Backend};
use crate::runtime::contract::{job_fingerprint, JobRequest};
use crate::runtime::error::JobError;
use crate::runtime::lifecycle::{JobLifecycle, JobState};
use crate::runtime::state_backend::write_backend_config;
use crate::runtime::tool_env::{remote_exec_args, tool_environment};
use crate::staging::{
    describe_exit, prepare_package_dependencies, stage_package_source, stage_project_source,
};

const COMPONENT: &str = "remote_worker";

pub struct JobDependencies<'a> {
    pub package_fetcher: &'a dyn PackageFetcher,
    pub source_store: &'a dyn ProjectSourceStore,
    pub tool_runner: &'a dyn ToolRunner,
}

/// Summary of one job, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub fingerprint: String,
    pub backend: &'static str,
    pub states: Vec<JobState>,
    pub work_dir: Option<PathBuf>,
    pub project_dir: Option<PathBuf>,
    pub backend_file: Option<PathBuf>,
    pub exit_code: Option<i32>,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub error: JobError,
    pub report: JobReport,
}

/// Stages sources, wires the state backend when needed and runs
/// `<tool> remote exec` for one validated job.
pub fn handle_job(
    request: &JobRequest,
    config: &WorkerConfig,
    deps: &JobDependencies<'_>,
) -> Result<JobReport, JobFailure> {
    let descriptor = request.descriptor();
    let backend = select_backend(request);
    let mut lifecycle = JobLifecycle::new(&backend);
    let mut report = JobReport {
        job_id: descriptor.id.clone(),
        fingerprint: job_fingerprint(descriptor),
        backend: backend.name(),
        states: Vec::new(),
        work_dir: None,
        project_dir: None,
        backend_file: None,
        exit_code: None,
        started_at: Utc::now().to_rfc3339(),
        finished_at: String::new(),
    };

    info!(
        component = COMPONENT,
        event = "job_started",
        job_id = %report.job_id,
        fingerprint = %report.fingerprint,
        backend = report.backend,
        deploy = descriptor.deploy(),
        destroy = descriptor.destroy,
    );

    let outcome = run_pipeline(request, &backend, config, deps, &mut lifecycle, &mut report);
    if outcome.is_err() {
        lifecycle.fail();
    }
    report.states = lifecycle.history().to_vec();
    report.finished_at = Utc::now().to_rfc3339();

    match outcome {
        Ok(()) => {
            info!(
                component = COMPONENT,
                event = "job_succeeded",
                job_id = %report.job_id,
                fingerprint = %report.fingerprint,
            );
            Ok(report)
        }
        Err(job_error) => {
            error!(
                component = COMPONENT,
                event = "job_failed",
                job_id = %report.job_id,
                fingerprint = %report.fingerprint,
                error_kind = job_error.kind(),
                error = %job_error,
            );
            Err(JobFailure {
                error: job_error,
                report,
            })
        }
    }
}

fn run_pipeline(
    request: &JobRequest,
    backend: &Backend,
    config: &WorkerConfig,
    deps: &JobDependencies<'_>,
    lifecycle: &mut JobLifecycle,
    report: &mut JobReport,
) -> Result<(), JobError> {
    let descriptor = request.descriptor();
    let layout = config.layout()?;

    let work_dir = stage_package_source(
        deps.package_fetcher,
        &descriptor.package_repo_url,
        layout.package_dir(),
    )?;
    let work_dir = resolved_dir(&work_dir)?;
    report.work_dir = Some(work_dir.clone());

    if config.install_package_dependencies {
        prepare_package_dependencies(deps.tool_runner, &config.npm_program, &work_dir)?;
    }

    let mut object_count = 0;
    let project_dir = match &descriptor.project_source {
        Some(location) => {
            let staged = stage_project_source(deps.source_store, location, layout.project_dir())?;
            object_count = staged.object_count;
            Some(resolved_dir(&staged.dir)?)
        }
        None => None,
    };
    report.project_dir = project_dir.clone();

    lifecycle.advance(JobState::SourceStaged)?;
    info!(
        component = COMPONENT,
        event = "source_staged",
        job_id = %descriptor.id,
        fingerprint = %report.fingerprint,
        work_dir = %work_dir.display(),
        project_dir = ?project_dir,
        project_objects = object_count,
    );

    if let Some(reference) = backend.remote_state() {
        let backend_file = write_backend_config(&work_dir, reference)?;
        report.backend_file = Some(backend_file.clone());
        lifecycle.advance(JobState::BackendWired)?;
        info!(
            component = COMPONENT,
            event = "backend_wired",
            job_id = %descriptor.id,
            fingerprint = %report.fingerprint,
            state_bucket = %reference.state_bucket,
            state_key = %reference.state_key,
            lock_table = %reference.lock_table_name,
            backend_file = %backend_file.display(),
        );
    }

    let invocation = ToolInvocation {
        program: config.tool.clone(),
        args: remote_exec_args(&work_dir, project_dir.as_deref()),
        current_dir: work_dir.clone(),
        env: tool_environment(descriptor),
    };
    let exit = deps
        .tool_runner
        .run(&invocation)
        .map_err(|message| JobError::Execution {
            code: None,
            message,
        })?;
    report.exit_code = exit.code;
    lifecycle.advance(JobState::Executed)?;

    if !exit.success() {
        return Err(JobError::Execution {
            code: exit.code,
            message: format!(
                "{} remote exec exited with {}",
                config.tool,
                describe_exit(exit.code)
            ),
        });
    }

    lifecycle.advance(JobState::Succeeded)
}

/// Absolute form of a staged directory; the tool runs inside `work_dir`, so
/// relative arguments would not resolve.
fn resolved_dir(dir: &Path) -> Result<PathBuf, JobError> {
    fs::canonicalize(dir).map_err(|error| {
        JobError::source_fetch(format!("failed to resolve '{}': {error}", dir.display()))
    })
}
