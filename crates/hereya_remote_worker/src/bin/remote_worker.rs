use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use hereya_remote_worker::adapters::object_store::ProjectSourceStore;
use hereya_remote_worker::adapters::package_source::GitCliFetcher;
use hereya_remote_worker::adapters::tool_runner::ProcessToolRunner;
use hereya_remote_worker::config::WorkerConfig;
use hereya_remote_worker::handlers::job::{handle_job, JobDependencies, JobReport};
use hereya_remote_worker::runtime::contract::parse_job_environment;
use hereya_remote_worker::runtime::error::JobError;
use hereya_remote_worker::runtime::tool_env::DEFAULT_TOOL;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const COMPONENT: &str = "remote_worker";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

/// Runs one hereya remote execution job described by the process environment.
#[derive(Debug, Parser)]
#[command(name = "remote_worker")]
struct Cli {
    /// Directory the package and project source are staged under.
    #[arg(long, env = "HEREYA_WORK_ROOT", default_value = ".")]
    work_root: PathBuf,

    #[arg(long, env = "HEREYA_TOOL", default_value = DEFAULT_TOOL)]
    tool: String,

    /// Do not run `npm install` in the cloned package.
    #[arg(long, env = "HEREYA_SKIP_PACKAGE_INSTALL")]
    skip_package_install: bool,

    #[arg(long, env = "HEREYA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,
}

impl Cli {
    fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            work_root: self.work_root.clone(),
            tool: self.tool.clone(),
            install_package_dependencies: !self.skip_package_install,
            ..WorkerConfig::default()
        }
    }
}

struct S3ProjectSourceStore {
    s3_client: aws_sdk_s3::Client,
}

impl ProjectSourceStore for S3ProjectSourceStore {
    fn list_object_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let prefix = prefix.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let mut keys = Vec::new();
                let mut continuation_token: Option<String> = None;
                loop {
                    let output = client
                        .list_objects_v2()
                        .bucket(&bucket)
                        .prefix(&prefix)
                        .set_continuation_token(continuation_token.take())
                        .send()
                        .await
                        .map_err(|error| format!("failed to list objects in s3: {error}"))?;
                    keys.extend(
                        output
                            .contents()
                            .iter()
                            .filter_map(|object| object.key().map(str::to_string)),
                    );
                    match output.next_continuation_token() {
                        Some(token) => continuation_token = Some(token.to_string()),
                        None => break,
                    }
                }
                Ok::<_, String>(keys)
            })
        })
    }

    fn read_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, String> {
        let client = self.s3_client.clone();
        let bucket = bucket.to_string();
        let object_key = key.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .get_object()
                    .bucket(bucket)
                    .key(object_key)
                    .send()
                    .await
                    .map_err(|error| format!("failed to read object from s3: {error}"))?;
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|error| format!("failed to read object body from s3: {error}"))?;
                Ok::<_, String>(body.into_bytes().to_vec())
            })
        })
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Text => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
    }
}

fn log_report(report: &JobReport) {
    match serde_json::to_string(report) {
        Ok(json) => info!(component = COMPONENT, event = "job_report", report = %json),
        Err(error) => warn!(
            component = COMPONENT,
            event = "job_report_unavailable",
            error = %error,
        ),
    }
}

fn exit_status(error: &JobError) -> ExitCode {
    ExitCode::from(exit_byte(error))
}

fn exit_byte(error: &JobError) -> u8 {
    u8::try_from(error.exit_code()).unwrap_or(1)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let request = match parse_job_environment(|name| std::env::var(name).ok()) {
        Ok(value) => value,
        Err(job_error) => {
            error!(
                component = COMPONENT,
                event = "job_rejected",
                error_kind = job_error.kind(),
                error = %job_error,
            );
            return exit_status(&job_error);
        }
    };

    let aws_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let source_store = S3ProjectSourceStore {
        s3_client: aws_sdk_s3::Client::new(&aws_config),
    };
    let package_fetcher = GitCliFetcher::default();
    let tool_runner = ProcessToolRunner;
    let deps = JobDependencies {
        package_fetcher: &package_fetcher,
        source_store: &source_store,
        tool_runner: &tool_runner,
    };

    match handle_job(&request, &cli.worker_config(), &deps) {
        Ok(report) => {
            log_report(&report);
            ExitCode::SUCCESS
        }
        Err(failure) => {
            log_report(&failure.report);
            exit_status(&failure.error)
        }
    }
}
