use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use hereya_remote_core::provisioning::{bootstrap_plan, validate_plan, BootstrapSettings};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const WORKER_PACKAGE: &str = "hereya_remote_worker";
const WORKER_BIN: &str = "remote_worker";

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the hereya remote worker workspace",
    long_about = "A unified CLI for CI checks, packaging the remote worker binary,\n\
                  and printing the bootstrap provisioning plan."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run CI checks (fmt, clippy, tests)
    Ci,
    /// Build the remote worker and zip it for upload to the build environment
    Package {
        /// Compilation target triple for the worker binary
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for the binary
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
        /// Directory the zip is written to
        #[arg(long, default_value = "dist")]
        dist_dir: PathBuf,
    },
    /// Print the bootstrap provisioning plan as JSON
    BootstrapPlan {
        /// Build project name
        #[arg(long, env = "HEREYA_BUILD_PROJECT_NAME")]
        project_name: Option<String>,
        /// Write the plan to a file instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn package_worker(target: &str, profile: BuildProfile, dist_dir: &Path) {
    ensure_rust_target_installed(target);

    step("Build remote worker binary");
    let mut cargo_args = vec![
        "build",
        "-p",
        WORKER_PACKAGE,
        "--target",
        target,
        "--bin",
        WORKER_BIN,
    ];
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package remote worker zip artifact");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    fs::create_dir_all(dist_dir).expect("failed to create dist directory");

    let entry_name = binary_name(WORKER_BIN, target);
    let zip_path = dist_dir.join(format!("{WORKER_BIN}.zip"));
    package_binary_zip(&target_dir.join(&entry_name), &entry_name, &zip_path);

    eprintln!("\nPackaged artifact:\n- {}", zip_path.display());
    eprintln!(
        "Upload it to the bucket exported as `hereyaWorkerArtifactBucketName` under key `{}`.",
        BootstrapSettings::default().worker_artifact_key
    );
}

fn ensure_rust_target_installed(target: &str) {
    let output = Command::new("rustup")
        .args(["target", "list", "--installed"])
        .output();

    let output = match output {
        Ok(value) => value,
        Err(error) => {
            eprintln!(
                "warning: failed to run `rustup target list --installed` ({error}); continuing without target preflight"
            );
            return;
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "failed to list installed rust targets; run `rustup target list --installed` manually. details: {}",
            stderr.trim()
        );
    }

    let installed = String::from_utf8_lossy(&output.stdout);
    if !installed.lines().any(|line| line.trim() == target) {
        panic!(
            "required rust target `{target}` is not installed. install it with `rustup target add {target}` and re-run `cargo run -p xtask -- package`"
        );
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_binary_zip(binary_path: &Path, entry_name: &str, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected worker binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read worker binary");
    let file = fs::File::create(zip_path).expect("failed to create worker zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file(entry_name, options)
        .expect("failed to start worker entry in zip");
    zip.write_all(&binary).expect("failed to write worker entry");
    zip.finish().expect("failed to finish worker zip");
}

fn print_bootstrap_plan(project_name: Option<String>, output: Option<&Path>) {
    let mut settings = BootstrapSettings::default();
    if let Some(name) = project_name {
        settings.project_name = name;
    }

    let plan = bootstrap_plan(&settings);
    if let Err(error) = validate_plan(&plan) {
        eprintln!("{error}");
        exit(1);
    }

    let json = serde_json::to_string_pretty(&plan).expect("failed to serialize bootstrap plan");
    match output {
        Some(path) => {
            fs::write(path, format!("{json}\n")).expect("failed to write bootstrap plan");
            eprintln!("Wrote bootstrap plan to {}", path.display());
        }
        None => println!("{json}"),
    }
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    step("Test hereya_remote_core");
    run_cargo(&["test", "-p", "hereya_remote_core"]);

    step("Test hereya_remote_worker");
    run_cargo(&["test", "-p", WORKER_PACKAGE]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => {
            ci_check();
            eprintln!("\nCI job passed.");
        }
        Commands::Package {
            target,
            profile,
            dist_dir,
        } => {
            package_worker(&target, profile, &dist_dir);
        }
        Commands::BootstrapPlan {
            project_name,
            output,
        } => {
            print_bootstrap_plan(project_name, output.as_deref());
        }
    }
}
