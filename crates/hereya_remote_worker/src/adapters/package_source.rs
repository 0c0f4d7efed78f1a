use std::path::Path;
use std::process::{Command, Stdio};

pub trait PackageFetcher {
    /// Materializes the repository at `repo_url` into the empty `destination`.
    fn fetch(&self, repo_url: &str, destination: &Path) -> Result<(), String>;
}

/// Clones with the `git` command line client.
#[derive(Debug, Clone)]
pub struct GitCliFetcher {
    pub git_program: String,
}

impl Default for GitCliFetcher {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
        }
    }
}

impl PackageFetcher for GitCliFetcher {
    fn fetch(&self, repo_url: &str, destination: &Path) -> Result<(), String> {
        let output = Command::new(&self.git_program)
            .args(["clone", "--quiet", "--", repo_url])
            .arg(destination)
            // a missing credential must fail the clone, not wait on a prompt
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .output()
            .map_err(|error| format!("failed to execute {}: {error}", self.git_program))?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(format!(
            "git clone of '{repo_url}' failed ({}): {}",
            output.status,
            stderr.trim()
        ))
    }
}
