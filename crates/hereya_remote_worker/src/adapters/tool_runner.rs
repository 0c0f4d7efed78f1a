use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Command;

/// One subprocess launch. `env` is layered on top of the worker's environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<OsString>,
    pub current_dir: PathBuf,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolExit {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ToolExit {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

pub trait ToolRunner {
    /// Runs the invocation to completion. `Err` means it could not be started.
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolExit, String>;
}

/// Runs tools as child processes with inherited stdio, so their logs pass
/// through untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessToolRunner;

impl ToolRunner for ProcessToolRunner {
    fn run(&self, invocation: &ToolInvocation) -> Result<ToolExit, String> {
        let status = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.current_dir)
            .envs(&invocation.env)
            .status()
            .map_err(|error| format!("failed to execute {}: {error}", invocation.program))?;

        Ok(ToolExit {
            code: status.code(),
        })
    }
}
