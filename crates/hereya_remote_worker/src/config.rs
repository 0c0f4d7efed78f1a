use std::path::PathBuf;

use crate::runtime::error::JobError;
use crate::runtime::layout::StagingLayout;
use crate::runtime::tool_env::DEFAULT_TOOL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub work_root: PathBuf,
    /// External CLI invoked as `<tool> remote exec`.
    pub tool: String,
    pub npm_program: String,
    /// Run `npm install` in the package directory when it has a `package.json`.
    pub install_package_dependencies: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("."),
            tool: DEFAULT_TOOL.to_string(),
            npm_program: "npm".to_string(),
            install_package_dependencies: true,
        }
    }
}

impl WorkerConfig {
    pub fn layout(&self) -> Result<StagingLayout, JobError> {
        StagingLayout::under(&self.work_root)
    }
}
