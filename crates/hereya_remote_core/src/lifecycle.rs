use std::fmt;

use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Initialized,
    SourceStaged,
    BackendWired,
    Executed,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::SourceStaged => "source_staged",
            Self::BackendWired => "backend_wired",
            Self::Executed => "executed",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear state machine of one job.
///
/// `BackendWired` is visited iff the job runs on the terraform backend. No
/// state may be skipped and both terminal states are final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobLifecycle {
    wires_backend: bool,
    history: Vec<JobState>,
}

impl JobLifecycle {
    pub fn new(backend: &Backend) -> Self {
        Self {
            wires_backend: matches!(backend, Backend::Terraform(_)),
            history: vec![JobState::Initialized],
        }
    }

    pub fn current(&self) -> JobState {
        self.history
            .last()
            .copied()
            .unwrap_or(JobState::Initialized)
    }

    pub fn history(&self) -> &[JobState] {
        &self.history
    }

    pub fn advance(&mut self, to: JobState) -> Result<(), JobError> {
        let from = self.current();
        if !self.allows(from, to) {
            return Err(JobError::InvalidTransition { from, to });
        }
        self.history.push(to);
        Ok(())
    }

    /// Moves a running job to `Failed`; a job that already ended stays put.
    pub fn fail(&mut self) {
        if !self.current().is_terminal() {
            self.history.push(JobState::Failed);
        }
    }

    fn allows(&self, from: JobState, to: JobState) -> bool {
        match (from, to) {
            (JobState::Initialized, JobState::SourceStaged) => true,
            (JobState::SourceStaged, JobState::BackendWired) => self.wires_backend,
            (JobState::SourceStaged, JobState::Executed) => !self.wires_backend,
            (JobState::BackendWired, JobState::Executed) => true,
            (JobState::Executed, JobState::Succeeded) => true,
            (from, JobState::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}
