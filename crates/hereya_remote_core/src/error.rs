use thiserror::Error;

use crate::lifecycle::JobState;

/// Terminal failure of one job invocation.
///
/// Every variant ends the job; the pipeline never retries or compensates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("source fetch error: {0}")]
    SourceFetch(String),

    #[error("backend wire error: {0}")]
    BackendWire(String),

    #[error("execution error: {message}")]
    Execution { code: Option<i32>, message: String },

    #[error("invalid job state transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },
}

impl JobError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn source_fetch(message: impl Into<String>) -> Self {
        Self::SourceFetch(message.into())
    }

    pub fn backend_wire(message: impl Into<String>) -> Self {
        Self::BackendWire(message.into())
    }

    /// Stable snake_case name used in structured log events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration_error",
            Self::SourceFetch(_) => "source_fetch_error",
            Self::BackendWire(_) => "backend_wire_error",
            Self::Execution { .. } => "execution_error",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Process exit status a worker should report for this failure.
    ///
    /// The tool's own exit code is surfaced verbatim; everything else maps to 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_error_surfaces_tool_exit_code() {
        let error = JobError::Execution {
            code: Some(3),
            message: "tool exited with code 3".to_string(),
        };
        assert_eq!(error.exit_code(), 3);
        assert_eq!(error.kind(), "execution_error");
    }

    #[test]
    fn non_execution_errors_exit_with_one() {
        assert_eq!(JobError::configuration("missing HEREYA_ID").exit_code(), 1);
        assert_eq!(JobError::source_fetch("clone failed").exit_code(), 1);
        let signalled = JobError::Execution {
            code: None,
            message: "terminated by signal 9".to_string(),
        };
        assert_eq!(signalled.exit_code(), 1);
    }

    #[test]
    fn display_includes_category() {
        let error = JobError::backend_wire("permission denied");
        assert_eq!(error.to_string(), "backend wire error: permission denied");
    }
}
