use crate::contract::{IacType, JobRequest};
use crate::state_backend::RemoteStateReference;

/// Execution strategy of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Plain,
    Terraform(RemoteStateReference),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        self.iac_type().as_str()
    }

    pub fn iac_type(&self) -> IacType {
        match self {
            Self::Plain => IacType::Plain,
            Self::Terraform(_) => IacType::Terraform,
        }
    }

    pub fn remote_state(&self) -> Option<&RemoteStateReference> {
        match self {
            Self::Plain => None,
            Self::Terraform(reference) => Some(reference),
        }
    }
}

/// Dispatches on the validated request. `JobRequest` only carries remote state
/// for terraform jobs, so no further validation happens here.
pub fn select_backend(request: &JobRequest) -> Backend {
    match request.remote_state() {
        Some(config) => Backend::Terraform(RemoteStateReference::for_job(
            &request.descriptor().id,
            config,
        )),
        None => Backend::Plain,
    }
}
