use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::Path;

use crate::contract::{
    JobDescriptor, ENV_DEPLOY, ENV_DESTROY, ENV_IAC_TYPE, ENV_INFRA_TYPE, ENV_JOB_ID,
    ENV_PACKAGE_REPO_URL, ENV_PARAMETERS, ENV_PROJECT_SOURCE_KEY, ENV_SOURCE_CODE_BUCKET,
    ENV_WORKSPACE_ENV,
};

pub const DEFAULT_TOOL: &str = "hereya";

/// Re-serializes the descriptor into the variables the tool reads.
///
/// Project source variables are only present for deploy jobs.
pub fn tool_environment(descriptor: &JobDescriptor) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        (ENV_JOB_ID.to_string(), descriptor.id.clone()),
        (
            ENV_IAC_TYPE.to_string(),
            descriptor.iac_type.as_str().to_string(),
        ),
        (ENV_DESTROY.to_string(), descriptor.destroy.to_string()),
        (ENV_INFRA_TYPE.to_string(), descriptor.infra_type.clone()),
        (ENV_PARAMETERS.to_string(), descriptor.parameters.clone()),
        (ENV_WORKSPACE_ENV.to_string(), descriptor.workspace_env.clone()),
        (
            ENV_PACKAGE_REPO_URL.to_string(),
            descriptor.package_repo_url.clone(),
        ),
        (ENV_DEPLOY.to_string(), descriptor.deploy().to_string()),
    ]);

    if let Some(source) = &descriptor.project_source {
        env.insert(ENV_SOURCE_CODE_BUCKET.to_string(), source.bucket.clone());
        env.insert(ENV_PROJECT_SOURCE_KEY.to_string(), source.key.clone());
    }

    env
}

/// `remote exec <work_dir> [--source <project_dir>]`
pub fn remote_exec_args(work_dir: &Path, project_dir: Option<&Path>) -> Vec<OsString> {
    let mut args = vec![
        OsString::from("remote"),
        OsString::from("exec"),
        work_dir.as_os_str().to_os_string(),
    ];
    if let Some(project_dir) = project_dir {
        args.push(OsString::from("--source"));
        args.push(project_dir.as_os_str().to_os_string());
    }
    args
}
