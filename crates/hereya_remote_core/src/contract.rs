use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::JobError;

pub const ENV_JOB_ID: &str = "HEREYA_ID";
pub const ENV_IAC_TYPE: &str = "HEREYA_IAC_TYPE";
pub const ENV_DESTROY: &str = "HEREYA_DESTROY";
pub const ENV_INFRA_TYPE: &str = "HEREYA_INFRA_TYPE";
pub const ENV_PARAMETERS: &str = "HEREYA_PARAMETERS";
pub const ENV_WORKSPACE_ENV: &str = "HEREYA_WORKSPACE_ENV";
pub const ENV_PACKAGE_REPO_URL: &str = "PKG_REPO_URL";
pub const ENV_PROJECT_SOURCE_KEY: &str = "HEREYA_PROJECT_S3_KEY";
pub const ENV_DEPLOY: &str = "HEREYA_DEPLOY";
pub const ENV_SOURCE_CODE_BUCKET: &str = "HEREYA_SOURCE_CODE_BUCKET";
pub const ENV_STATE_BUCKET: &str = "HEREYA_TF_STATE_BUCKET";
pub const ENV_LOCK_TABLE: &str = "HEREYA_TF_LOCK_TABLE";
pub const ENV_STATE_REGION: &str = "HEREYA_TF_STATE_REGION";

/// Region fallbacks consulted, in order, when `HEREYA_TF_STATE_REGION` is unset.
pub const REGION_FALLBACK_VARIABLES: [&str; 2] = ["AWS_REGION", "AWS_DEFAULT_REGION"];

/// Every variable of the job environment contract, in declaration order.
pub const JOB_ENVIRONMENT_VARIABLES: [&str; 10] = [
    ENV_JOB_ID,
    ENV_IAC_TYPE,
    ENV_DESTROY,
    ENV_INFRA_TYPE,
    ENV_PARAMETERS,
    ENV_WORKSPACE_ENV,
    ENV_PACKAGE_REPO_URL,
    ENV_PROJECT_SOURCE_KEY,
    ENV_DEPLOY,
    ENV_SOURCE_CODE_BUCKET,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IacType {
    Plain,
    Terraform,
}

impl IacType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Terraform => "terraform",
        }
    }

    /// Missing or empty values select the plain backend.
    pub fn parse(raw: Option<&str>) -> Result<Self, String> {
        let value = raw.map(str::trim).unwrap_or_default();
        match value.to_ascii_lowercase().as_str() {
            "" | "plain" | "none" => Ok(Self::Plain),
            "terraform" => Ok(Self::Terraform),
            _ => Err(format!(
                "{ENV_IAC_TYPE} '{value}' is not supported (expected plain or terraform)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSourceLocation {
    pub bucket: String,
    pub key: String,
}

/// Immutable unit of work for one worker invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub id: String,
    pub iac_type: IacType,
    pub destroy: bool,
    pub infra_type: String,
    pub parameters: String,
    pub workspace_env: String,
    pub package_repo_url: String,
    /// Present iff the job deploys a pre-uploaded project source.
    pub project_source: Option<ProjectSourceLocation>,
}

impl JobDescriptor {
    pub fn deploy(&self) -> bool {
        self.project_source.is_some()
    }
}

/// Shared remote state coordinates injected into terraform jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteStateConfig {
    pub bucket: String,
    pub region: String,
    pub lock_table: String,
}

/// A validated job: the descriptor plus the infrastructure it needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    descriptor: JobDescriptor,
    remote_state: Option<RemoteStateConfig>,
}

impl JobRequest {
    /// Remote state must be supplied for terraform jobs and is dropped for plain ones.
    pub fn new(
        descriptor: JobDescriptor,
        remote_state: Option<RemoteStateConfig>,
    ) -> Result<Self, JobError> {
        validate_descriptor(&descriptor)?;
        let remote_state = match (descriptor.iac_type, remote_state) {
            (IacType::Plain, _) => None,
            (IacType::Terraform, Some(state)) => {
                validate_remote_state(&state)?;
                Some(state)
            }
            (IacType::Terraform, None) => {
                return Err(JobError::configuration(
                    "terraform jobs require remote state coordinates",
                ));
            }
        };

        Ok(Self {
            descriptor,
            remote_state,
        })
    }

    pub fn descriptor(&self) -> &JobDescriptor {
        &self.descriptor
    }

    /// Only terraform jobs carry remote state.
    pub fn remote_state(&self) -> Option<&RemoteStateConfig> {
        self.remote_state.as_ref()
    }
}

/// Reads the job environment contract through `lookup` and validates it.
///
/// All problems are collected so a misconfigured build project is fixed in
/// one round trip.
pub fn parse_job_environment(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<JobRequest, JobError> {
    let mut problems = Vec::new();

    let id = required(&lookup, ENV_JOB_ID, &mut problems);
    let iac_type = IacType::parse(lookup(ENV_IAC_TYPE).as_deref()).unwrap_or_else(|message| {
        problems.push(message);
        IacType::Plain
    });
    let destroy = flag(&lookup, ENV_DESTROY, &mut problems);
    let deploy = flag(&lookup, ENV_DEPLOY, &mut problems);
    let package_repo_url = required(&lookup, ENV_PACKAGE_REPO_URL, &mut problems);

    let project_source = if deploy {
        let bucket = required(&lookup, ENV_SOURCE_CODE_BUCKET, &mut problems);
        let key = required(&lookup, ENV_PROJECT_SOURCE_KEY, &mut problems);
        Some(ProjectSourceLocation { bucket, key })
    } else {
        None
    };

    let remote_state = if iac_type == IacType::Terraform {
        let bucket = required(&lookup, ENV_STATE_BUCKET, &mut problems);
        let lock_table = required(&lookup, ENV_LOCK_TABLE, &mut problems);
        let region = non_empty(&lookup, ENV_STATE_REGION)
            .or_else(|| {
                REGION_FALLBACK_VARIABLES
                    .iter()
                    .find_map(|name| non_empty(&lookup, name))
            })
            .unwrap_or_else(|| {
                problems.push(format!(
                    "{ENV_STATE_REGION} is required for terraform jobs (or set AWS_REGION)"
                ));
                String::new()
            });
        Some(RemoteStateConfig {
            bucket,
            region,
            lock_table,
        })
    } else {
        None
    };

    if !problems.is_empty() {
        return Err(JobError::configuration(problems.join("; ")));
    }

    let descriptor = JobDescriptor {
        id,
        iac_type,
        destroy,
        infra_type: lookup(ENV_INFRA_TYPE).unwrap_or_default(),
        parameters: lookup(ENV_PARAMETERS).unwrap_or_default(),
        workspace_env: lookup(ENV_WORKSPACE_ENV).unwrap_or_default(),
        package_repo_url,
        project_source,
    };

    JobRequest::new(descriptor, remote_state)
}

pub fn stable_contract_json(value: impl Serialize) -> String {
    serde_json::to_string(&value).expect("serialization of contract value should not fail")
}

/// Content fingerprint used to correlate log lines of repeated invocations.
pub fn job_fingerprint(descriptor: &JobDescriptor) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stable_contract_json(descriptor));
    format!("{:x}", hasher.finalize())
}

fn validate_descriptor(descriptor: &JobDescriptor) -> Result<(), JobError> {
    if descriptor.id.trim().is_empty() {
        return Err(JobError::configuration(format!("{ENV_JOB_ID} cannot be empty")));
    }
    if descriptor.package_repo_url.trim().is_empty() {
        return Err(JobError::configuration(format!(
            "{ENV_PACKAGE_REPO_URL} cannot be empty"
        )));
    }
    if let Some(source) = &descriptor.project_source {
        if source.bucket.trim().is_empty() {
            return Err(JobError::configuration(format!(
                "{ENV_SOURCE_CODE_BUCKET} cannot be empty when deploying"
            )));
        }
        if source.key.trim().is_empty() {
            return Err(JobError::configuration(format!(
                "{ENV_PROJECT_SOURCE_KEY} cannot be empty when deploying"
            )));
        }
    }
    Ok(())
}

fn validate_remote_state(state: &RemoteStateConfig) -> Result<(), JobError> {
    let fields = [
        (ENV_STATE_BUCKET, &state.bucket),
        (ENV_LOCK_TABLE, &state.lock_table),
        (ENV_STATE_REGION, &state.region),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(JobError::configuration(format!(
                "{name} cannot be empty for terraform jobs"
            )));
        }
    }
    Ok(())
}

/// The raw value, unless it is missing or blank.
fn non_empty(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|value| !value.trim().is_empty())
}

fn required(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    problems: &mut Vec<String>,
) -> String {
    non_empty(lookup, name).unwrap_or_else(|| {
        problems.push(format!("{name} must be configured"));
        String::new()
    })
}

fn flag(lookup: &impl Fn(&str) -> Option<String>, name: &str, problems: &mut Vec<String>) -> bool {
    let Some(raw) = non_empty(lookup, name) else {
        return false;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => {
            problems.push(format!("{name} must be 'true' or 'false', got '{raw}'"));
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let values: HashMap<String, String> = pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| values.get(name).cloned()
    }

    fn plain_job_pairs() -> Vec<(&'static str, &'static str)> {
        vec![
            (ENV_JOB_ID, "w1"),
            (ENV_IAC_TYPE, "plain"),
            (ENV_DESTROY, "false"),
            (ENV_INFRA_TYPE, "aws"),
            (ENV_PARAMETERS, "{\"size\":\"small\"}"),
            (ENV_WORKSPACE_ENV, "dev"),
            (ENV_PACKAGE_REPO_URL, "https://x/repo.git"),
            (ENV_DEPLOY, "false"),
        ]
    }

    #[test]
    fn parses_plain_job_without_deploy() {
        let request = parse_job_environment(lookup_from(&plain_job_pairs()))
            .expect("plain job should parse");
        let descriptor = request.descriptor();

        assert_eq!(descriptor.id, "w1");
        assert_eq!(descriptor.iac_type, IacType::Plain);
        assert!(!descriptor.deploy());
        assert_eq!(descriptor.parameters, "{\"size\":\"small\"}");
        assert!(request.remote_state().is_none());
    }

    #[test]
    fn ignores_project_source_key_when_not_deploying() {
        let mut pairs = plain_job_pairs();
        pairs.push((ENV_PROJECT_SOURCE_KEY, "proj/1"));

        let request = parse_job_environment(lookup_from(&pairs)).expect("job should parse");
        assert!(request.descriptor().project_source.is_none());
    }

    #[test]
    fn deploy_without_source_bucket_is_a_configuration_error() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_DEPLOY);
        pairs.push((ENV_DEPLOY, "true"));
        pairs.push((ENV_PROJECT_SOURCE_KEY, "proj/1"));

        let error = parse_job_environment(lookup_from(&pairs)).expect_err("should fail");
        assert!(matches!(error, JobError::Configuration(_)));
        assert!(error.to_string().contains(ENV_SOURCE_CODE_BUCKET));
    }

    #[test]
    fn deploy_with_blank_key_is_rejected() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_DEPLOY);
        pairs.push((ENV_DEPLOY, "TRUE"));
        pairs.push((ENV_SOURCE_CODE_BUCKET, "b"));
        pairs.push((ENV_PROJECT_SOURCE_KEY, "   "));

        let error = parse_job_environment(lookup_from(&pairs)).expect_err("should fail");
        assert!(error.to_string().contains(ENV_PROJECT_SOURCE_KEY));
    }

    #[test]
    fn deploy_with_full_coordinates_carries_project_source() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_DEPLOY);
        pairs.push((ENV_DEPLOY, "true"));
        pairs.push((ENV_SOURCE_CODE_BUCKET, "b"));
        pairs.push((ENV_PROJECT_SOURCE_KEY, "proj/1"));

        let request = parse_job_environment(lookup_from(&pairs)).expect("job should parse");
        assert_eq!(
            request.descriptor().project_source,
            Some(ProjectSourceLocation {
                bucket: "b".to_string(),
                key: "proj/1".to_string(),
            })
        );
    }

    #[test]
    fn unknown_iac_type_is_rejected() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_IAC_TYPE);
        pairs.push((ENV_IAC_TYPE, "pulumi"));

        let error = parse_job_environment(lookup_from(&pairs)).expect_err("should fail");
        assert!(error.to_string().contains("'pulumi' is not supported"));
    }

    #[test]
    fn job_id_reaches_descriptor_verbatim() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_JOB_ID);
        pairs.push((ENV_JOB_ID, " team-a/w1 "));

        let request = parse_job_environment(lookup_from(&pairs)).expect("job should parse");
        assert_eq!(request.descriptor().id, " team-a/w1 ");
    }

    #[test]
    fn blank_job_id_is_rejected() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_JOB_ID);
        pairs.push((ENV_JOB_ID, "  \t"));

        let error = parse_job_environment(lookup_from(&pairs)).expect_err("blank id should fail");
        assert!(error.to_string().contains("HEREYA_ID must be configured"));
    }

    #[test]
    fn missing_flags_and_passthroughs_default_to_empty() {
        let request = parse_job_environment(lookup_from(&[
            (ENV_JOB_ID, "w1"),
            (ENV_PACKAGE_REPO_URL, "https://x/repo.git"),
            (ENV_SOURCE_CODE_BUCKET, "b"),
            (ENV_PROJECT_SOURCE_KEY, "proj/1"),
        ]))
        .expect("minimal job should parse");
        let descriptor = request.descriptor();

        assert!(!descriptor.destroy);
        assert!(!descriptor.deploy());
        assert_eq!(descriptor.project_source, None);
        assert_eq!(descriptor.infra_type, "");
        assert_eq!(descriptor.parameters, "");
        assert_eq!(descriptor.workspace_env, "");
    }

    #[test]
    fn flags_tolerate_surrounding_whitespace() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_DESTROY);
        pairs.push((ENV_DESTROY, " True\n"));

        let request = parse_job_environment(lookup_from(&pairs)).expect("job should parse");
        assert!(request.descriptor().destroy);
    }

    #[test]
    fn missing_iac_type_selects_plain() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_IAC_TYPE);

        let request = parse_job_environment(lookup_from(&pairs)).expect("job should parse");
        assert_eq!(request.descriptor().iac_type, IacType::Plain);
    }

    #[test]
    fn reports_every_problem_in_one_error() {
        let error = parse_job_environment(lookup_from(&[(ENV_DESTROY, "maybe")]))
            .expect_err("should fail");
        let message = error.to_string();

        assert!(message.contains("HEREYA_ID must be configured"));
        assert!(message.contains("PKG_REPO_URL must be configured"));
        assert!(message.contains("HEREYA_DESTROY must be 'true' or 'false', got 'maybe'"));
    }

    #[test]
    fn terraform_requires_state_coordinates() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_IAC_TYPE);
        pairs.push((ENV_IAC_TYPE, "terraform"));

        let error = parse_job_environment(lookup_from(&pairs)).expect_err("should fail");
        let message = error.to_string();
        assert!(message.contains(ENV_STATE_BUCKET));
        assert!(message.contains(ENV_LOCK_TABLE));
        assert!(message.contains(ENV_STATE_REGION));
    }

    #[test]
    fn terraform_region_falls_back_to_aws_region() {
        let mut pairs = plain_job_pairs();
        pairs.retain(|(name, _)| *name != ENV_IAC_TYPE);
        pairs.extend([
            (ENV_IAC_TYPE, "Terraform"),
            (ENV_STATE_BUCKET, "state-bucket"),
            (ENV_LOCK_TABLE, "locks"),
            ("AWS_REGION", "eu-west-1"),
        ]);

        let request = parse_job_environment(lookup_from(&pairs)).expect("job should parse");
        assert_eq!(request.descriptor().iac_type, IacType::Terraform);
        assert_eq!(
            request.remote_state(),
            Some(&RemoteStateConfig {
                bucket: "state-bucket".to_string(),
                region: "eu-west-1".to_string(),
                lock_table: "locks".to_string(),
            })
        );
    }

    #[test]
    fn plain_request_drops_injected_remote_state() {
        let request = parse_job_environment(lookup_from(&plain_job_pairs()))
            .expect("job should parse");
        let rebuilt = JobRequest::new(
            request.descriptor().clone(),
            Some(RemoteStateConfig {
                bucket: "b".to_string(),
                region: "r".to_string(),
                lock_table: "t".to_string(),
            }),
        )
        .expect("plain request should build");

        assert!(rebuilt.remote_state().is_none());
    }

    #[test]
    fn fingerprint_is_stable_and_sensitive_to_id() {
        let request = parse_job_environment(lookup_from(&plain_job_pairs()))
            .expect("job should parse");
        let mut other = request.descriptor().clone();
        other.id = "w2".to_string();

        assert_eq!(
            job_fingerprint(request.descriptor()),
            job_fingerprint(request.descriptor())
        );
        assert_ne!(job_fingerprint(request.descriptor()), job_fingerprint(&other));
    }
}
