//! Declarative records of the bootstrap stack.
//!
//! The stack that hosts remote jobs is a handful of plain records (buckets,
//! a lock table and a build project) processed generically. Nothing here
//! talks to a provisioning API; the plan is rendered as JSON for whichever
//! deployment tool applies it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::contract::{
    ENV_LOCK_TABLE, ENV_SOURCE_CODE_BUCKET, ENV_STATE_BUCKET, ENV_STATE_REGION,
    JOB_ENVIRONMENT_VARIABLES,
};

pub const SOURCE_BUCKET_ID: &str = "hereya-projects-source-code";
pub const STATE_BUCKET_ID: &str = "hereya-terraform-state";
pub const LOCK_TABLE_ID: &str = "hereya-terraform-locks";
pub const BUILD_PROJECT_ID: &str = "hereya-remote-exec";
pub const ARTIFACT_BUCKET_ID: &str = "hereya-remote-worker-artifacts";

/// Build project variables locating the packaged worker binary.
pub const ENV_WORKER_ARTIFACT_BUCKET: &str = "HEREYA_WORKER_ARTIFACT_BUCKET";
pub const ENV_WORKER_ARTIFACT_KEY: &str = "HEREYA_WORKER_ARTIFACT_KEY";

/// Partition key terraform's S3 backend expects on its lock table.
pub const LOCK_TABLE_PARTITION_KEY: &str = "LockID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    Destroy,
    Retain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSpec {
    pub logical_id: String,
    pub versioned: bool,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub logical_id: String,
    pub partition_key: String,
    pub partition_key_type: String,
    pub billing_mode: String,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum ValueSource {
    Literal { value: String },
    ResourceAttribute { logical_id: String, attribute: String },
    StackRegion,
}

impl ValueSource {
    fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    fn attribute(logical_id: &str, attribute: &str) -> Self {
        Self::ResourceAttribute {
            logical_id: logical_id.to_string(),
            attribute: attribute.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPhase {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub runtime_versions: BTreeMap<String, String>,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    pub shell: String,
    pub phases: Vec<BuildPhase>,
}

/// Zipped worker binary the install phase puts on the `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerArtifactSpec {
    pub bucket: ValueSource,
    pub key: String,
    pub binary: String,
    pub install_dir: String,
}

impl WorkerArtifactSpec {
    pub fn install_commands(&self) -> Vec<String> {
        let archive = format!("/tmp/{}.zip", self.binary);
        vec![
            format!(
                "aws s3 cp \"s3://${{{ENV_WORKER_ARTIFACT_BUCKET}}}/${{{ENV_WORKER_ARTIFACT_KEY}}}\" {archive}"
            ),
            format!("unzip -o {archive} -d {}", self.install_dir),
            format!("chmod +x {}/{}", self.install_dir, self.binary),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildProjectSpec {
    pub logical_id: String,
    pub project_name: String,
    pub build_image: String,
    pub environment: BTreeMap<String, ValueSource>,
    pub build_spec: BuildSpec,
    pub worker_artifact: WorkerArtifactSpec,
    pub managed_policies: Vec<String>,
    pub retention: RetentionPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    Bucket(BucketSpec),
    Table(TableSpec),
    BuildProject(BuildProjectSpec),
}

impl ResourceSpec {
    pub fn logical_id(&self) -> &str {
        match self {
            Self::Bucket(spec) => &spec.logical_id,
            Self::Table(spec) => &spec.logical_id,
            Self::BuildProject(spec) => &spec.logical_id,
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        match self {
            Self::Bucket(spec) => spec.retention,
            Self::Table(spec) => spec.retention,
            Self::BuildProject(spec) => spec.retention,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackOutput {
    pub name: String,
    pub value: ValueSource,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapPlan {
    pub resources: Vec<ResourceSpec>,
    pub outputs: Vec<StackOutput>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapSettings {
    pub project_name: String,
    pub build_image: String,
    pub node_runtime: String,
    /// Runs before the worker artifact is installed.
    pub install_commands: Vec<String>,
    pub worker_binary: String,
    /// Object key of the zip `xtask package` produces.
    pub worker_artifact_key: String,
    pub worker_install_dir: String,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            project_name: "hereyaRemoteExec".to_string(),
            build_image: "aws/codebuild/standard:7.0".to_string(),
            node_runtime: "20.x".to_string(),
            install_commands: vec!["npm install -g hereya-cli".to_string()],
            worker_binary: "remote_worker".to_string(),
            worker_artifact_key: "remote_worker.zip".to_string(),
            worker_install_dir: "/usr/local/bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid bootstrap plan: {0}")]
pub struct PlanValidationError(pub String);

pub fn bootstrap_plan(settings: &BootstrapSettings) -> BootstrapPlan {
    let resources = vec![
        ResourceSpec::Bucket(BucketSpec {
            logical_id: SOURCE_BUCKET_ID.to_string(),
            versioned: false,
            retention: RetentionPolicy::Destroy,
        }),
        ResourceSpec::Bucket(BucketSpec {
            logical_id: STATE_BUCKET_ID.to_string(),
            versioned: true,
            retention: RetentionPolicy::Retain,
        }),
        ResourceSpec::Table(TableSpec {
            logical_id: LOCK_TABLE_ID.to_string(),
            partition_key: LOCK_TABLE_PARTITION_KEY.to_string(),
            partition_key_type: "S".to_string(),
            billing_mode: "PAY_PER_REQUEST".to_string(),
            retention: RetentionPolicy::Retain,
        }),
        ResourceSpec::Bucket(BucketSpec {
            logical_id: ARTIFACT_BUCKET_ID.to_string(),
            versioned: true,
            retention: RetentionPolicy::Destroy,
        }),
        ResourceSpec::BuildProject(build_project(settings)),
    ];

    let outputs = vec![
        StackOutput {
            name: "cdkCodebuildProjectName".to_string(),
            value: ValueSource::literal(settings.project_name.clone()),
            description: "The name of the build project that runs remote jobs".to_string(),
            export_name: None,
        },
        StackOutput {
            name: "hereyaSourceCodeBucketName".to_string(),
            value: ValueSource::attribute(SOURCE_BUCKET_ID, "bucket_name"),
            description: "The name of the bucket storing hereya project source code".to_string(),
            export_name: Some("hereyaSourceCodeBucketName".to_string()),
        },
        StackOutput {
            name: "hereyaTerraformStateBucketName".to_string(),
            value: ValueSource::attribute(STATE_BUCKET_ID, "bucket_name"),
            description: "The name of the bucket storing terraform state".to_string(),
            export_name: Some("hereyaTerraformStateBucketName".to_string()),
        },
        StackOutput {
            name: "hereyaTerraformLockTableName".to_string(),
            value: ValueSource::attribute(LOCK_TABLE_ID, "table_name"),
            description: "The name of the table locking terraform state".to_string(),
            export_name: Some("hereyaTerraformLockTableName".to_string()),
        },
        StackOutput {
            name: "hereyaWorkerArtifactBucketName".to_string(),
            value: ValueSource::attribute(ARTIFACT_BUCKET_ID, "bucket_name"),
            description: "The bucket the packaged remote worker is uploaded to".to_string(),
            export_name: Some("hereyaWorkerArtifactBucketName".to_string()),
        },
    ];

    BootstrapPlan { resources, outputs }
}

fn build_project(settings: &BootstrapSettings) -> BuildProjectSpec {
    let mut environment: BTreeMap<String, ValueSource> = JOB_ENVIRONMENT_VARIABLES
        .iter()
        .map(|name| (name.to_string(), ValueSource::literal("")))
        .collect();
    environment.insert(
        ENV_SOURCE_CODE_BUCKET.to_string(),
        ValueSource::attribute(SOURCE_BUCKET_ID, "bucket_name"),
    );
    environment.insert(
        ENV_STATE_BUCKET.to_string(),
        ValueSource::attribute(STATE_BUCKET_ID, "bucket_name"),
    );
    environment.insert(
        ENV_LOCK_TABLE.to_string(),
        ValueSource::attribute(LOCK_TABLE_ID, "table_name"),
    );
    environment.insert(ENV_STATE_REGION.to_string(), ValueSource::StackRegion);

    let worker_artifact = WorkerArtifactSpec {
        bucket: ValueSource::attribute(ARTIFACT_BUCKET_ID, "bucket_name"),
        key: settings.worker_artifact_key.clone(),
        binary: settings.worker_binary.clone(),
        install_dir: settings.worker_install_dir.clone(),
    };
    environment.insert(
        ENV_WORKER_ARTIFACT_BUCKET.to_string(),
        worker_artifact.bucket.clone(),
    );
    environment.insert(
        ENV_WORKER_ARTIFACT_KEY.to_string(),
        ValueSource::literal(worker_artifact.key.clone()),
    );

    let mut install_commands = settings.install_commands.clone();
    install_commands.extend(worker_artifact.install_commands());

    BuildProjectSpec {
        logical_id: BUILD_PROJECT_ID.to_string(),
        project_name: settings.project_name.clone(),
        build_image: settings.build_image.clone(),
        environment,
        build_spec: BuildSpec {
            version: "0.2".to_string(),
            shell: "bash".to_string(),
            phases: vec![
                BuildPhase {
                    name: "install".to_string(),
                    runtime_versions: BTreeMap::from([(
                        "nodejs".to_string(),
                        settings.node_runtime.clone(),
                    )]),
                    commands: install_commands,
                },
                BuildPhase {
                    name: "build".to_string(),
                    runtime_versions: BTreeMap::new(),
                    commands: vec![worker_artifact.binary.clone()],
                },
            ],
        },
        worker_artifact,
        managed_policies: vec!["AdministratorAccess".to_string()],
        retention: RetentionPolicy::Destroy,
    }
}

pub fn validate_plan(plan: &BootstrapPlan) -> Result<(), PlanValidationError> {
    let mut logical_ids = BTreeSet::new();
    for resource in &plan.resources {
        if !logical_ids.insert(resource.logical_id()) {
            return Err(PlanValidationError(format!(
                "duplicate logical id '{}'",
                resource.logical_id()
            )));
        }
    }

    let references_known = |value: &ValueSource| match value {
        ValueSource::ResourceAttribute { logical_id, .. } => {
            logical_ids.contains(logical_id.as_str())
        }
        ValueSource::Literal { .. } | ValueSource::StackRegion => true,
    };

    for output in &plan.outputs {
        if !references_known(&output.value) {
            return Err(PlanValidationError(format!(
                "output '{}' references an unknown resource",
                output.name
            )));
        }
    }

    let state_variables = [
        ENV_STATE_BUCKET,
        ENV_LOCK_TABLE,
        ENV_STATE_REGION,
        ENV_WORKER_ARTIFACT_BUCKET,
        ENV_WORKER_ARTIFACT_KEY,
    ];
    let required_variables = JOB_ENVIRONMENT_VARIABLES
        .iter()
        .chain(state_variables.iter());
    for resource in &plan.resources {
        let ResourceSpec::BuildProject(project) = resource else {
            continue;
        };
        for name in required_variables.clone() {
            if !project.environment.contains_key(*name) {
                return Err(PlanValidationError(format!(
                    "build project '{}' does not declare {name}",
                    project.logical_id
                )));
            }
        }
        for (name, value) in &project.environment {
            if !references_known(value) {
                return Err(PlanValidationError(format!(
                    "build project variable {name} references an unknown resource"
                )));
            }
        }
        validate_worker_install(project, &references_known)?;
    }

    Ok(())
}

/// The build phase may only run the worker after the install phase has put
/// the artifact on the `PATH`.
fn validate_worker_install(
    project: &BuildProjectSpec,
    references_known: &impl Fn(&ValueSource) -> bool,
) -> Result<(), PlanValidationError> {
    let artifact = &project.worker_artifact;
    if !references_known(&artifact.bucket) {
        return Err(PlanValidationError(format!(
            "build project '{}' fetches the worker from an unknown resource",
            project.logical_id
        )));
    }

    let install = phase_commands(project, "install");
    let build = phase_commands(project, "build");

    let runs_worker = build.iter().any(|command| {
        command.split_whitespace().next() == Some(artifact.binary.as_str())
    });
    if !runs_worker {
        return Err(PlanValidationError(format!(
            "build project '{}' never runs {}",
            project.logical_id, artifact.binary
        )));
    }

    let installed = artifact
        .install_commands()
        .iter()
        .all(|command| install.contains(&command.as_str()));
    if !installed {
        return Err(PlanValidationError(format!(
            "build project '{}' does not install {} before running it",
            project.logical_id, artifact.binary
        )));
    }

    Ok(())
}

fn phase_commands<'a>(project: &'a BuildProjectSpec, phase_name: &str) -> Vec<&'a str> {
    project
        .build_spec
        .phases
        .iter()
        .filter(|phase| phase.name == phase_name)
        .flat_map(|phase| phase.commands.iter().map(String::as_str))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_plan_is_valid() {
        let plan = bootstrap_plan(&BootstrapSettings::default());
        validate_plan(&plan).expect("default plan should validate");

        let kinds: Vec<&str> = plan.resources.iter().map(ResourceSpec::logical_id).collect();
        assert_eq!(
            kinds,
            vec![
                SOURCE_BUCKET_ID,
                STATE_BUCKET_ID,
                LOCK_TABLE_ID,
                ARTIFACT_BUCKET_ID,
                BUILD_PROJECT_ID
            ]
        );
    }

    #[test]
    fn state_resources_are_retained() {
        let plan = bootstrap_plan(&BootstrapSettings::default());
        for resource in &plan.resources {
            let expected = match resource.logical_id() {
                STATE_BUCKET_ID | LOCK_TABLE_ID => RetentionPolicy::Retain,
                _ => RetentionPolicy::Destroy,
            };
            assert_eq!(resource.retention(), expected, "{}", resource.logical_id());
        }
    }

    fn project_of(plan: &mut BootstrapPlan) -> &mut BuildProjectSpec {
        plan.resources
            .iter_mut()
            .find_map(|resource| match resource {
                ResourceSpec::BuildProject(project) => Some(project),
                _ => None,
            })
            .expect("plan should contain a build project")
    }

    #[test]
    fn build_project_wires_bucket_reference_from_stack() {
        let mut plan = bootstrap_plan(&BootstrapSettings::default());
        let project = project_of(&mut plan);

        assert_eq!(
            project.environment.get(ENV_SOURCE_CODE_BUCKET),
            Some(&ValueSource::ResourceAttribute {
                logical_id: SOURCE_BUCKET_ID.to_string(),
                attribute: "bucket_name".to_string(),
            })
        );
        assert_eq!(
            project.build_spec.phases[1].commands,
            vec!["remote_worker".to_string()]
        );
    }

    #[test]
    fn install_phase_provides_worker_binary() {
        let mut plan = bootstrap_plan(&BootstrapSettings::default());
        let project = project_of(&mut plan);
        let phases = &project.build_spec.phases;

        assert_eq!(phases[0].name, "install");
        assert_eq!(
            phases[0].commands,
            vec![
                "npm install -g hereya-cli".to_string(),
                "aws s3 cp \"s3://${HEREYA_WORKER_ARTIFACT_BUCKET}/${HEREYA_WORKER_ARTIFACT_KEY}\" /tmp/remote_worker.zip".to_string(),
                "unzip -o /tmp/remote_worker.zip -d /usr/local/bin".to_string(),
                "chmod +x /usr/local/bin/remote_worker".to_string(),
            ]
        );
        assert_eq!(
            project.environment.get(ENV_WORKER_ARTIFACT_KEY),
            Some(&ValueSource::Literal {
                value: "remote_worker.zip".to_string(),
            })
        );
        assert_eq!(
            project.environment.get(ENV_WORKER_ARTIFACT_BUCKET),
            Some(&ValueSource::ResourceAttribute {
                logical_id: ARTIFACT_BUCKET_ID.to_string(),
                attribute: "bucket_name".to_string(),
            })
        );
    }

    #[test]
    fn rejects_worker_without_install_step() {
        let mut plan = bootstrap_plan(&BootstrapSettings::default());
        project_of(&mut plan).build_spec.phases[0].commands =
            vec!["npm install -g hereya-cli".to_string()];

        let error = validate_plan(&plan).expect_err("uninstalled worker should fail");
        assert!(error
            .to_string()
            .contains("does not install remote_worker before running it"));
    }

    #[test]
    fn rejects_build_phase_that_never_runs_worker() {
        let mut plan = bootstrap_plan(&BootstrapSettings::default());
        project_of(&mut plan).build_spec.phases[1].commands =
            vec!["hereya --version".to_string()];

        let error = validate_plan(&plan).expect_err("missing worker run should fail");
        assert!(error.to_string().contains("never runs remote_worker"));
    }

    #[test]
    fn rejects_duplicate_logical_ids() {
        let mut plan = bootstrap_plan(&BootstrapSettings::default());
        plan.resources.push(plan.resources[0].clone());

        let error = validate_plan(&plan).expect_err("duplicate should fail");
        assert!(error.to_string().contains("duplicate logical id"));
    }

    #[test]
    fn rejects_build_project_missing_job_variable() {
        let mut plan = bootstrap_plan(&BootstrapSettings::default());
        for resource in &mut plan.resources {
            if let ResourceSpec::BuildProject(project) = resource {
                project.environment.remove("PKG_REPO_URL");
            }
        }

        let error = validate_plan(&plan).expect_err("missing variable should fail");
        assert!(error.to_string().contains("does not declare PKG_REPO_URL"));
    }

    #[test]
    fn plan_serializes_with_resource_kind_tags() {
        let plan = bootstrap_plan(&BootstrapSettings::default());
        let json = serde_json::to_value(&plan).expect("plan should serialize");

        assert_eq!(json["resources"][2]["kind"], "table");
        assert_eq!(json["resources"][2]["partition_key"], "LockID");
        assert_eq!(json["outputs"][1]["export_name"], "hereyaSourceCodeBucketName");
    }
}
