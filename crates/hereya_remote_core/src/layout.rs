use std::path::{Component, Path, PathBuf};

use crate::error::JobError;

pub const PACKAGE_DIR_NAME: &str = "source-code";
pub const PROJECT_DIR_NAME: &str = "project-source-code";

/// Local directories of one job. The package and project trees are disjoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingLayout {
    package_dir: PathBuf,
    project_dir: PathBuf,
}

impl StagingLayout {
    /// `source-code/` and `project-source-code/` under `work_root`.
    pub fn under(work_root: &Path) -> Result<Self, JobError> {
        Self::new(
            work_root.join(PACKAGE_DIR_NAME),
            work_root.join(PROJECT_DIR_NAME),
        )
    }

    pub fn new(package_dir: PathBuf, project_dir: PathBuf) -> Result<Self, JobError> {
        if paths_overlap(&package_dir, &project_dir) {
            return Err(JobError::configuration(format!(
                "package directory '{}' and project directory '{}' must not overlap",
                package_dir.display(),
                project_dir.display()
            )));
        }
        Ok(Self {
            package_dir,
            project_dir,
        })
    }

    pub fn package_dir(&self) -> &Path {
        &self.package_dir
    }

    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }
}

/// True when the paths are equal or one is nested inside the other.
///
/// Compares lexically after dropping `.` components; callers pass paths that
/// do not exist yet, so canonicalization is not available.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    let a = lexical(a);
    let b = lexical(b);
    a.starts_with(&b) || b.starts_with(&a)
}

/// Object-store prefix for a project source key, always ending in `/`.
pub fn source_prefix(key: &str) -> String {
    let trimmed = key.trim_start_matches('/');
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

/// Local relative path of `object_key` under `prefix`.
///
/// Returns `Ok(None)` for folder markers and the prefix object itself, and an
/// error for keys that would escape the staging directory.
pub fn object_relative_path(prefix: &str, object_key: &str) -> Result<Option<PathBuf>, String> {
    let Some(relative) = object_key.strip_prefix(prefix) else {
        return Err(format!(
            "object '{object_key}' is outside prefix '{prefix}'"
        ));
    };
    if relative.is_empty() || relative.ends_with('/') {
        return Ok(None);
    }

    let path = PathBuf::from(relative);
    let escapes = path.components().any(|component| {
        !matches!(component, Component::Normal(_) | Component::CurDir)
    });
    if escapes {
        return Err(format!(
            "object '{object_key}' resolves outside the staging directory"
        ));
    }
    Ok(Some(path))
}

fn lexical(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_disjoint() {
        let layout = StagingLayout::under(Path::new("/tmp/job")).expect("layout should build");
        assert_eq!(layout.package_dir(), Path::new("/tmp/job/source-code"));
        assert_eq!(
            layout.project_dir(),
            Path::new("/tmp/job/project-source-code")
        );
        assert!(!paths_overlap(layout.package_dir(), layout.project_dir()));
    }

    #[test]
    fn rejects_nested_directories() {
        let error = StagingLayout::new(
            PathBuf::from("/tmp/job/source-code"),
            PathBuf::from("/tmp/job/source-code/project"),
        )
        .expect_err("nested layout should fail");
        assert!(matches!(error, JobError::Configuration(_)));

        assert!(paths_overlap(Path::new("./a"), Path::new("a")));
        assert!(!paths_overlap(Path::new("a/b"), Path::new("a/bc")));
    }

    #[test]
    fn prefix_always_ends_with_slash() {
        assert_eq!(source_prefix("proj/1"), "proj/1/");
        assert_eq!(source_prefix("proj/1/"), "proj/1/");
        assert_eq!(source_prefix("/proj/1"), "proj/1/");
    }

    #[test]
    fn relative_paths_skip_folder_markers() {
        assert_eq!(
            object_relative_path("proj/1/", "proj/1/src/main.tf"),
            Ok(Some(PathBuf::from("src/main.tf")))
        );
        assert_eq!(object_relative_path("proj/1/", "proj/1/src/"), Ok(None));
        assert_eq!(object_relative_path("proj/1/", "proj/1/"), Ok(None));
    }

    #[test]
    fn relative_paths_never_escape() {
        assert!(object_relative_path("proj/1/", "proj/1/../../etc/passwd").is_err());
        assert!(object_relative_path("proj/1/", "proj/1//etc/passwd").is_err());
        assert!(object_relative_path("proj/1/", "proj/10/file").is_err());
    }
}
