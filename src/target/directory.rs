//! Writes each generated job to its own directory:
//!
//! ```text
//! <root>/<job name>/Jenkinsfile
//! <root>/<job name>/parameters.json
//! ```

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use super::{CreateJobError, ParameterDefinition, TargetJob, TargetRuntime};
use crate::error::MigrateError;

pub const SCRIPT_FILE: &str = "Jenkinsfile";
pub const PARAMETERS_FILE: &str = "parameters.json";

#[derive(Debug, Default)]
struct Pending {
    script: String,
    sandboxed: bool,
    parameters: Vec<ParameterDefinition>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    sandbox: bool,
    parameters: &'a [ParameterDefinition],
}

#[derive(Debug)]
pub struct DirectoryTarget {
    root: PathBuf,
    pending: Mutex<HashMap<String, Pending>>,
}

impl DirectoryTarget {
    /// Use `root` as the output directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, MigrateError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job: &TargetJob) -> PathBuf {
        self.root.join(job.name())
    }
}

fn check_name(name: &str) -> Result<(), CreateJobError> {
    let reason = if name.is_empty() {
        "name is empty"
    } else if name.starts_with('.') {
        "name starts with '.'"
    } else if name.contains(['/', '\\']) {
        "name contains a path separator"
    } else {
        return Ok(());
    };
    Err(CreateJobError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

impl TargetRuntime for DirectoryTarget {
    fn create_job(&self, name: &str) -> Result<TargetJob, CreateJobError> {
        check_name(name)?;
        // create_dir is the atomic reservation.
        match std::fs::create_dir(self.root.join(name)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(CreateJobError::NameTaken(name.to_string()));
            }
            Err(err) => return Err(MigrateError::from(err).into()),
        }
        self.pending.lock().insert(name.to_string(), Pending::default());
        Ok(TargetJob::new(name))
    }

    fn set_script(
        &self,
        job: &TargetJob,
        script: &str,
        sandboxed: bool,
    ) -> Result<(), MigrateError> {
        let mut pending = self.pending.lock();
        let entry = pending.entry(job.name().to_string()).or_default();
        entry.script = script.to_string();
        entry.sandboxed = sandboxed;
        Ok(())
    }

    fn set_parameters(
        &self,
        job: &TargetJob,
        parameters: &[ParameterDefinition],
    ) -> Result<(), MigrateError> {
        self.pending
            .lock()
            .entry(job.name().to_string())
            .or_default()
            .parameters = parameters.to_vec();
        Ok(())
    }

    fn save(&self, job: &TargetJob) -> Result<(), MigrateError> {
        let Some(pending) = self.pending.lock().remove(job.name()) else {
            return Err(MigrateError::Validation(format!(
                "Nothing to save for target job: {}",
                job.name()
            )));
        };

        let dir = self.job_dir(job);
        std::fs::write(dir.join(SCRIPT_FILE), &pending.script)?;
        let manifest = Manifest {
            sandbox: pending.sandboxed,
            parameters: &pending.parameters,
        };
        std::fs::write(
            dir.join(PARAMETERS_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;

        info!(job = %job.name(), dir = %dir.display(), "wrote pipeline job");
        Ok(())
    }

    fn discard(&self, job: &TargetJob) {
        self.pending.lock().remove(job.name());
        let dir = self.job_dir(job);
        if let Err(err) = std::fs::remove_dir_all(&dir)
            && err.kind() != ErrorKind::NotFound
        {
            warn!(job = %job.name(), dir = %dir.display(), %err, "could not remove discarded job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{ParameterKind, create_unique_job};

    #[test]
    fn save_writes_script_and_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path().join("out")).unwrap();

        let job = target.create_job("A2J-app-build").unwrap();
        target.set_script(&job, "node {\n}\n", true).unwrap();
        target
            .set_parameters(
                &job,
                &[ParameterDefinition::new("A2J_NODE", ParameterKind::String, "", "label")],
            )
            .unwrap();
        target.save(&job).unwrap();

        let job_dir = dir.path().join("out").join("A2J-app-build");
        assert_eq!(
            std::fs::read_to_string(job_dir.join(SCRIPT_FILE)).unwrap(),
            "node {\n}\n"
        );
        let manifest: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(job_dir.join(PARAMETERS_FILE)).unwrap())
                .unwrap();
        assert_eq!(manifest["sandbox"], true);
        assert_eq!(manifest["parameters"][0]["name"], "A2J_NODE");
    }

    #[test]
    fn existing_directories_are_taken() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("X")).unwrap();
        let target = DirectoryTarget::new(dir.path()).unwrap();

        let job = create_unique_job(&target, "X").unwrap();
        assert_eq!(job.name(), "X-1");
    }

    #[test]
    fn path_like_names_are_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path()).unwrap();
        for name in ["", ".hidden", "a/b", "a\\b", ".."] {
            assert!(
                matches!(target.create_job(name), Err(CreateJobError::InvalidName { .. })),
                "{name:?} should be invalid"
            );
        }
    }

    #[test]
    fn discard_removes_the_reservation() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path()).unwrap();

        let job = target.create_job("X").unwrap();
        target.set_script(&job, "node {}", true).unwrap();
        target.discard(&job);

        assert!(!dir.path().join("X").exists());
        assert!(target.pending.lock().is_empty());
        assert_eq!(create_unique_job(&target, "X").unwrap().name(), "X");
    }

    #[test]
    fn save_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let target = DirectoryTarget::new(dir.path()).unwrap();
        assert!(target.save(&TargetJob::new("never-created")).is_err());
    }
}
