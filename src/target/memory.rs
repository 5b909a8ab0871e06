use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{CreateJobError, ParameterDefinition, TargetJob, TargetRuntime};
use crate::error::MigrateError;

/// What a [`MemoryTarget`] holds for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredJob {
    pub script: String,
    pub sandboxed: bool,
    pub parameters: Vec<ParameterDefinition>,
    pub saved: bool,
}

/// Keeps generated jobs in memory. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryTarget {
    jobs: Mutex<BTreeMap<String, StoredJob>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn names(&self) -> Vec<String> {
        self.jobs.lock().keys().cloned().collect()
    }

    pub fn job(&self, name: &str) -> Option<StoredJob> {
        self.jobs.lock().get(name).cloned()
    }

    fn update(
        &self,
        job: &TargetJob,
        f: impl FnOnce(&mut StoredJob),
    ) -> Result<(), MigrateError> {
        let mut jobs = self.jobs.lock();
        let stored = jobs
            .get_mut(job.name())
            .ok_or_else(|| MigrateError::Validation(format!("Unknown target job: {}", job.name())))?;
        f(stored);
        Ok(())
    }
}

impl TargetRuntime for MemoryTarget {
    fn create_job(&self, name: &str) -> Result<TargetJob, CreateJobError> {
        if name.is_empty() || name.contains('/') {
            return Err(CreateJobError::InvalidName {
                name: name.to_string(),
                reason: "must be non-empty and must not contain '/'".into(),
            });
        }
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(name) {
            return Err(CreateJobError::NameTaken(name.to_string()));
        }
        jobs.insert(name.to_string(), StoredJob::default());
        Ok(TargetJob::new(name))
    }

    fn set_script(
        &self,
        job: &TargetJob,
        script: &str,
        sandboxed: bool,
    ) -> Result<(), MigrateError> {
        self.update(job, |stored| {
            stored.script = script.to_string();
            stored.sandboxed = sandboxed;
        })
    }

    fn set_parameters(
        &self,
        job: &TargetJob,
        parameters: &[ParameterDefinition],
    ) -> Result<(), MigrateError> {
        self.update(job, |stored| stored.parameters = parameters.to_vec())
    }

    fn save(&self, job: &TargetJob) -> Result<(), MigrateError> {
        self.update(job, |stored| stored.saved = true)
    }

    fn discard(&self, job: &TargetJob) {
        let mut jobs = self.jobs.lock();
        if jobs.get(job.name()).is_some_and(|stored| !stored.saved) {
            jobs.remove(job.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ParameterKind;

    #[test]
    fn stores_script_and_parameters() {
        let target = MemoryTarget::new();
        let job = target.create_job("A2J-app").unwrap();
        target.set_script(&job, "node {}", true).unwrap();
        target
            .set_parameters(
                &job,
                &[ParameterDefinition::new("A", ParameterKind::String, "1", "d")],
            )
            .unwrap();
        target.save(&job).unwrap();

        let stored = target.job("A2J-app").unwrap();
        assert_eq!(stored.script, "node {}");
        assert!(stored.sandboxed);
        assert_eq!(stored.parameters.len(), 1);
        assert!(stored.saved);
    }

    #[test]
    fn duplicate_names_are_taken() {
        let target = MemoryTarget::new();
        target.create_job("X").unwrap();
        assert!(matches!(
            target.create_job("X"),
            Err(CreateJobError::NameTaken(name)) if name == "X"
        ));
    }

    #[test]
    fn discard_frees_an_unsaved_name() {
        let target = MemoryTarget::new();
        let job = target.create_job("X").unwrap();
        target.set_script(&job, "node {}", true).unwrap();
        target.discard(&job);
        assert!(target.names().is_empty());
        assert!(target.create_job("X").is_ok());
    }

    #[test]
    fn discard_keeps_saved_jobs() {
        let target = MemoryTarget::new();
        let job = target.create_job("X").unwrap();
        target.save(&job).unwrap();
        target.discard(&job);
        assert_eq!(target.names(), vec!["X".to_string()]);
    }

    #[test]
    fn updates_to_unknown_jobs_fail() {
        let target = MemoryTarget::new();
        assert!(target.save(&TargetJob::new("ghost")).is_err());
    }
}
