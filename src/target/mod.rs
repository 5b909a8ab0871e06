//! The CI runtime generated scripts are installed into.

pub mod directory;
pub mod memory;

pub use directory::DirectoryTarget;
pub use memory::MemoryTarget;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::error::MigrateError;

/// Give up probing after this many suffixes.
const MAX_NAME_PROBES: usize = 10_000;

/// Handle to a job reserved at the target runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetJob {
    name: String,
}

impl TargetJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    /// Multi-line text.
    Text,
    Password,
}

/// A build parameter on the generated job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDefinition {
    pub name: String,
    pub kind: ParameterKind,
    pub default_value: String,
    pub description: String,
}

impl ParameterDefinition {
    pub fn new(
        name: impl Into<String>,
        kind: ParameterKind,
        default_value: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            default_value: default_value.into(),
            description: description.into(),
        }
    }

    pub fn is_secret(&self) -> bool {
        self.kind == ParameterKind::Password
    }
}

#[derive(Debug, Error)]
pub enum CreateJobError {
    #[error("A job named '{0}' already exists")]
    NameTaken(String),

    #[error("Invalid job name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error(transparent)]
    Other(#[from] MigrateError),
}

/// Client for the target CI runtime. Shared by all workers.
pub trait TargetRuntime: Send + Sync {
    /// Reserve `name`. Must fail with [`CreateJobError::NameTaken`] if the
    /// name is in use, atomically with respect to concurrent callers.
    fn create_job(&self, name: &str) -> Result<TargetJob, CreateJobError>;

    fn set_script(&self, job: &TargetJob, script: &str, sandboxed: bool)
    -> Result<(), MigrateError>;

    fn set_parameters(
        &self,
        job: &TargetJob,
        parameters: &[ParameterDefinition],
    ) -> Result<(), MigrateError>;

    fn save(&self, job: &TargetJob) -> Result<(), MigrateError>;

    /// Drop a reserved job that will never be saved, freeing its name.
    fn discard(&self, job: &TargetJob);
}

/// Reserve `base`, or `base-1`, `base-2`, ... if it is taken.
pub fn create_unique_job(target: &dyn TargetRuntime, base: &str) -> Result<TargetJob, MigrateError> {
    for attempt in 0..MAX_NAME_PROBES {
        let candidate = if attempt == 0 {
            base.to_string()
        } else {
            format!("{base}-{attempt}")
        };

        match target.create_job(&candidate) {
            Ok(job) => return Ok(job),
            Err(CreateJobError::NameTaken(_)) => {
                debug!(name = %candidate, "target job name taken, probing next");
            }
            Err(err @ CreateJobError::InvalidName { .. }) => {
                return Err(MigrateError::Validation(err.to_string()));
            }
            Err(CreateJobError::Other(err)) => return Err(err),
        }
    }
    Err(MigrateError::Validation(format!(
        "No free job name for '{base}' after {MAX_NAME_PROBES} attempts"
    )))
}
