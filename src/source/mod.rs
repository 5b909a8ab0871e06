//! The legacy build server workflows are migrated from.
//!
//! The engine only talks to it through [`SourceConnector`] and
//! [`SourceSystem`]; [`catalog`] provides a file-backed implementation.

pub mod catalog;

pub use catalog::{Catalog, CatalogConnector, CatalogSource};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::MigrateError;
use crate::resolve::ScopeSet;

/// Numeric workflow identifier in the source system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(pub u64);

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WorkflowId {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(WorkflowId)
            .map_err(|_| MigrateError::Validation(format!("invalid workflow id: {s:?}")))
    }
}

/// `project name -> workflow name -> id`
pub type SearchResults = BTreeMap<String, BTreeMap<String, WorkflowId>>;

/// One step of a source job, identified by its kind tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStep {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub preflight_only: bool,
    #[serde(default)]
    pub config: BTreeMap<String, String>,
}

impl SourceStep {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            preflight_only: false,
            config: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// A config value, treating empty strings as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.config
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// A job inside a workflow; becomes one stage of the generated script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceJob {
    pub name: String,
    #[serde(default, rename = "step")]
    pub steps: Vec<SourceStep>,
}

/// Everything the engine needs to know about one source workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub project: String,
    #[serde(default, rename = "job")]
    pub jobs: Vec<SourceJob>,
    #[serde(default)]
    pub scopes: ScopeSet,
}

impl WorkflowDefinition {
    pub fn display_name(&self) -> String {
        format!("{} / {}", self.project, self.name)
    }

    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|job| job.steps.len()).sum()
    }
}

/// A client session against the source system.
pub trait SourceSystem: Send {
    fn search(&self, query: &str) -> Result<SearchResults, MigrateError>;

    fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowDefinition, MigrateError>;

    /// Release the session. Called at most once.
    fn close(&mut self) {}
}

/// Opens sessions for a given [`SourceInstance`].
pub trait SourceConnector: Send + Sync {
    fn connect(&self, instance: &SourceInstance) -> Result<Box<dyn SourceSystem>, MigrateError>;
}

/// Connection coordinates of one source server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInstance {
    pub hostname: Option<String>,
    pub port: Option<String>,
    pub user_credential_id: Option<String>,
    pub keystore_credential_id: Option<String>,
}

static INSTANCE_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"SourceInstance\{hostname='(.*)', port='(.*)', userCredentialId='(.*)', keystoreCredentialId='(.*)'\}",
    )
    .expect("valid instance pattern")
});

fn fix_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

impl SourceInstance {
    pub fn new(
        hostname: Option<&str>,
        port: Option<&str>,
        user_credential_id: Option<&str>,
        keystore_credential_id: Option<&str>,
    ) -> Self {
        Self {
            hostname: fix_empty(hostname),
            port: fix_empty(port),
            user_credential_id: fix_empty(user_credential_id),
            keystore_credential_id: fix_empty(keystore_credential_id),
        }
    }

    /// Refuse to connect without a host, a numeric port and a user
    /// credential.
    pub fn validate(&self) -> Result<(), MigrateError> {
        let (Some(_), Some(port), Some(_)) = (&self.hostname, &self.port, &self.user_credential_id)
        else {
            return Err(MigrateError::Validation(
                "Hostname, port, and user credential ID are required".into(),
            ));
        };
        port.parse::<u16>()
            .map_err(|_| MigrateError::Validation(format!("Port must be a number: {port}")))?;
        Ok(())
    }
}

impl fmt::Display for SourceInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let show = |v: &Option<String>| v.clone().unwrap_or_default();
        write!(
            f,
            "SourceInstance{{hostname='{}', port='{}', userCredentialId='{}', keystoreCredentialId='{}'}}",
            show(&self.hostname),
            show(&self.port),
            show(&self.user_credential_id),
            show(&self.keystore_credential_id),
        )
    }
}

impl FromStr for SourceInstance {
    type Err = std::convert::Infallible;

    /// Parse the [`Display`](fmt::Display) form. Anything else yields an
    /// instance with no fields set, which then fails [`validate`](Self::validate).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(caps) = INSTANCE_FORM.captures(s) else {
            return Ok(Self::default());
        };
        Ok(Self::new(
            caps.get(1).map(|m| m.as_str()),
            caps.get(2).map(|m| m.as_str()),
            caps.get(3).map(|m| m.as_str()),
            caps.get(4).map(|m| m.as_str()),
        ))
    }
}
