//! File-backed source system.
//!
//! A catalog is a TOML (or JSON) document listing workflows, their jobs and
//! steps, and the property scopes they see. It stands in for a live server
//! for offline migrations and for tests.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    SearchResults, SourceConnector, SourceInstance, SourceSystem, WorkflowDefinition, WorkflowId,
};
use crate::error::MigrateError;
use crate::resolve::Property;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Server-wide properties, visible to every workflow.
    #[serde(default)]
    pub system: BTreeMap<String, Property>,
    #[serde(default, rename = "workflow")]
    pub workflows: Vec<WorkflowDefinition>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflow(mut self, workflow: WorkflowDefinition) -> Self {
        self.workflows.push(workflow);
        self
    }

    pub fn with_system_property(mut self, name: impl Into<String>, property: Property) -> Self {
        self.system.insert(name.into(), property);
        self
    }

    /// Load a catalog, choosing the format from the file extension.
    pub fn load(path: &Path) -> Result<Self, MigrateError> {
        let contents = std::fs::read_to_string(path)?;
        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => toml::from_str(&contents)?,
        };
        Ok(catalog)
    }

    pub fn search(&self, query: &str) -> SearchResults {
        let needle = query.trim().to_lowercase();
        let mut results = SearchResults::new();
        for wf in &self.workflows {
            if wf.project.to_lowercase().contains(&needle) {
                results
                    .entry(wf.project.clone())
                    .or_default()
                    .insert(wf.name.clone(), wf.id);
            }
        }
        results
    }

    /// The workflow with its system scope filled from the catalog-wide
    /// properties. Workflow-level entries win.
    pub fn workflow(&self, id: WorkflowId) -> Option<WorkflowDefinition> {
        let mut wf = self.workflows.iter().find(|wf| wf.id == id)?.clone();
        for (name, property) in &self.system {
            wf.scopes
                .system
                .entry(name.clone())
                .or_insert_with(|| property.clone());
        }
        Some(wf)
    }
}

/// One session against a [`Catalog`].
#[derive(Debug)]
pub struct CatalogSource {
    catalog: Arc<Catalog>,
    closed: bool,
}

impl CatalogSource {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            catalog,
            closed: false,
        }
    }

    fn ensure_open(&self) -> Result<(), MigrateError> {
        if self.closed {
            return Err(MigrateError::Connection("source session is closed".into()));
        }
        Ok(())
    }
}

impl SourceSystem for CatalogSource {
    fn search(&self, query: &str) -> Result<SearchResults, MigrateError> {
        self.ensure_open()?;
        Ok(self.catalog.search(query))
    }

    fn load_workflow(&self, id: WorkflowId) -> Result<WorkflowDefinition, MigrateError> {
        self.ensure_open()?;
        self.catalog
            .workflow(id)
            .ok_or_else(|| MigrateError::Validation(format!("No workflow with id {id}")))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Debug, Clone)]
pub struct CatalogConnector {
    catalog: Arc<Catalog>,
}

impl CatalogConnector {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog: Arc::new(catalog),
        }
    }
}

impl SourceConnector for CatalogConnector {
    fn connect(&self, instance: &SourceInstance) -> Result<Box<dyn SourceSystem>, MigrateError> {
        instance.validate()?;
        debug!(host = ?instance.hostname, "opening catalog session");
        Ok(Box::new(CatalogSource::new(Arc::clone(&self.catalog))))
    }
}
