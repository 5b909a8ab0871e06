use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use super::state::{JobStatus, StateMachine, Transition};
use crate::error::{EngineError, MigrateError};
use crate::resolve::Resolver;
use crate::script::Script;
use crate::source::{SourceSystem, WorkflowId};

pub const NOT_CREATED_LABEL: &str = "Target job not created yet";
const NOT_LOADED_LABEL: &str = "Workflow Not Loaded";

/// Per-job working state. Owned by the worker while the job runs.
#[derive(Debug)]
pub struct MigrationContext {
    pub script: Script,
    pub resolver: Resolver,
}

/// One workflow conversion.
///
/// Shared between the worker running it, the orchestrator loop and readers
/// of the job listing, so every mutable field is either atomic, set-once,
/// or behind a lock.
pub struct Job {
    key: Uuid,
    workflow_id: WorkflowId,
    status: AtomicU8,
    progress: AtomicU8,
    history: Mutex<Vec<JobStatus>>,
    display_name: OnceLock<String>,
    target_name: OnceLock<String>,
    error: OnceLock<MigrateError>,
    context: Mutex<MigrationContext>,
    source: Mutex<Option<Box<dyn SourceSystem>>>,
    created_at: DateTime<Utc>,
    finished_at: OnceLock<DateTime<Utc>>,
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("key", &self.key)
            .field("workflow_id", &self.workflow_id)
            .field("status", &self.status())
            .field("progress", &self.progress())
            .field("error", &self.error())
            .finish_non_exhaustive()
    }
}

impl Job {
    pub fn new(
        workflow_id: WorkflowId,
        source: Box<dyn SourceSystem>,
        context: MigrationContext,
    ) -> Self {
        Self {
            key: Uuid::new_v4(),
            workflow_id,
            status: AtomicU8::new(JobStatus::Pending.as_u8()),
            progress: AtomicU8::new(0),
            history: Mutex::new(vec![JobStatus::Pending]),
            display_name: OnceLock::new(),
            target_name: OnceLock::new(),
            error: OnceLock::new(),
            context: Mutex::new(context),
            source: Mutex::new(Some(source)),
            created_at: Utc::now(),
            finished_at: OnceLock::new(),
        }
    }

    pub fn key(&self) -> Uuid {
        self.key
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn raw_status(&self) -> u8 {
        self.status.load(Ordering::Acquire)
    }

    pub fn status(&self) -> JobStatus {
        match JobStatus::from_u8(self.raw_status()) {
            Ok(status) => status,
            Err(err) => {
                error!(job = %self.key, %err, "job holds an invalid status");
                JobStatus::Failed
            }
        }
    }

    /// Every status the job has been in, oldest first.
    pub fn history(&self) -> Vec<JobStatus> {
        self.history.lock().clone()
    }

    /// Apply `transition` if the table allows it. Returns whether the status
    /// changed.
    pub fn apply(&self, transition: Transition) -> bool {
        let mut history = self.history.lock();
        let current = self.status();
        let Some(next) = StateMachine::next(current, transition) else {
            debug!(job = %self.key, %current, ?transition, "transition refused");
            return false;
        };
        self.status.store(next.as_u8(), Ordering::Release);
        history.push(next);
        if next.is_terminal() {
            let _ = self.finished_at.set(Utc::now());
        }
        true
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    pub fn set_progress(&self, percent: usize) {
        self.progress
            .store(percent.min(100) as u8, Ordering::Relaxed);
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.get().map(String::as_str)
    }

    pub fn set_display_name(&self, name: String) {
        let _ = self.display_name.set(name);
    }

    pub fn target_name(&self) -> Option<&str> {
        self.target_name.get().map(String::as_str)
    }

    pub fn set_target_name(&self, name: String) {
        let _ = self.target_name.set(name);
    }

    pub fn error(&self) -> Option<&MigrateError> {
        self.error.get()
    }

    /// Record `err` (first error wins) and move to `Failed` from whichever
    /// non-terminal status the job is in.
    pub fn fail(&self, err: MigrateError) {
        let _ = self.error.set(err);
        if !self.apply(Transition::Fail) {
            self.apply(Transition::Abort);
        }
    }

    /// Lock the job's working state.
    pub fn context(&self) -> MutexGuard<'_, MigrationContext> {
        self.context.lock()
    }

    /// Run `f` against the job's source session, if it is still open.
    pub fn with_source<T>(
        &self,
        f: impl FnOnce(&dyn SourceSystem) -> Result<T, MigrateError>,
    ) -> Result<T, MigrateError> {
        let source = self.source.lock();
        match source.as_deref() {
            Some(source) => f(source),
            None => Err(MigrateError::Connection("source session already closed".into())),
        }
    }

    /// Release the source session. Safe to call any number of times. A
    /// session still in use by the worker is left for the worker to release.
    pub fn release(&self) {
        let Some(mut slot) = self.source.try_lock() else {
            debug!(job = %self.key, "source busy, worker will release it");
            return;
        };
        if let Some(mut source) = slot.take() {
            source.close();
        }
    }

    /// Release resources and move to `Closed`. A job that never finished is
    /// failed with [`EngineError::Interrupted`] first.
    pub fn close(&self) {
        if !self.status().is_terminal() {
            self.fail(EngineError::Interrupted.into());
        }
        self.release();
        self.apply(Transition::Close);
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at.get().copied()
    }

    /// The generated script as rendered so far.
    pub fn script_text(&self) -> String {
        self.context().script.render()
    }

    pub fn needed_properties(&self) -> Vec<String> {
        self.context().resolver.needed().keys().cloned().collect()
    }

    pub fn unknown_properties(&self) -> Vec<String> {
        self.context().resolver.unknown().iter().cloned().collect()
    }

    pub fn summary(&self) -> JobSummary {
        let name = match self.display_name() {
            Some(name) => name,
            None => NOT_LOADED_LABEL,
        };
        JobSummary {
            key: self.key,
            id: self.workflow_id,
            display_name: format!("{name} ({})", self.workflow_id),
            stage_label: self.target_name().unwrap_or(NOT_CREATED_LABEL).to_string(),
            status_text: status_text(self.raw_status(), self.error(), self.progress()),
        }
    }
}

/// One row of the status listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub key: Uuid,
    pub id: WorkflowId,
    pub display_name: String,
    pub stage_label: String,
    pub status_text: String,
}

impl JobSummary {
    pub fn is_error(&self) -> bool {
        self.status_text.starts_with("Error")
    }
}

/// Caller-facing status text.
pub fn status_text(raw_status: u8, error: Option<&MigrateError>, progress: u8) -> String {
    match JobStatus::from_u8(raw_status) {
        Ok(JobStatus::Pending) => "Initializing...".to_string(),
        Ok(JobStatus::Running) => format!("Running: {progress}%"),
        Ok(JobStatus::Success | JobStatus::Failed | JobStatus::Closed) => match error {
            Some(err) => format!("Error: {err}"),
            None => "Success".to_string(),
        },
        Err(err) => {
            error!(%err, "status listing saw a status the engine does not define");
            err.to_string()
        }
    }
}
