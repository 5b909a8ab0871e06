mod job;
mod state;

pub use job::{Job, JobSummary, MigrationContext, NOT_CREATED_LABEL, status_text};
pub use state::{JobStatus, StateMachine, Transition};
