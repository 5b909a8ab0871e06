//! Migrates workflows from a legacy build server into CI pipeline scripts.
//!
//! The pieces, leaves first: [`script`] accumulates indented script text,
//! [`resolve`] fills in `${scope:name}` properties, [`state_machine`] tracks
//! each job, and [`orchestrator`] runs jobs on a bounded worker pool.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resolve;
pub mod script;
pub mod source;
pub mod state_machine;
pub mod target;
pub mod translate;

pub use error::{EngineError, MigrateError, ResolveError};
pub use orchestrator::MigrateEngine;
