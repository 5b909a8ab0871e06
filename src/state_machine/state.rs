use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Lifecycle of a migration job.
///
/// Each job flows through: PENDING → RUNNING → (SUCCESS | FAILED) → CLOSED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Running = 1,
    Success = 2,
    Failed = 3,
    Closed = 4,
}

impl JobStatus {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> Result<Self, EngineError> {
        match raw {
            0 => Ok(JobStatus::Pending),
            1 => Ok(JobStatus::Running),
            2 => Ok(JobStatus::Success),
            3 => Ok(JobStatus::Failed),
            4 => Ok(JobStatus::Closed),
            other => Err(EngineError::UnknownStatus(other)),
        }
    }

    /// Success, Failed or Closed. Once terminal a job never runs again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed | JobStatus::Closed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "PENDING"),
            JobStatus::Running => write!(f, "RUNNING"),
            JobStatus::Success => write!(f, "SUCCESS"),
            JobStatus::Failed => write!(f, "FAILED"),
            JobStatus::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Events that move a job between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// A worker picked the job up.
    Start,
    Succeed,
    Fail,
    /// The job never got a worker (forced shutdown).
    Abort,
    /// The orchestrator observed the task as finished.
    Close,
}

/// The transition table.
pub struct StateMachine;

impl StateMachine {
    /// Status reached by applying `transition` in `from`, or `None` if the
    /// move is not allowed.
    pub fn next(from: JobStatus, transition: Transition) -> Option<JobStatus> {
        use JobStatus::*;
        match (from, transition) {
            (Pending, Transition::Start) => Some(Running),
            (Running, Transition::Succeed) => Some(Success),
            (Running, Transition::Fail) => Some(Failed),
            (Pending, Transition::Abort) => Some(Failed),
            (Success | Failed, Transition::Close) => Some(Closed),
            _ => None,
        }
    }

    /// Whether `history` is a legal run: a prefix of
    /// `Pending, Running, Success|Failed, Closed`, where only an aborted job
    /// may skip `Running`.
    pub fn is_valid_history(history: &[JobStatus]) -> bool {
        let Some((first, rest)) = history.split_first() else {
            return true;
        };
        if *first != JobStatus::Pending {
            return false;
        }
        let mut current = *first;
        for &status in rest {
            let allowed = [
                Transition::Start,
                Transition::Succeed,
                Transition::Fail,
                Transition::Abort,
                Transition::Close,
            ]
            .into_iter()
            .any(|t| Self::next(current, t) == Some(status));
            if !allowed {
                return false;
            }
            current = status;
        }
        true
    }
}
