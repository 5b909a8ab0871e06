use thiserror::Error;

/// Everything that can go wrong while migrating a single workflow.
///
/// Job-level errors are captured on the job and only ever surface through
/// the status listing; they never reach the submitter.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The source or target system could not be reached.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed input or a name the target system refuses.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A step translator could not produce output for its step.
    #[error("Translation error: {0}")]
    Translation(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MigrateError {
    /// Whether the step runner may replace the failing step with a marker
    /// and keep going.
    pub fn is_step_recoverable(&self) -> bool {
        matches!(self, MigrateError::Translation(_) | MigrateError::Resolve(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            MigrateError::Connection(_) | MigrateError::Io(_) => FailureKind::System,
            MigrateError::Engine(_) => FailureKind::Engine,
            _ => FailureKind::Business,
        }
    }
}

/// Failures of the `${...}` property resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unknown property type: {prefix} in property string: {text}")]
    UnknownScope { prefix: String, text: String },

    #[error("Could not resolve property: {0}")]
    Unresolved(String),

    #[error("Property resolution did not settle after {limit} passes: {text}")]
    PassLimit { limit: usize, text: String },

    #[error("Resolved text grew beyond {limit} bytes")]
    TooLarge { limit: usize },

    #[error("Error while processing script expression: {0}")]
    Expression(String),
}

/// Internal engine conditions. Logged, never returned to a submitter.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Could not queue a migration job: {0}")]
    PoolRejected(String),

    #[error("Engine is shutting down")]
    ShuttingDown,

    #[error("Worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Job was interrupted before it finished")]
    Interrupted,

    #[error("Entered unknown status: {0}")]
    UnknownStatus(u8),

    #[error("No async runtime to run on: {0}")]
    NoRuntime(String),
}

/// Coarse classification of a job failure, used for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum FailureKind {
    /// Bad input or an unsupported workflow shape.
    Business,
    /// Infrastructure failure (unreachable system, disk error).
    System,
    /// An engine invariant was violated.
    Engine,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Business => write!(f, "Business"),
            FailureKind::System => write!(f, "System"),
            FailureKind::Engine => write!(f, "Engine"),
        }
    }
}
