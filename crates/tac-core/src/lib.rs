//! Core error types shared across the TAC crates.
//!
//! TAC separates two kinds of failure:
//!
//! - [`TacError`]: failures of the engine or its boundary (a full queue or a
//!   bad configuration). These are returned to the caller of an API.
//! - [`TaskError`]: failures of a single task attempt. These never propagate
//!   out of the dispatch loop; they are translated into task stage transitions.
//!
//! [`GenerationError`] is the error produced by a generation backend and is
//! classified as transient (retry-eligible) or permanent.

use serde::{Deserialize, Serialize};

// --- Engine errors ---

/// Top-level error type for the TAC engine and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum TacError {
    /// A submission was rejected because the task queue is at its limit.
    #[error("Task queue is full (limit: {limit})")]
    QueueFull {
        /// The configured `task_queue_limit`.
        limit: usize,
    },

    /// The worker pool has no room for another busy worker.
    #[error("Worker pool capacity exceeded (max: {max})")]
    CapacityExceeded {
        /// The configured `max_concurrent_agents`.
        max: usize,
    },

    /// No task with the given identifier is being tracked.
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// No worker with the given identifier is being tracked.
    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    /// The engine is shutting down and no longer accepts work.
    #[error("Orchestrator is shutting down")]
    ShuttingDown,

    /// The dispatch loop was started more than once.
    #[error("Dispatch loop is already running")]
    AlreadyRunning,

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error raised by the persistence/sharing layer.
    #[error("Memory error: {0}")]
    Memory(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The coordination state is corrupted; there is no safe recovery.
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`TacError`].
pub type TacResult<T> = Result<T, TacError>;

// --- Generation errors ---

/// Whether a generation failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationErrorKind {
    /// Rate limits, timeouts, server errors. Consumes one attempt.
    Transient,
    /// Bad requests, rejected credentials, malformed responses. Terminal.
    Permanent,
}

/// Error returned by a generation backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind:?} generation error: {message}")]
pub struct GenerationError {
    /// Retry classification.
    pub kind: GenerationErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl GenerationError {
    /// A retry-eligible generation failure.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Transient,
            message: message.into(),
        }
    }

    /// A generation failure that no retry will fix.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: GenerationErrorKind::Permanent,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code returned by a provider API.
    ///
    /// 408, 409, 425, 429 and all 5xx codes are transient; every other
    /// non-success code is permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            408 | 409 | 425 | 429 | 500..=599 => Self::transient(message),
            _ => Self::permanent(message),
        }
    }

    /// Whether this error should be retried.
    pub fn is_transient(&self) -> bool {
        self.kind == GenerationErrorKind::Transient
    }
}

// --- Task errors ---

/// Outcome of a failed task attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task's type hint does not name any known worker variant.
    #[error("Unknown worker type: {0}")]
    UnknownWorkerType(String),

    /// The generation backend failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// The task request is missing data the worker needs.
    #[error("Invalid task input: {0}")]
    InvalidInput(String),

    /// A tool ran but reported failure.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A transient resource failure (fetch, persistence, timeout).
    #[error("Resource unavailable: {0}")]
    Resource(String),

    /// The worker panicked while executing the task.
    #[error("Worker crashed: {0}")]
    WorkerCrash(String),

    /// The task was cancelled during shutdown.
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl TaskError {
    /// Whether the dispatch loop may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            TaskError::Generation(e) => e.is_transient(),
            TaskError::Resource(_) | TaskError::WorkerCrash(_) => true,
            TaskError::UnknownWorkerType(_)
            | TaskError::InvalidInput(_)
            | TaskError::Execution(_)
            | TaskError::Cancelled(_) => false,
        }
    }

    /// Whether the failure counts as an executed attempt.
    ///
    /// Unknown worker types are configuration errors detected before any
    /// worker runs.
    pub fn consumes_attempt(&self) -> bool {
        !matches!(self, TaskError::UnknownWorkerType(_))
    }

    /// Short machine-readable name of the error class.
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::UnknownWorkerType(_) => "unknown_worker_type",
            TaskError::Generation(e) if e.is_transient() => "generation_transient",
            TaskError::Generation(_) => "generation_permanent",
            TaskError::InvalidInput(_) => "invalid_input",
            TaskError::Execution(_) => "execution",
            TaskError::Resource(_) => "resource",
            TaskError::WorkerCrash(_) => "worker_crash",
            TaskError::Cancelled(_) => "cancelled",
        }
    }
}

impl From<TacError> for TaskError {
    fn from(err: TacError) -> Self {
        match err {
            TacError::Config(msg) => TaskError::InvalidInput(msg),
            other => TaskError::Resource(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            TacError::QueueFull { limit: 2 }.to_string(),
            "Task queue is full (limit: 2)"
        );
        assert_eq!(
            TacError::Config("bad".to_string()).to_string(),
            "Config error: bad"
        );
    }

    #[test]
    fn test_status_classification() {
        assert!(GenerationError::from_status(429, "slow down").is_transient());
        assert!(GenerationError::from_status(503, "unavailable").is_transient());
        assert!(GenerationError::from_status(408, "timeout").is_transient());
        assert!(!GenerationError::from_status(400, "bad request").is_transient());
        assert!(!GenerationError::from_status(401, "unauthorized").is_transient());
        assert!(!GenerationError::from_status(404, "no such model").is_transient());
    }

    #[test]
    fn test_task_error_retry_policy() {
        assert!(TaskError::from(GenerationError::transient("429")).is_retryable());
        assert!(!TaskError::from(GenerationError::permanent("400")).is_retryable());
        assert!(TaskError::WorkerCrash("panic".into()).is_retryable());
        assert!(TaskError::Resource("timeout".into()).is_retryable());
        assert!(!TaskError::Cancelled("shutdown".into()).is_retryable());
        assert!(!TaskError::UnknownWorkerType("x".into()).is_retryable());
        assert!(!TaskError::InvalidInput("no url".into()).is_retryable());
    }

    #[test]
    fn test_unknown_worker_type_does_not_consume_attempt() {
        assert!(!TaskError::UnknownWorkerType("x".into()).consumes_attempt());
        assert!(TaskError::Execution("exit 1".into()).consumes_attempt());
    }

    #[test]
    fn test_tac_error_into_task_error() {
        let err: TaskError = TacError::Memory("disk full".into()).into();
        assert!(err.is_retryable());
        let err: TaskError = TacError::Config("missing".into()).into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            TaskError::from(GenerationError::transient("x")).code(),
            "generation_transient"
        );
        assert_eq!(TaskError::Cancelled("x".into()).code(), "cancelled");
    }
}
