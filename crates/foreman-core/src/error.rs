use crate::ids::{TaskId, WorkerId};
use thiserror::Error;

/// A convenience `Result` alias using [`ForemanError`].
pub type ForemanResult<T> = Result<T, ForemanError>;

/// Top-level error type for the Foreman control plane.
///
/// Scheduling outcomes that are expected (turn-budget exhaustion, a worker
/// reporting failure) are recorded on the task instead and never surface here.
#[derive(Error, Debug)]
pub enum ForemanError {
    /// A task status change that the lifecycle table does not allow.
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        /// Task the transition was requested for.
        task_id: TaskId,
        /// Status the task was in.
        from: String,
        /// Status that was requested.
        to: String,
    },

    /// Lookup by a task id the queue has never issued.
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    /// Lookup by a worker id the pool does not know.
    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    /// A task entered `assigned` without a worker to record.
    #[error("Task {0} cannot be assigned without a worker id")]
    MissingAssignee(TaskId),

    /// Failure reported by a worker's own turn logic.
    #[error("Worker error: {0}")]
    Worker(String),

    /// A planning result that does not follow the plan format.
    #[error("Plan error: {0}")]
    Plan(String),

    /// Configuration could not be read or is invalid.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
