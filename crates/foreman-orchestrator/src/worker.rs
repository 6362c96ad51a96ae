use crate::types::Task;
use async_trait::async_trait;
use foreman_core::{ForemanResult, WorkerId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What a blocked worker needs, and from whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelpRequest {
    /// Role that should service the request.
    pub target_role: String,
    /// Free-text description of what is needed.
    pub request: String,
}

impl HelpRequest {
    pub fn new(target_role: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            target_role: target_role.into(),
            request: request.into(),
        }
    }
}

/// Result of one worker turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TurnOutcome {
    /// The task is finished.
    Completed { result: serde_json::Value },
    /// The worker cannot continue without help from another role.
    Blocked { help: HelpRequest },
    /// The worker's own logic failed.
    Error { result: serde_json::Value },
    /// More turns are needed.
    Continue,
}

impl TurnOutcome {
    pub fn completed(result: impl Into<serde_json::Value>) -> Self {
        Self::Completed {
            result: result.into(),
        }
    }

    pub fn blocked(target_role: impl Into<String>, request: impl Into<String>) -> Self {
        Self::Blocked {
            help: HelpRequest::new(target_role, request),
        }
    }

    pub fn error(result: impl Into<serde_json::Value>) -> Self {
        Self::Error {
            result: result.into(),
        }
    }

    /// Short label used in logs and events.
    pub fn label(&self) -> &'static str {
        match self {
            TurnOutcome::Completed { .. } => "completed",
            TurnOutcome::Blocked { .. } => "blocked",
            TurnOutcome::Error { .. } => "error",
            TurnOutcome::Continue => "continue",
        }
    }
}

/// An executor that performs turns of work on tasks.
///
/// How a turn decides what to do (calling a model, running tools) is entirely
/// up to the implementation.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Stable id of this worker.
    fn id(&self) -> &WorkerId;

    /// Role used to match tasks to this worker.
    fn role(&self) -> &str;

    /// Perform one turn on `task`.
    ///
    /// Returning `Err` is treated like [`TurnOutcome::Error`].
    async fn take_turn(&self, task: &Task) -> ForemanResult<TurnOutcome>;

    /// Drop any state carried over from the previous task.
    ///
    /// Called after every completed, blocked or failed task.
    async fn reset_context(&self);
}

/// Source of workers for the orchestrator. Spawning and removal policy lives
/// outside the core.
pub trait WorkerPool: Send + Sync {
    /// Workers currently available for scheduling.
    fn idle_workers(&self) -> Vec<Arc<dyn Worker>>;

    /// Every worker in the pool.
    fn all_workers(&self) -> Vec<Arc<dyn Worker>>;

    /// Workers whose role is `role`.
    fn by_role(&self, role: &str) -> Vec<Arc<dyn Worker>> {
        self.all_workers()
            .into_iter()
            .filter(|w| w.role() == role)
            .collect()
    }
}

/// A fixed set of workers, all of which are always available.
#[derive(Default)]
pub struct StaticWorkerPool {
    workers: Vec<Arc<dyn Worker>>,
}

impl StaticWorkerPool {
    pub fn new(workers: Vec<Arc<dyn Worker>>) -> Self {
        Self { workers }
    }

    /// Add a worker at the end of the enumeration order.
    pub fn push(&mut self, worker: Arc<dyn Worker>) {
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl WorkerPool for StaticWorkerPool {
    fn idle_workers(&self) -> Vec<Arc<dyn Worker>> {
        self.workers.clone()
    }

    fn all_workers(&self) -> Vec<Arc<dyn Worker>> {
        self.workers.clone()
    }
}

impl std::fmt::Debug for StaticWorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.workers.iter().map(|w| (w.id().as_str(), w.role())))
            .finish()
    }
}
