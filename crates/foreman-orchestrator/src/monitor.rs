use foreman_core::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// What a worker is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Between turns.
    Idle,
    /// In the middle of a turn.
    Working,
    /// Its last task failed.
    Error,
}

/// Counters tracked per worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// Turns taken, whatever their outcome.
    pub total_turns: u32,
    /// Tasks completed.
    pub completed: u32,
    /// Tasks that blocked on a help request.
    pub blocked: u32,
    /// Tasks that failed while held, including budget exhaustion.
    pub failed: u32,
    /// Wall-clock time spent inside turns.
    pub duration_ms: u64,
}

/// Snapshot of one worker as the orchestrator sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerState {
    /// Worker id.
    pub id: WorkerId,
    /// Role the worker serves.
    pub role: String,
    /// Task the worker started and has not finished yet.
    pub current_task: Option<TaskId>,
    /// Current status.
    pub status: WorkerStatus,
    /// Running counters.
    pub metrics: WorkerMetrics,
}

/// Tracks assignment, status and metrics for every worker the orchestrator has
/// scheduled.
///
/// Workers are registered the first time they are seen.
pub struct WorkerMonitor {
    states: Arc<RwLock<BTreeMap<WorkerId, WorkerState>>>,
}

impl WorkerMonitor {
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Make sure `id` has an entry. Returns true if it was new.
    pub async fn register(&self, id: &WorkerId, role: &str) -> bool {
        let mut states = self.states.write().await;
        if states.contains_key(id) {
            return false;
        }
        states.insert(
            id.clone(),
            WorkerState {
                id: id.clone(),
                role: role.to_string(),
                current_task: None,
                status: WorkerStatus::Idle,
                metrics: WorkerMetrics::default(),
            },
        );
        true
    }

    /// Record that `id` now owns `task_id`.
    pub async fn assign(&self, id: &WorkerId, task_id: TaskId) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(id) {
            state.current_task = Some(task_id);
            state.status = WorkerStatus::Idle;
        }
    }

    /// Mark the start of a turn.
    pub async fn begin_turn(&self, id: &WorkerId) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(id) {
            state.status = WorkerStatus::Working;
            state.metrics.total_turns += 1;
        }
    }

    /// Mark the end of a turn that left the task in progress.
    pub async fn end_turn(&self, id: &WorkerId, duration_ms: u64) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(id) {
            state.status = WorkerStatus::Idle;
            state.metrics.duration_ms += duration_ms;
        }
    }

    /// Drop the worker's task after it completed.
    pub async fn record_completed(&self, id: &WorkerId) {
        self.release(id, |m| m.completed += 1, WorkerStatus::Idle).await;
    }

    /// Drop the worker's task after it blocked.
    pub async fn record_blocked(&self, id: &WorkerId) {
        self.release(id, |m| m.blocked += 1, WorkerStatus::Idle).await;
    }

    /// Drop the worker's task after it failed.
    pub async fn record_failed(&self, id: &WorkerId) {
        self.release(id, |m| m.failed += 1, WorkerStatus::Error).await;
    }

    async fn release(
        &self,
        id: &WorkerId,
        bump: impl FnOnce(&mut WorkerMetrics),
        next: WorkerStatus,
    ) {
        let mut states = self.states.write().await;
        if let Some(state) = states.get_mut(id) {
            state.current_task = None;
            state.status = next;
            bump(&mut state.metrics);
        }
    }

    /// Forget the worker's task without counting an outcome.
    pub async fn detach(&self, id: &WorkerId) {
        self.release(id, |_| {}, WorkerStatus::Idle).await;
    }

    /// Task the worker still holds, if any.
    pub async fn current_task(&self, id: &WorkerId) -> Option<TaskId> {
        let states = self.states.read().await;
        states.get(id).and_then(|s| s.current_task)
    }

    /// Get the state of a specific worker.
    pub async fn get_state(&self, id: &WorkerId) -> Option<WorkerState> {
        let states = self.states.read().await;
        states.get(id).cloned()
    }

    /// Get a snapshot of all worker states, ordered by id.
    pub async fn snapshot(&self) -> Vec<WorkerState> {
        let states = self.states.read().await;
        states.values().cloned().collect()
    }

    /// Get aggregate metrics across all workers.
    pub async fn aggregate_metrics(&self) -> WorkerMetrics {
        let states = self.states.read().await;
        let mut total = WorkerMetrics::default();
        for state in states.values() {
            total.total_turns += state.metrics.total_turns;
            total.completed += state.metrics.completed;
            total.blocked += state.metrics.blocked;
            total.failed += state.metrics.failed;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON (for dashboards).
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "workers": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for WorkerMonitor {
    fn default() -> Self {
        Self::new()
    }
}
