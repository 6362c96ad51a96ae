use chrono::{DateTime, Utc};
use foreman_core::{TaskId, WorkerId};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Waiting for its dependencies and an eligible worker.
    Pending,
    /// Handed to a worker but not yet started.
    Assigned,
    /// A worker is taking turns on it.
    Active,
    /// Stopped on a help request.
    Blocked,
    /// Finished successfully. Terminal.
    Completed,
    /// Finished unsuccessfully. Can be re-armed.
    Failed,
}

impl TaskStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Assigned,
        TaskStatus::Active,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// Whether the lifecycle allows moving from `self` to `target`.
    pub fn can_transition_to(self, target: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, target),
            (Pending, Assigned)
                | (Pending, Failed)
                | (Assigned, Active)
                | (Assigned, Pending)
                | (Active, Completed)
                | (Active, Blocked)
                | (Active, Failed)
                | (Blocked, Pending)
                | (Blocked, Failed)
                | (Failed, Pending)
        )
    }

    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Lowercase name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Assigned => "assigned",
            TaskStatus::Active => "active",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission request for a new task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// What the worker should do.
    pub description: String,
    /// Free-form kind, such as `plan`, `code` or `help_request`.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Only workers of this role may take the task. `None` means any role.
    #[serde(default)]
    pub assign_to_role: Option<String>,
    /// Tasks that must be `completed` before this one is eligible.
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    /// Opaque data handed to the worker.
    #[serde(default = "empty_context")]
    pub context: serde_json::Value,
    /// Higher runs first. Ties go to the older task.
    #[serde(default)]
    pub priority: i64,
}

fn empty_context() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TaskSpec {
    /// A spec with no role restriction, no dependencies and priority 0.
    pub fn new(description: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            task_type: task_type.into(),
            assign_to_role: None,
            depends_on: Vec::new(),
            context: empty_context(),
            priority: 0,
        }
    }

    /// Restrict the task to workers of `role`.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.assign_to_role = Some(role.into());
        self
    }

    /// Wait for `deps` to complete first.
    pub fn with_dependencies(mut self, deps: Vec<TaskId>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Attach worker-facing context.
    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Set the scheduling priority.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// A task in the orchestration queue.
///
/// Values handed out by the queue are snapshots; changing one does not touch
/// the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Queue-assigned id, unique within one queue.
    pub id: TaskId,
    /// Copied from [`TaskSpec::description`].
    pub description: String,
    /// Copied from [`TaskSpec::task_type`].
    #[serde(rename = "type")]
    pub task_type: String,
    /// Copied from [`TaskSpec::assign_to_role`].
    pub assign_to_role: Option<String>,
    /// Copied from [`TaskSpec::depends_on`].
    pub depends_on: Vec<TaskId>,
    /// Copied from [`TaskSpec::context`].
    pub context: serde_json::Value,
    /// Copied from [`TaskSpec::priority`].
    pub priority: i64,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Worker recorded when the task was last assigned.
    pub assigned_agent: Option<WorkerId>,
    /// Outcome recorded on completion or failure.
    pub result: Option<serde_json::Value>,
    /// Admission time.
    pub created_at: DateTime<Utc>,
    /// Set on entry to `completed` or `failed`.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    pub(crate) fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            description: spec.description,
            task_type: spec.task_type,
            assign_to_role: spec.assign_to_role,
            depends_on: spec.depends_on,
            context: spec.context,
            priority: spec.priority,
            status: TaskStatus::Pending,
            assigned_agent: None,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Whether a worker of `role` may take this task.
    pub fn accepts_role(&self, role: &str) -> bool {
        self.assign_to_role.as_deref().map_or(true, |r| r == role)
    }
}

/// Extra data applied alongside a status change.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransitionExtras {
    /// Worker to record on entry to `assigned`.
    pub agent_id: Option<WorkerId>,
    /// Result to record on entry to `completed` or `failed`.
    pub result: Option<serde_json::Value>,
}

impl TransitionExtras {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn agent(agent_id: WorkerId) -> Self {
        Self {
            agent_id: Some(agent_id),
            result: None,
        }
    }

    pub fn result(result: serde_json::Value) -> Self {
        Self {
            agent_id: None,
            result: Some(result),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_spec_defaults() {
        let spec = TaskSpec::new("Design the level", "design");
        assert!(spec.assign_to_role.is_none());
        assert!(spec.depends_on.is_empty());
        assert_eq!(spec.priority, 0);
        assert!(spec.context.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_task_spec_deserialize_defaults() {
        let spec: TaskSpec =
            serde_json::from_str(r#"{"description": "Write tests", "type": "test"}"#).unwrap();
        assert_eq!(spec.task_type, "test");
        assert_eq!(spec.priority, 0);
        assert!(spec.context.is_object());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Blocked.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
    }

    #[test]
    fn test_completed_has_no_exits() {
        for to in TaskStatus::ALL {
            assert!(!TaskStatus::Completed.can_transition_to(to));
        }
    }

    #[test]
    fn test_accepts_role() {
        let open = Task::from_spec(TaskId::new(1), TaskSpec::new("any", "code"));
        assert!(open.accepts_role("coder"));
        let pinned = Task::from_spec(
            TaskId::new(2),
            TaskSpec::new("art", "art").with_role("designer"),
        );
        assert!(pinned.accepts_role("designer"));
        assert!(!pinned.accepts_role("coder"));
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::Blocked).unwrap();
        assert_eq!(json, "\"blocked\"");
        let parsed: TaskStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, TaskStatus::Failed);
    }
}
