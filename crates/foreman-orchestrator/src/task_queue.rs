use crate::types::{Task, TaskSpec, TaskStatus, TransitionExtras};
use chrono::Utc;
use foreman_core::{ForemanError, ForemanResult, TaskId};
use std::collections::{BTreeMap, HashMap};

/// Owns every task of a run, its status and its dependency edges.
///
/// Ids come from a counter private to each queue, so independent queues never
/// share an id space. Tasks are kept after they finish.
#[derive(Debug, Default)]
pub struct TaskQueue {
    /// Keyed by id, which is also creation order.
    tasks: BTreeMap<TaskId, Task>,
    last_id: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a new `pending` task and return a snapshot of it.
    pub fn add(&mut self, spec: TaskSpec) -> Task {
        self.last_id += 1;
        let id = TaskId::new(self.last_id);
        let task = Task::from_spec(id, spec);
        self.tasks.insert(id, task.clone());
        task
    }

    /// Admit several tasks in input order.
    pub fn add_plan(&mut self, specs: Vec<TaskSpec>) -> Vec<Task> {
        specs.into_iter().map(|spec| self.add(spec)).collect()
    }

    /// The highest-priority ready task a worker of `role` may take.
    ///
    /// Ready means `pending` with every dependency `completed`. Equal
    /// priorities go to the task created first. Does not change any state.
    pub fn next_for(&self, role: &str) -> Option<Task> {
        self.tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.accepts_role(role))
            .filter(|t| self.dependencies_met(t))
            // max_by_key keeps the last maximum, so compare ids in reverse.
            .max_by_key(|t| (t.priority, std::cmp::Reverse(t.id)))
            .cloned()
    }

    fn dependencies_met(&self, task: &Task) -> bool {
        task.depends_on.iter().all(|dep| {
            self.tasks
                .get(dep)
                .is_some_and(|d| d.status == TaskStatus::Completed)
        })
    }

    /// Move a task to `to`, applying whatever `extras` the new status needs.
    ///
    /// Disallowed transitions fail with [`ForemanError::InvalidTransition`]
    /// and leave the task as it was.
    pub fn transition(
        &mut self,
        id: TaskId,
        to: TaskStatus,
        extras: TransitionExtras,
    ) -> ForemanResult<Task> {
        let task = self.tasks.get_mut(&id).ok_or(ForemanError::TaskNotFound(id))?;

        if !task.status.can_transition_to(to) {
            return Err(ForemanError::InvalidTransition {
                task_id: id,
                from: task.status.to_string(),
                to: to.to_string(),
            });
        }

        match to {
            TaskStatus::Assigned => {
                let agent_id = extras.agent_id.ok_or(ForemanError::MissingAssignee(id))?;
                task.assigned_agent = Some(agent_id);
            }
            TaskStatus::Pending => {
                task.assigned_agent = None;
            }
            TaskStatus::Completed => {
                task.result = extras.result;
                task.completed_at = Some(Utc::now());
            }
            TaskStatus::Failed => {
                task.result = extras.result;
            }
            TaskStatus::Active | TaskStatus::Blocked => {}
        }
        task.status = to;

        Ok(task.clone())
    }

    /// Whether every task is `completed` or `failed`. True for an empty queue.
    pub fn all_done(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// Snapshot of a task.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.get(&id).cloned()
    }

    /// Snapshot of a task, or [`ForemanError::TaskNotFound`].
    pub fn try_get(&self, id: TaskId) -> ForemanResult<Task> {
        self.get(id).ok_or(ForemanError::TaskNotFound(id))
    }

    /// Status of a task without cloning it.
    pub fn status_of(&self, id: TaskId) -> Option<TaskStatus> {
        self.tasks.get(&id).map(|t| t.status)
    }

    /// Snapshots of all tasks in creation order.
    pub fn all_tasks(&self) -> Vec<Task> {
        self.tasks.values().cloned().collect()
    }

    /// Snapshots of the tasks currently in `status`, in creation order.
    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.tasks
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect()
    }

    /// Number of tasks in `status`.
    pub fn count_by_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Total number of tasks.
    pub fn total_count(&self) -> usize {
        self.tasks.len()
    }

    /// Check for cycles in the dependency graph.
    /// Returns true if a cycle is detected.
    pub fn has_cycle(&self) -> bool {
        let mut visited = HashMap::new();
        for &id in self.tasks.keys() {
            if self.dfs_cycle(id, &mut visited) {
                return true;
            }
        }
        false
    }

    fn dfs_cycle(&self, id: TaskId, visited: &mut HashMap<TaskId, u8>) -> bool {
        match visited.get(&id) {
            Some(1) => return true,  // back edge
            Some(2) => return false, // finished
            _ => {}
        }
        visited.insert(id, 1);
        if let Some(task) = self.tasks.get(&id) {
            for dep in &task.depends_on {
                if self.dfs_cycle(*dep, visited) {
                    return true;
                }
            }
        }
        visited.insert(id, 2);
        false
    }
}
