//! Workers that stand in for real agents so a run can be exercised end to end.

use crate::config::FileConfig;
use async_trait::async_trait;
use foreman_core::{ForemanResult, TaskId, WorkerId};
use foreman_orchestrator::{StaticWorkerPool, Task, TurnOutcome, Worker};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

/// Finishes every task after a fixed number of turns.
///
/// Planning tasks complete with the configured plan. A worker with `asks` set
/// blocks once per task on a help request to that role first.
pub struct SimulatedWorker {
    id: WorkerId,
    role: String,
    turns_per_task: u32,
    asks: Option<String>,
    plan: serde_json::Value,
    plan_task_type: String,
    help_task_type: String,
    progress: Mutex<u32>,
    asked: Mutex<HashSet<TaskId>>,
}

impl SimulatedWorker {
    pub fn new(id: impl Into<WorkerId>, role: impl Into<String>, turns_per_task: u32) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            turns_per_task: turns_per_task.max(1),
            asks: None,
            plan: json!({ "tasks": [] }),
            plan_task_type: "plan".to_string(),
            help_task_type: "help_request".to_string(),
            progress: Mutex::new(0),
            asked: Mutex::new(HashSet::new()),
        }
    }

    pub fn asking(mut self, role: Option<String>) -> Self {
        self.asks = role;
        self
    }

    pub fn planning(mut self, plan: serde_json::Value, plan_task_type: &str) -> Self {
        self.plan = plan;
        self.plan_task_type = plan_task_type.to_string();
        self
    }

    pub fn help_type(mut self, help_task_type: &str) -> Self {
        self.help_task_type = help_task_type.to_string();
        self
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn role(&self) -> &str {
        &self.role
    }

    async fn take_turn(&self, task: &Task) -> ForemanResult<TurnOutcome> {
        if let Some(target) = &self.asks {
            if task.task_type != self.help_task_type && self.asked.lock().insert(task.id) {
                return Ok(TurnOutcome::blocked(
                    target.clone(),
                    format!("Need input from {target} on: {}", task.description),
                ));
            }
        }

        let turn = {
            let mut progress = self.progress.lock();
            *progress += 1;
            *progress
        };
        if turn < self.turns_per_task {
            return Ok(TurnOutcome::Continue);
        }

        if task.task_type == self.plan_task_type {
            return Ok(TurnOutcome::completed(self.plan.clone()));
        }
        Ok(TurnOutcome::completed(json!({
            "summary": format!("{} finished: {}", self.role, task.description),
            "turns": turn,
        })))
    }

    async fn reset_context(&self) {
        *self.progress.lock() = 0;
    }
}

/// One simulated worker per configured entry, in file order.
pub fn build_pool(config: &FileConfig) -> StaticWorkerPool {
    let plan = config.plan_json();
    let settings = &config.orchestrator;
    let workers = config
        .workers
        .iter()
        .map(|w| {
            let worker = SimulatedWorker::new(w.id.as_str(), w.role.as_str(), w.turns_per_task)
                .asking(w.asks.clone())
                .planning(plan.clone(), &settings.plan_task_type)
                .help_type(&settings.help_task_type);
            Arc::new(worker) as Arc<dyn Worker>
        })
        .collect();
    StaticWorkerPool::new(workers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use foreman_core::EventBus;
    use foreman_orchestrator::{
        JsonPlanIngestor, Orchestrator, TaskQueue, TaskSpec, TaskStatus, TickOutcome,
    };

    fn task(spec: TaskSpec) -> Task {
        TaskQueue::new().add(spec)
    }

    #[tokio::test]
    async fn test_finishes_after_configured_turns() {
        let worker = SimulatedWorker::new("coder-1", "coder", 3);
        let code = task(TaskSpec::new("Build", "code"));
        assert_eq!(worker.take_turn(&code).await.unwrap(), TurnOutcome::Continue);
        assert_eq!(worker.take_turn(&code).await.unwrap(), TurnOutcome::Continue);
        match worker.take_turn(&code).await.unwrap() {
            TurnOutcome::Completed { result } => assert_eq!(result["turns"], 3),
            other => panic!("expected completion, got {other:?}"),
        }

        worker.reset_context().await;
        assert_eq!(worker.take_turn(&code).await.unwrap(), TurnOutcome::Continue);
    }

    #[tokio::test]
    async fn test_planner_returns_plan() {
        let plan = json!({ "tasks": [{ "description": "x", "type": "code", "role": "coder" }] });
        let worker =
            SimulatedWorker::new("architect-1", "architect", 1).planning(plan.clone(), "plan");
        let outcome = worker.take_turn(&task(TaskSpec::new("Plan", "plan"))).await.unwrap();
        assert_eq!(outcome, TurnOutcome::completed(plan));
    }

    #[tokio::test]
    async fn test_asks_once_per_task() {
        let worker = SimulatedWorker::new("coder-1", "coder", 1).asking(Some("designer".into()));
        let code = task(TaskSpec::new("Build", "code"));
        assert!(matches!(
            worker.take_turn(&code).await.unwrap(),
            TurnOutcome::Blocked { .. }
        ));
        assert!(matches!(
            worker.take_turn(&code).await.unwrap(),
            TurnOutcome::Completed { .. }
        ));

        let help = task(TaskSpec::new("Answer", "help_request"));
        assert!(matches!(
            worker.take_turn(&help).await.unwrap(),
            TurnOutcome::Completed { .. }
        ));
    }

    #[tokio::test]
    async fn test_default_config_runs_to_completion() {
        let config = FileConfig::default();
        let orch = Orchestrator::new(
            config.orchestrator.clone(),
            EventBus::new(),
            Arc::new(build_pool(&config)),
        )
        .with_plan_ingestor(Arc::new(JsonPlanIngestor));
        orch.set_goal("a maze game").await;

        let mut ticks = 0;
        while orch.tick().await == TickOutcome::Continue {
            ticks += 1;
            assert!(ticks < 50, "simulation did not converge");
        }

        let queue = orch.queue().read().await;
        assert_eq!(queue.total_count(), 4);
        assert_eq!(queue.count_by_status(TaskStatus::Completed), 4);
    }
}
