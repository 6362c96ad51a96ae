//! End-to-end orchestration tests.
//!
//! Drives the orchestrator with scripted workers and checks task states, turn
//! accounting and the event stream as a whole.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use foreman_core::{EventBus, EventRecorder, EventType, ForemanResult, TaskId, WorkerId};
use foreman_orchestrator::*;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Scripted worker: replays outcomes, then falls back to a fixed one
// ---------------------------------------------------------------------------

struct ScriptedWorker {
    id: WorkerId,
    role: String,
    script: Mutex<VecDeque<TurnOutcome>>,
    fallback: TurnOutcome,
    delay: Option<Duration>,
    turns: AtomicU32,
    seen: Mutex<Vec<TaskId>>,
}

impl ScriptedWorker {
    fn new(id: &str, role: &str) -> Self {
        Self {
            id: WorkerId::from(id),
            role: role.to_string(),
            script: Mutex::new(VecDeque::new()),
            fallback: TurnOutcome::completed("done"),
            delay: None,
            turns: AtomicU32::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn then(self, outcome: TurnOutcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    fn otherwise(mut self, outcome: TurnOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn turns(&self) -> u32 {
        self.turns.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    fn id(&self) -> &WorkerId {
        &self.id
    }

    fn role(&self) -> &str {
        &self.role
    }

    async fn take_turn(&self, task: &Task) -> ForemanResult<TurnOutcome> {
        self.turns.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(task.id);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().pop_front();
        Ok(next.unwrap_or_else(|| self.fallback.clone()))
    }

    async fn reset_context(&self) {}
}

fn build(config: OrchestratorConfig, workers: &[Arc<ScriptedWorker>]) -> Arc<Orchestrator> {
    let pool = StaticWorkerPool::new(
        workers
            .iter()
            .map(|w| Arc::clone(w) as Arc<dyn Worker>)
            .collect(),
    );
    Arc::new(Orchestrator::new(config, EventBus::new(), Arc::new(pool)))
}

fn types(recorder: &EventRecorder) -> Vec<EventType> {
    recorder.events().iter().map(|e| e.event_type()).collect()
}

// ---------------------------------------------------------------------------
// Scheduling scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_planning_task_completes_in_one_tick() {
    let architect = Arc::new(ScriptedWorker::new("architect-1", "architect"));
    let orch = build(OrchestratorConfig::default(), &[architect.clone()]);
    let recorder = EventRecorder::attach(orch.bus());

    let plan = orch.set_goal("a tiny puzzle game").await;
    assert_eq!(plan.priority, 100);

    assert_eq!(orch.tick().await, TickOutcome::AllDone);
    assert_eq!(
        orch.queue().read().await.status_of(plan.id),
        Some(TaskStatus::Completed)
    );
    assert!(orch.queue().read().await.all_done());
    assert_eq!(architect.turns(), 1);

    assert_eq!(
        types(&recorder),
        vec![
            EventType::GoalSet,
            EventType::TaskCreated,
            EventType::AgentSpawned,
            EventType::TaskAssigned,
            EventType::AgentTurn,
            EventType::AgentIdle,
            EventType::TaskCompleted,
        ]
    );
    let ids: Vec<u64> = recorder.events().iter().map(|e| e.id()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_dependency_gates_assignment() {
    let first = Arc::new(
        ScriptedWorker::new("coder-1", "coder")
            .then(TurnOutcome::Continue)
            .then(TurnOutcome::completed("base")),
    );
    let second = Arc::new(ScriptedWorker::new("coder-2", "coder"));
    let orch = build(OrchestratorConfig::default(), &[first.clone(), second.clone()]);

    let base = orch.add_task(TaskSpec::new("Base", "code")).await;
    let follow = orch
        .add_task(
            TaskSpec::new("Follow-up", "code")
                .with_priority(50)
                .with_dependencies(vec![base.id]),
        )
        .await;

    // The follow-up outranks the base task but is not ready.
    orch.tick().await;
    assert_eq!(*first.seen.lock(), vec![base.id]);
    assert_eq!(second.turns(), 0);
    assert_eq!(
        orch.queue().read().await.status_of(follow.id),
        Some(TaskStatus::Pending)
    );

    // Base completes during coder-1's continuation turn, after coder-2 already
    // found nothing ready in this tick.
    orch.tick().await;
    assert_eq!(second.turns(), 0);
    assert_eq!(
        orch.queue().read().await.status_of(base.id),
        Some(TaskStatus::Completed)
    );

    // Enumeration order gives the follow-up to coder-1.
    assert_eq!(orch.tick().await, TickOutcome::AllDone);
    assert_eq!(*first.seen.lock(), vec![base.id, base.id, follow.id]);
    assert_eq!(second.turns(), 0);
}

#[tokio::test]
async fn test_blocked_task_escalates_to_designer() {
    let coder = Arc::new(
        ScriptedWorker::new("coder-1", "coder")
            .then(TurnOutcome::blocked("designer", "Which palette?")),
    );
    let orch = build(OrchestratorConfig::default(), &[coder]);
    let recorder = EventRecorder::attach(orch.bus());
    let task = orch
        .add_task(TaskSpec::new("Render sprites", "code").with_role("coder").with_priority(7))
        .await;

    orch.tick().await;

    let queue = orch.queue().read().await;
    assert_eq!(queue.status_of(task.id), Some(TaskStatus::Blocked));
    let pending = queue.by_status(TaskStatus::Pending);
    let help = &pending[0];
    assert_eq!(help.task_type, "help_request");
    assert_eq!(help.assign_to_role.as_deref(), Some("designer"));
    assert_eq!(help.priority, 17);
    assert_eq!(help.description, "Which palette?");
    drop(queue);

    let requests = recorder.of_type(EventType::HelpRequest);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].agent_id(), Some(&WorkerId::from("coder-1")));
    assert_eq!(requests[0].data()["blocked_task"], json!(task.id));
    assert_eq!(recorder.of_type(EventType::TaskBlocked).len(), 1);
}

#[tokio::test]
async fn test_help_result_unblocks_requester() {
    let coder = Arc::new(
        ScriptedWorker::new("coder-1", "coder")
            .then(TurnOutcome::blocked("designer", "Which palette?"))
            .then(TurnOutcome::completed("sprites")),
    );
    let designer = Arc::new(
        ScriptedWorker::new("designer-1", "designer").then(TurnOutcome::completed("pastel")),
    );
    let orch = build(OrchestratorConfig::default(), &[coder.clone(), designer]);
    let task = orch.add_task(TaskSpec::new("Render sprites", "code")).await;

    orch.tick().await;
    assert_eq!(
        orch.queue().read().await.status_of(task.id),
        Some(TaskStatus::Pending)
    );

    assert_eq!(orch.tick().await, TickOutcome::AllDone);
    let task = orch.queue().read().await.get(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!("sprites")));
    assert_eq!(coder.turns(), 2);
}

#[tokio::test]
async fn test_turn_budget_is_enforced() {
    let coder = Arc::new(ScriptedWorker::new("coder-1", "coder").otherwise(TurnOutcome::Continue));
    let orch = build(OrchestratorConfig::default(), &[coder.clone()]);
    let recorder = EventRecorder::attach(orch.bus());
    let task = orch.add_task(TaskSpec::new("Endless", "code")).await;

    let mut ticks = 0;
    while orch.tick().await == TickOutcome::Continue {
        ticks += 1;
        assert!(ticks <= 25, "run never finished");
    }

    assert_eq!(coder.turns(), 20);
    assert_eq!(recorder.of_type(EventType::AgentTurn).len(), 20);
    let task = orch.queue().read().await.get(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.unwrap()["max_turns"], 20);
    assert_eq!(recorder.of_type(EventType::TaskFailed).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_turn_times_out() {
    let coder = Arc::new(ScriptedWorker::new("coder-1", "coder").slow(Duration::from_secs(60)));
    let orch = build(
        OrchestratorConfig::default().with_turn_timeout_ms(500),
        &[coder],
    );
    let task = orch.add_task(TaskSpec::new("Hangs", "code")).await;

    assert_eq!(orch.tick().await, TickOutcome::AllDone);
    let task = orch.queue().read().await.get(task.id).unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.result.unwrap()["error"], "turn timed out");
}

#[tokio::test]
async fn test_json_plan_drives_follow_up_work() {
    let plan = json!({
        "tasks": [
            {"description": "Draw tiles", "type": "art", "role": "designer"},
            {"description": "Tile engine", "type": "code", "role": "coder", "depends_on": [0]}
        ]
    });
    let architect = Arc::new(
        ScriptedWorker::new("architect-1", "architect").then(TurnOutcome::completed(plan)),
    );
    let designer = Arc::new(ScriptedWorker::new("designer-1", "designer"));
    let coder = Arc::new(ScriptedWorker::new("coder-1", "coder"));
    let pool = StaticWorkerPool::new(vec![
        architect as Arc<dyn Worker>,
        coder.clone() as Arc<dyn Worker>,
        designer as Arc<dyn Worker>,
    ]);
    let orch = Orchestrator::new(OrchestratorConfig::default(), EventBus::new(), Arc::new(pool))
        .with_plan_ingestor(Arc::new(JsonPlanIngestor));

    orch.set_goal("tile game").await;
    // Architect plans; designer draws in the same tick; coder is gated.
    assert_eq!(orch.tick().await, TickOutcome::Continue);
    assert_eq!(coder.turns(), 0);
    assert_eq!(orch.tick().await, TickOutcome::AllDone);
    assert_eq!(coder.turns(), 1);

    let summary = orch.summary().await;
    assert_eq!(summary.total_tasks, 3);
    assert_eq!(summary.completed, 3);
}

// ---------------------------------------------------------------------------
// Run control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_loop_stops_when_everything_finishes() {
    let coder = Arc::new(
        ScriptedWorker::new("coder-1", "coder")
            .then(TurnOutcome::Continue)
            .then(TurnOutcome::Continue),
    );
    let orch = build(
        OrchestratorConfig::default().with_tick_interval_ms(5),
        &[coder.clone()],
    );
    let recorder = EventRecorder::attach(orch.bus());
    orch.add_task(TaskSpec::new("Three turns", "code")).await;

    assert!(orch.start());
    assert!(!orch.start());
    tokio::time::timeout(Duration::from_secs(5), orch.wait_until_stopped())
        .await
        .expect("run should finish");

    assert_eq!(orch.state(), RunState::Stopped);
    assert_eq!(coder.turns(), 3);
    let stopped = recorder.of_type(EventType::RunStopped);
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].data()["reason"], "all tasks finished");
    assert_eq!(recorder.of_type(EventType::RunStarted).len(), 1);
}

#[tokio::test]
async fn test_pause_resume_and_stop() {
    let coder = Arc::new(ScriptedWorker::new("coder-1", "coder").otherwise(TurnOutcome::Continue));
    let orch = build(
        OrchestratorConfig::default()
            .with_tick_interval_ms(5)
            .with_max_turns(10_000),
        &[coder.clone()],
    );
    let recorder = EventRecorder::attach(orch.bus());
    orch.add_task(TaskSpec::new("Long haul", "code")).await;

    assert!(!orch.pause().await);
    assert!(orch.start());
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(orch.pause().await);
    assert_eq!(orch.state(), RunState::Paused);
    let frozen = coder.turns();
    assert!(frozen >= 1);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(coder.turns(), frozen);

    assert!(orch.start());
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(coder.turns() > frozen);

    assert!(orch.stop().await);
    assert!(!orch.stop().await);
    assert_eq!(orch.state(), RunState::Stopped);
    let after_stop = coder.turns();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(coder.turns(), after_stop);

    assert_eq!(recorder.of_type(EventType::RunStarted).len(), 2);
    assert_eq!(recorder.of_type(EventType::RunPaused).len(), 1);
    let stopped = recorder.of_type(EventType::RunStopped);
    assert_eq!(stopped.len(), 1);
    assert_eq!(stopped[0].data()["reason"], "requested");
}

#[tokio::test]
async fn test_empty_queue_finishes_immediately() {
    let orch = build(OrchestratorConfig::default(), &[]);
    assert!(orch.start());
    tokio::time::timeout(Duration::from_secs(5), orch.wait_until_stopped())
        .await
        .expect("empty run should finish");
    assert_eq!(orch.summary().await.total_tasks, 0);
}

#[tokio::test]
async fn test_monitor_reflects_outcomes() {
    let coder = Arc::new(
        ScriptedWorker::new("coder-1", "coder")
            .then(TurnOutcome::completed("a"))
            .then(TurnOutcome::error("b")),
    );
    let orch = build(OrchestratorConfig::default(), &[coder]);
    orch.add_task(TaskSpec::new("A", "code")).await;
    orch.add_task(TaskSpec::new("B", "code")).await;
    orch.tick().await;
    orch.tick().await;

    let state = orch
        .monitor()
        .get_state(&WorkerId::from("coder-1"))
        .await
        .unwrap();
    assert_eq!(state.metrics.total_turns, 2);
    assert_eq!(state.metrics.completed, 1);
    assert_eq!(state.metrics.failed, 1);
    assert!(state.current_task.is_none());

    let json = orch.monitor().to_json().await;
    assert_eq!(json["aggregate"]["total_turns"], 2);
}
