use crate::config::OrchestratorConfig;
use crate::monitor::{WorkerMonitor, WorkerStatus};
use crate::plan::{admit_plan, NoopPlanIngestor, PlanIngestor};
use crate::task_queue::TaskQueue;
use crate::types::{Task, TaskSpec, TaskStatus, TransitionExtras};
use crate::worker::{HelpRequest, TurnOutcome, Worker, WorkerPool};
use foreman_core::{EventBus, EventType, ForemanError, ForemanResult, TaskId, WorkerId};
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of the tick loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Not ticking. The initial state, and where a finished run ends up.
    Stopped,
    /// Ticking on the configured interval.
    Running,
    /// Not ticking, resumable with `start`.
    Paused,
}

/// What a tick found once it had processed every worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Work remains; another tick should follow.
    Continue,
    /// Every task is completed or failed.
    AllDone,
}

struct LoopHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Drives workers over the task queue, one tick at a time.
///
/// Each tick pairs idle workers with the best ready task for their role, gives
/// every worker with an active task one turn, enforces the per-task turn
/// budget, and turns blocked work into help-request tasks. The loop is single
/// threaded: turns run one after another and the queue is never written while
/// a turn is in progress.
pub struct Orchestrator {
    config: OrchestratorConfig,
    queue: Arc<RwLock<TaskQueue>>,
    bus: EventBus,
    pool: Arc<dyn WorkerPool>,
    monitor: Arc<WorkerMonitor>,
    ingestor: Arc<dyn PlanIngestor>,
    turn_counts: Mutex<HashMap<TaskId, u32>>,
    state: watch::Sender<RunState>,
    runner: Mutex<Option<LoopHandle>>,
}

impl Orchestrator {
    /// Create an orchestrator over an empty queue.
    pub fn new(config: OrchestratorConfig, bus: EventBus, pool: Arc<dyn WorkerPool>) -> Self {
        let (state, _) = watch::channel(RunState::Stopped);
        Self {
            config,
            queue: Arc::new(RwLock::new(TaskQueue::new())),
            bus,
            pool,
            monitor: Arc::new(WorkerMonitor::new()),
            ingestor: Arc::new(NoopPlanIngestor),
            turn_counts: Mutex::new(HashMap::new()),
            state,
            runner: Mutex::new(None),
        }
    }

    /// Replace the plan ingestor (the default creates no follow-up tasks).
    pub fn with_plan_ingestor(mut self, ingestor: Arc<dyn PlanIngestor>) -> Self {
        self.ingestor = ingestor;
        self
    }

    /// Get a reference to the task queue.
    pub fn queue(&self) -> &Arc<RwLock<TaskQueue>> {
        &self.queue
    }

    /// Get a reference to the event bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Get a reference to the worker monitor.
    pub fn monitor(&self) -> &Arc<WorkerMonitor> {
        &self.monitor
    }

    /// Settings this orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Current run state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Receiver that observes every run-state change.
    pub fn watch_state(&self) -> watch::Receiver<RunState> {
        self.state.subscribe()
    }

    /// Turns consumed by `task_id` since it was last assigned.
    pub fn turns_used(&self, task_id: TaskId) -> u32 {
        self.turn_counts.lock().get(&task_id).copied().unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Intake
    // ------------------------------------------------------------------

    /// Admit a task and announce it.
    pub async fn add_task(&self, spec: TaskSpec) -> Task {
        let task = self.queue.write().await.add(spec);
        self.announce_created(&task);
        task
    }

    /// Admit several tasks in order.
    pub async fn add_plan(&self, specs: Vec<TaskSpec>) -> Vec<Task> {
        let tasks = self.queue.write().await.add_plan(specs);
        for task in &tasks {
            self.announce_created(task);
        }
        tasks
    }

    /// Accept a goal: announce it and seed the queue with a planning task.
    pub async fn set_goal(&self, goal: &str) -> Task {
        info!(goal = %goal, "Orchestrator: goal set");
        self.bus.emit(EventType::GoalSet, None, None, json!({ "goal": goal }));

        let spec = TaskSpec::new(format!("Plan the work for: {goal}"), &self.config.plan_task_type)
            .with_role(self.config.planning_role.clone())
            .with_priority(self.config.planning_priority)
            .with_context(json!({ "goal": goal }));
        self.add_task(spec).await
    }

    /// Put a failed or blocked task back to `pending`.
    pub async fn rearm(&self, task_id: TaskId) -> ForemanResult<Task> {
        let task = self
            .queue
            .write()
            .await
            .transition(task_id, TaskStatus::Pending, TransitionExtras::none())?;
        info!(task_id = %task_id, "Task re-armed");
        self.bus.emit(
            EventType::TaskRearmed,
            None,
            Some(task_id),
            json!({ "reason": "manual" }),
        );
        Ok(task)
    }

    fn announce_created(&self, task: &Task) {
        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            priority = task.priority,
            "Task created"
        );
        self.bus.emit(
            EventType::TaskCreated,
            None,
            Some(task.id),
            json!({
                "description": task.description,
                "type": task.task_type,
                "role": task.assign_to_role,
                "priority": task.priority,
                "depends_on": task.depends_on,
            }),
        );
    }

    // ------------------------------------------------------------------
    // Run control
    // ------------------------------------------------------------------

    /// Start the tick loop on the current tokio runtime.
    ///
    /// The first tick runs right away. Returns false if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                false
            } else {
                *state = RunState::Running;
                true
            }
        });
        if !started {
            return false;
        }

        info!(
            tick_interval_ms = self.config.tick_interval_ms,
            max_turns = self.config.max_turns_per_task,
            "Orchestrator: starting"
        );
        self.bus.emit(
            EventType::RunStarted,
            None,
            None,
            json!({ "tick_interval_ms": self.config.tick_interval_ms }),
        );

        let cancel = CancellationToken::new();
        let join = tokio::spawn(Arc::clone(self).run_loop(cancel.clone()));
        *self.runner.lock() = Some(LoopHandle { cancel, join });
        true
    }

    /// Stop ticking but keep all state for a later [`start`](Self::start).
    ///
    /// Waits for the loop to exit, so no tick is in flight once this returns.
    /// Returns false if the loop was not running.
    pub async fn pause(&self) -> bool {
        let paused = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Paused;
                true
            } else {
                false
            }
        });
        if !paused {
            return false;
        }
        self.halt_loop().await;
        info!("Orchestrator: paused");
        self.bus.emit(EventType::RunPaused, None, None, json!({}));
        true
    }

    /// Terminal stop. Waits for the loop to exit.
    ///
    /// Returns false if already stopped.
    pub async fn stop(&self) -> bool {
        let previous = self.state.send_replace(RunState::Stopped);
        if previous == RunState::Stopped {
            return false;
        }
        self.halt_loop().await;
        info!("Orchestrator: stopped");
        self.bus.emit(
            EventType::RunStopped,
            None,
            None,
            json!({ "reason": "requested" }),
        );
        true
    }

    /// Resolve once the run reaches [`RunState::Stopped`].
    pub async fn wait_until_stopped(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|state| *state == RunState::Stopped).await;
    }

    async fn halt_loop(&self) {
        let handle = self.runner.lock().take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if let Err(e) = handle.join.await {
                error!(error = %e, "Orchestrator loop ended abnormally");
            }
        }
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            if self.tick().await == TickOutcome::AllDone {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
            }
        }
        debug!("Orchestrator loop exited");
    }

    /// Move from running to stopped after the last task finished.
    fn finish(&self) {
        let finished = self.state.send_if_modified(|state| {
            if *state == RunState::Running {
                *state = RunState::Stopped;
                true
            } else {
                false
            }
        });
        if finished {
            info!("Orchestrator: all tasks finished");
            self.bus.emit(
                EventType::RunStopped,
                None,
                None,
                json!({ "reason": "all tasks finished" }),
            );
        }
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Run one scheduling pass.
    ///
    /// Errors and panics inside the pass are logged and swallowed; the result
    /// is then [`TickOutcome::Continue`] so the loop carries on.
    pub async fn tick(&self) -> TickOutcome {
        match AssertUnwindSafe(self.run_tick()).catch_unwind().await {
            Ok(Ok(TickOutcome::AllDone)) => {
                self.finish();
                TickOutcome::AllDone
            }
            Ok(Ok(TickOutcome::Continue)) => TickOutcome::Continue,
            Ok(Err(e)) => {
                error!(error = %e, "Tick failed; continuing on the next interval");
                TickOutcome::Continue
            }
            Err(panic) => {
                error!(
                    panic = %panic_message(panic.as_ref()),
                    "Tick panicked; continuing on the next interval"
                );
                TickOutcome::Continue
            }
        }
    }

    async fn run_tick(&self) -> ForemanResult<TickOutcome> {
        let idle = self.pool.idle_workers();
        let all = self.pool.all_workers();

        for worker in &all {
            if self.monitor.register(worker.id(), worker.role()).await {
                self.bus.emit(
                    EventType::AgentSpawned,
                    Some(worker.id().clone()),
                    None,
                    json!({ "role": worker.role() }),
                );
            }
        }

        // A worker gets at most one turn per tick.
        let mut turned: HashSet<WorkerId> = HashSet::new();

        for worker in &idle {
            self.monitor.register(worker.id(), worker.role()).await;
            if self.monitor.current_task(worker.id()).await.is_some() {
                continue;
            }
            let next = self.queue.read().await.next_for(worker.role());
            let Some(task) = next else {
                continue;
            };
            self.assign(worker, task.id).await?;
            turned.insert(worker.id().clone());
            self.execute_turn(worker, task.id).await?;
        }

        for worker in &all {
            if turned.contains(worker.id()) {
                continue;
            }
            let Some(state) = self.monitor.get_state(worker.id()).await else {
                continue;
            };
            let Some(task_id) = state.current_task else {
                continue;
            };
            if state.status == WorkerStatus::Working {
                continue;
            }
            let status = self.queue.read().await.status_of(task_id);
            if status != Some(TaskStatus::Active) {
                // The task was moved on outside the loop; free the worker.
                warn!(
                    worker = %worker.id(),
                    task_id = %task_id,
                    status = ?status,
                    "Worker held a task that is no longer active; releasing it"
                );
                self.monitor.detach(worker.id()).await;
                worker.reset_context().await;
                continue;
            }
            turned.insert(worker.id().clone());
            self.execute_turn(worker, task_id).await?;
        }

        if self.queue.read().await.all_done() {
            return Ok(TickOutcome::AllDone);
        }
        Ok(TickOutcome::Continue)
    }

    async fn assign(&self, worker: &Arc<dyn Worker>, task_id: TaskId) -> ForemanResult<()> {
        {
            let mut queue = self.queue.write().await;
            queue.transition(
                task_id,
                TaskStatus::Assigned,
                TransitionExtras::agent(worker.id().clone()),
            )?;
            queue.transition(task_id, TaskStatus::Active, TransitionExtras::none())?;
        }
        self.turn_counts.lock().insert(task_id, 0);
        self.monitor.assign(worker.id(), task_id).await;

        info!(task_id = %task_id, worker = %worker.id(), role = %worker.role(), "Task assigned");
        self.bus.emit(
            EventType::TaskAssigned,
            Some(worker.id().clone()),
            Some(task_id),
            json!({ "role": worker.role() }),
        );
        Ok(())
    }

    async fn execute_turn(&self, worker: &Arc<dyn Worker>, task_id: TaskId) -> ForemanResult<()> {
        let turn = {
            let mut counts = self.turn_counts.lock();
            let count = counts.entry(task_id).or_insert(0);
            *count += 1;
            *count
        };

        let max_turns = self.config.max_turns_per_task;
        if turn > max_turns {
            warn!(
                task_id = %task_id,
                worker = %worker.id(),
                max_turns,
                "Task exceeded its turn budget"
            );
            let result = json!({
                "error": "max turns exceeded",
                "max_turns": max_turns,
            });
            return self.fail_task(worker, task_id, result).await;
        }

        let task = self.queue.read().await.try_get(task_id)?;
        self.monitor.begin_turn(worker.id()).await;
        self.bus.emit(
            EventType::AgentTurn,
            Some(worker.id().clone()),
            Some(task_id),
            json!({ "turn": turn, "max_turns": max_turns }),
        );

        let started = Instant::now();
        let outcome = self.invoke(worker, &task).await;
        self.monitor
            .end_turn(worker.id(), started.elapsed().as_millis() as u64)
            .await;

        debug!(
            task_id = %task_id,
            worker = %worker.id(),
            turn,
            outcome = outcome.label(),
            "Turn finished"
        );

        match outcome {
            TurnOutcome::Completed { result } => self.complete_task(worker, &task, result).await,
            TurnOutcome::Blocked { help } => self.block_task(worker, &task, help).await,
            TurnOutcome::Error { result } => self.fail_task(worker, task_id, result).await,
            TurnOutcome::Continue => Ok(()),
        }
    }

    /// Call the worker, folding `Err`, panics and timeouts into
    /// [`TurnOutcome::Error`].
    async fn invoke(&self, worker: &Arc<dyn Worker>, task: &Task) -> TurnOutcome {
        let turn = AssertUnwindSafe(worker.take_turn(task)).catch_unwind();
        let caught = match self.config.turn_timeout() {
            Some(limit) => match tokio::time::timeout(limit, turn).await {
                Ok(caught) => caught,
                Err(_) => {
                    warn!(
                        task_id = %task.id,
                        worker = %worker.id(),
                        timeout_ms = ?self.config.turn_timeout_ms,
                        "Worker turn timed out"
                    );
                    return TurnOutcome::error(json!({
                        "error": "turn timed out",
                        "timeout_ms": self.config.turn_timeout_ms,
                    }));
                }
            },
            None => turn.await,
        };

        match caught {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!(
                    task_id = %task.id,
                    worker = %worker.id(),
                    error = %e,
                    "Worker turn returned an error"
                );
                TurnOutcome::error(json!({ "error": e.to_string() }))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    task_id = %task.id,
                    worker = %worker.id(),
                    panic = %message,
                    "Worker turn panicked"
                );
                TurnOutcome::error(json!({
                    "error": "worker turn panicked",
                    "panic": message,
                }))
            }
        }
    }

    async fn complete_task(
        &self,
        worker: &Arc<dyn Worker>,
        task: &Task,
        result: serde_json::Value,
    ) -> ForemanResult<()> {
        let done = self.queue.write().await.transition(
            task.id,
            TaskStatus::Completed,
            TransitionExtras::result(result.clone()),
        )?;
        self.release_worker(worker, task.id).await;
        self.monitor.record_completed(worker.id()).await;

        info!(task_id = %task.id, worker = %worker.id(), "Task completed");
        self.bus.emit(
            EventType::TaskCompleted,
            Some(worker.id().clone()),
            Some(task.id),
            json!({ "result": result }),
        );

        if done.task_type == self.config.plan_task_type {
            self.ingest_plan(&done, &result).await;
        }
        self.resolve_help(&done).await
    }

    async fn block_task(
        &self,
        worker: &Arc<dyn Worker>,
        task: &Task,
        help: HelpRequest,
    ) -> ForemanResult<()> {
        self.queue.write().await.transition(
            task.id,
            TaskStatus::Blocked,
            TransitionExtras::none(),
        )?;
        self.release_worker(worker, task.id).await;
        self.monitor.record_blocked(worker.id()).await;

        info!(
            task_id = %task.id,
            worker = %worker.id(),
            target_role = %help.target_role,
            "Task blocked; escalating help request"
        );
        self.bus.emit(
            EventType::TaskBlocked,
            Some(worker.id().clone()),
            Some(task.id),
            json!({ "target_role": help.target_role, "request": help.request }),
        );

        let spec = TaskSpec::new(help.request.clone(), &self.config.help_task_type)
            .with_role(help.target_role.clone())
            .with_priority(self.config.escalated_priority(task.priority))
            .with_context(json!({
                "requested_by": worker.id(),
                "blocked_task": task.id,
                "request": help.request,
            }));
        let help_task = self.add_task(spec).await;

        self.bus.emit(
            EventType::HelpRequest,
            Some(worker.id().clone()),
            Some(help_task.id),
            json!({
                "blocked_task": task.id,
                "target_role": help.target_role,
                "request": help.request,
                "priority": help_task.priority,
            }),
        );
        Ok(())
    }

    async fn fail_task(
        &self,
        worker: &Arc<dyn Worker>,
        task_id: TaskId,
        result: serde_json::Value,
    ) -> ForemanResult<()> {
        let failed = self.queue.write().await.transition(
            task_id,
            TaskStatus::Failed,
            TransitionExtras::result(result.clone()),
        )?;
        self.release_worker(worker, task_id).await;
        self.monitor.record_failed(worker.id()).await;

        warn!(task_id = %task_id, worker = %worker.id(), result = %result, "Task failed");
        self.bus.emit(
            EventType::TaskFailed,
            Some(worker.id().clone()),
            Some(task_id),
            json!({ "result": result }),
        );
        self.resolve_help(&failed).await
    }

    /// Clear the turn counter and the worker's context after a task left `active`.
    async fn release_worker(&self, worker: &Arc<dyn Worker>, task_id: TaskId) {
        self.turn_counts.lock().remove(&task_id);
        worker.reset_context().await;
        self.bus.emit(
            EventType::AgentIdle,
            Some(worker.id().clone()),
            Some(task_id),
            json!({}),
        );
    }

    async fn ingest_plan(&self, plan_task: &Task, result: &serde_json::Value) {
        let planned = match self.ingestor.ingest(plan_task, result) {
            Ok(planned) => planned,
            Err(e) => {
                warn!(task_id = %plan_task.id, error = %e, "Planning result not ingested");
                return;
            }
        };
        if planned.is_empty() {
            return;
        }

        let admitted = {
            let mut queue = self.queue.write().await;
            let admitted = admit_plan(&mut queue, planned);
            if admitted.is_ok() && queue.has_cycle() {
                warn!(task_id = %plan_task.id, "Ingested plan contains a dependency cycle");
            }
            admitted
        };
        match admitted {
            Ok(tasks) => {
                info!(task_id = %plan_task.id, count = tasks.len(), "Plan ingested");
                for task in &tasks {
                    self.announce_created(task);
                }
            }
            Err(e) => warn!(task_id = %plan_task.id, error = %e, "Planning result not ingested"),
        }
    }

    /// When a help-request task finishes, release the task that asked for it.
    async fn resolve_help(&self, finished: &Task) -> ForemanResult<()> {
        if finished.task_type != self.config.help_task_type {
            return Ok(());
        }
        let Some(blocked_id) = finished
            .context
            .get("blocked_task")
            .and_then(|v| serde_json::from_value::<TaskId>(v.clone()).ok())
        else {
            return Ok(());
        };

        let mut queue = self.queue.write().await;
        if queue.status_of(blocked_id) != Some(TaskStatus::Blocked) {
            return Ok(());
        }

        match finished.status {
            TaskStatus::Completed => {
                queue.transition(blocked_id, TaskStatus::Pending, TransitionExtras::none())?;
                drop(queue);
                info!(
                    task_id = %blocked_id,
                    help_task = %finished.id,
                    "Help delivered; task re-armed"
                );
                self.bus.emit(
                    EventType::TaskRearmed,
                    None,
                    Some(blocked_id),
                    json!({
                        "reason": "help delivered",
                        "help_task": finished.id,
                        "help_result": finished.result,
                    }),
                );
            }
            TaskStatus::Failed => {
                let result = json!({
                    "error": "help request failed",
                    "help_task": finished.id,
                });
                queue.transition(
                    blocked_id,
                    TaskStatus::Failed,
                    TransitionExtras::result(result.clone()),
                )?;
                drop(queue);
                warn!(
                    task_id = %blocked_id,
                    help_task = %finished.id,
                    "Help request failed; task failed"
                );
                self.bus.emit(
                    EventType::TaskFailed,
                    None,
                    Some(blocked_id),
                    json!({ "result": result }),
                );
            }
            _ => {}
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Count tasks by status.
    pub async fn summary(&self) -> RunSummary {
        let queue = self.queue.read().await;
        RunSummary {
            state: self.state(),
            total_tasks: queue.total_count(),
            pending: queue.count_by_status(TaskStatus::Pending),
            assigned: queue.count_by_status(TaskStatus::Assigned),
            active: queue.count_by_status(TaskStatus::Active),
            blocked: queue.count_by_status(TaskStatus::Blocked),
            completed: queue.count_by_status(TaskStatus::Completed),
            failed: queue.count_by_status(TaskStatus::Failed),
        }
    }

    /// Look up a worker in the pool by id.
    pub fn worker(&self, id: &WorkerId) -> ForemanResult<Arc<dyn Worker>> {
        self.pool
            .all_workers()
            .into_iter()
            .find(|w| w.id() == id)
            .ok_or_else(|| ForemanError::WorkerNotFound(id.clone()))
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Task counts at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Run state when the summary was taken.
    pub state: RunState,
    /// Every task ever admitted.
    pub total_tasks: usize,
    /// Tasks in `pending`.
    pub pending: usize,
    /// Tasks in `assigned`.
    pub assigned: usize,
    /// Tasks in `active`.
    pub active: usize,
    /// Tasks in `blocked`.
    pub blocked: usize,
    /// Tasks in `completed`.
    pub completed: usize,
    /// Tasks in `failed`.
    pub failed: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} tasks completed, {} failed, {} blocked, {} in progress, {} pending",
            self.completed,
            self.total_tasks,
            self.failed,
            self.blocked,
            self.assigned + self.active,
            self.pending
        )
    }
}
