//! Tick-driven orchestration of role-based workers over a dependency-aware task queue.
//!
//! Goals enter as a planning task. Each tick pairs idle workers with the
//! highest-priority ready task for their role, gives every busy worker one
//! turn, and turns blocked work into help requests for another role. Every
//! state change is announced on the [`foreman_core::EventBus`].
//!
//! # Main types
//!
//! - [`Orchestrator`]: owns the queue and runs the tick loop.
//! - [`TaskQueue`]: task store, state machine and ready-task selection.
//! - [`Worker`] / [`WorkerPool`]: the contract a worker implementation meets.
//! - [`WorkerMonitor`]: per-worker assignment, status and metrics.
//! - [`PlanIngestor`]: turns a planning result into follow-up tasks.

/// Orchestrator settings.
pub mod config;
/// The tick loop and run control.
pub mod engine;
/// Worker status and metrics tracking.
pub mod monitor;
/// Planning results to follow-up tasks.
pub mod plan;
/// Task store and state machine.
pub mod task_queue;
/// Task types and statuses.
pub mod types;
/// Worker and worker pool contracts.
pub mod worker;

pub use config::OrchestratorConfig;
pub use engine::{Orchestrator, RunState, RunSummary, TickOutcome};
pub use monitor::{WorkerMetrics, WorkerMonitor, WorkerState, WorkerStatus};
pub use plan::{admit_plan, JsonPlanIngestor, NoopPlanIngestor, PlanIngestor, PlannedTask};
pub use task_queue::TaskQueue;
pub use types::{Task, TaskSpec, TaskStatus, TransitionExtras};
pub use worker::{HelpRequest, StaticWorkerPool, TurnOutcome, Worker, WorkerPool};
