use crate::ids::{TaskId, WorkerId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed vocabulary of things that can happen in a run.
///
/// Names are namespaced by domain (`agent:`, `task:`, `file:`, `message:`,
/// `build:`, `test:`, `studio:`) and serialize as those strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// A worker joined the pool.
    #[serde(rename = "agent:spawned")]
    AgentSpawned,
    /// A worker is about to take a turn.
    #[serde(rename = "agent:turn")]
    AgentTurn,
    /// A worker's context was reset and it holds no task.
    #[serde(rename = "agent:idle")]
    AgentIdle,
    /// A worker reported an error.
    #[serde(rename = "agent:error")]
    AgentError,

    /// A task was admitted to the queue.
    #[serde(rename = "task:created")]
    TaskCreated,
    /// A task was handed to a worker.
    #[serde(rename = "task:assigned")]
    TaskAssigned,
    /// A task finished successfully.
    #[serde(rename = "task:completed")]
    TaskCompleted,
    /// A task stopped on a help request.
    #[serde(rename = "task:blocked")]
    TaskBlocked,
    /// A task failed.
    #[serde(rename = "task:failed")]
    TaskFailed,
    /// A blocked or failed task went back to pending.
    #[serde(rename = "task:rearmed")]
    TaskRearmed,

    /// A worker read a file.
    #[serde(rename = "file:read")]
    FileRead,
    /// A worker wrote a file.
    #[serde(rename = "file:written")]
    FileWritten,
    /// A worker deleted a file.
    #[serde(rename = "file:deleted")]
    FileDeleted,

    /// A worker sent a message to another worker.
    #[serde(rename = "message:sent")]
    MessageSent,
    /// A blocked worker asked another role for help.
    #[serde(rename = "message:help_request")]
    HelpRequest,

    /// A build started.
    #[serde(rename = "build:started")]
    BuildStarted,
    /// A build succeeded.
    #[serde(rename = "build:succeeded")]
    BuildSucceeded,
    /// A build failed.
    #[serde(rename = "build:failed")]
    BuildFailed,

    /// A test run started.
    #[serde(rename = "test:started")]
    TestStarted,
    /// A test run passed.
    #[serde(rename = "test:passed")]
    TestPassed,
    /// A test run failed.
    #[serde(rename = "test:failed")]
    TestFailed,

    /// A goal was handed to the run.
    #[serde(rename = "studio:goal_set")]
    GoalSet,
    /// The tick loop started.
    #[serde(rename = "studio:started")]
    RunStarted,
    /// The tick loop was paused.
    #[serde(rename = "studio:paused")]
    RunPaused,
    /// The tick loop stopped.
    #[serde(rename = "studio:stopped")]
    RunStopped,
}

impl EventType {
    /// The namespaced wire name, e.g. `task:assigned`.
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::AgentSpawned => "agent:spawned",
            EventType::AgentTurn => "agent:turn",
            EventType::AgentIdle => "agent:idle",
            EventType::AgentError => "agent:error",
            EventType::TaskCreated => "task:created",
            EventType::TaskAssigned => "task:assigned",
            EventType::TaskCompleted => "task:completed",
            EventType::TaskBlocked => "task:blocked",
            EventType::TaskFailed => "task:failed",
            EventType::TaskRearmed => "task:rearmed",
            EventType::FileRead => "file:read",
            EventType::FileWritten => "file:written",
            EventType::FileDeleted => "file:deleted",
            EventType::MessageSent => "message:sent",
            EventType::HelpRequest => "message:help_request",
            EventType::BuildStarted => "build:started",
            EventType::BuildSucceeded => "build:succeeded",
            EventType::BuildFailed => "build:failed",
            EventType::TestStarted => "test:started",
            EventType::TestPassed => "test:passed",
            EventType::TestFailed => "test:failed",
            EventType::GoalSet => "studio:goal_set",
            EventType::RunStarted => "studio:started",
            EventType::RunPaused => "studio:paused",
            EventType::RunStopped => "studio:stopped",
        }
    }

    /// The domain prefix, e.g. `task` for `task:assigned`.
    pub fn domain(self) -> &'static str {
        self.as_str().split(':').next().unwrap_or_default()
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable record of something that happened during a run.
///
/// Built with [`Event::new`] and the `with_*` methods, then published. Once
/// handed to the bus it is only ever seen through `&Event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: u64,
    #[serde(rename = "type")]
    event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_id: Option<WorkerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_id: Option<TaskId>,
    #[serde(default)]
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Creates an event with an empty payload, timestamped now.
    pub fn new(id: u64, event_type: EventType) -> Self {
        Self {
            id,
            event_type,
            agent_id: None,
            task_id: None,
            data: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    /// Attach the originating worker.
    pub fn with_agent(mut self, agent_id: WorkerId) -> Self {
        self.agent_id = Some(agent_id);
        self
    }

    /// Attach the task the event concerns.
    pub fn with_task(mut self, task_id: TaskId) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Attach a payload.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Sequential id assigned by the issuing bus.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// What happened.
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Worker that caused the event, if any.
    pub fn agent_id(&self) -> Option<&WorkerId> {
        self.agent_id.as_ref()
    }

    /// Task the event concerns, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        self.task_id
    }

    /// Read-only payload.
    pub fn data(&self) -> &serde_json::Value {
        &self.data
    }

    /// Construction time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
