//! Turning a planning task's result into follow-up tasks.
//!
//! The orchestrator hands the result of every completed planning task to a
//! [`PlanIngestor`]. The default ingestor emits nothing. [`JsonPlanIngestor`]
//! reads a structured plan of the form:
//!
//! ```json
//! {
//!   "tasks": [
//!     { "description": "Write the design", "type": "design", "role": "architect", "priority": 5 },
//!     { "description": "Build it", "type": "code", "role": "coder", "depends_on": [0] }
//!   ]
//! }
//! ```
//!
//! `depends_on` lists positions of earlier entries in the same plan.

use crate::task_queue::TaskQueue;
use crate::types::{Task, TaskSpec};
use foreman_core::{ForemanError, ForemanResult};
use serde::Deserialize;

/// One follow-up task, with dependencies expressed as plan positions.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedTask {
    /// The task to admit.
    pub spec: TaskSpec,
    /// Positions of earlier plan entries this task waits for.
    pub after_steps: Vec<usize>,
}

impl PlannedTask {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            spec,
            after_steps: Vec::new(),
        }
    }

    pub fn after(mut self, steps: Vec<usize>) -> Self {
        self.after_steps = steps;
        self
    }
}

/// Extension point fed with the result of each completed planning task.
pub trait PlanIngestor: Send + Sync {
    /// Derive follow-up tasks from `result`.
    fn ingest(
        &self,
        plan_task: &Task,
        result: &serde_json::Value,
    ) -> ForemanResult<Vec<PlannedTask>>;
}

/// Ingestor that never creates follow-up tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPlanIngestor;

impl PlanIngestor for NoopPlanIngestor {
    fn ingest(
        &self,
        _plan_task: &Task,
        _result: &serde_json::Value,
    ) -> ForemanResult<Vec<PlannedTask>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    tasks: Vec<PlanEntry>,
}

#[derive(Debug, Deserialize)]
struct PlanEntry {
    description: String,
    #[serde(rename = "type", default = "default_entry_type")]
    task_type: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    context: Option<serde_json::Value>,
    #[serde(default)]
    depends_on: Vec<usize>,
}

fn default_entry_type() -> String {
    "task".to_string()
}

/// Reads the JSON plan format described in the module docs.
///
/// A result that is a JSON string is parsed as JSON first, so workers that
/// return raw model text holding a plan work too.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPlanIngestor;

impl PlanIngestor for JsonPlanIngestor {
    fn ingest(
        &self,
        plan_task: &Task,
        result: &serde_json::Value,
    ) -> ForemanResult<Vec<PlannedTask>> {
        let document: PlanDocument = match result {
            serde_json::Value::String(text) => serde_json::from_str(text),
            other => serde_json::from_value(other.clone()),
        }
        .map_err(|e| {
            ForemanError::Plan(format!("task {} result is not a plan: {e}", plan_task.id))
        })?;

        let planned = document
            .tasks
            .into_iter()
            .map(|entry| {
                let mut context = entry
                    .context
                    .unwrap_or_else(|| serde_json::Value::Object(serde_json::Map::new()));
                if let Some(map) = context.as_object_mut() {
                    map.insert("planned_by".to_string(), serde_json::json!(plan_task.id));
                }
                let mut spec = TaskSpec::new(entry.description, entry.task_type)
                    .with_priority(entry.priority)
                    .with_context(context);
                spec.assign_to_role = entry.role;
                PlannedTask::new(spec).after(entry.depends_on)
            })
            .collect();
        Ok(planned)
    }
}

/// Admit `plan` into `queue`, turning plan positions into task ids.
///
/// The whole plan is checked before anything is admitted: a dependency on the
/// entry itself or on a later entry is a [`ForemanError::Plan`] error.
pub fn admit_plan(queue: &mut TaskQueue, plan: Vec<PlannedTask>) -> ForemanResult<Vec<Task>> {
    for (index, entry) in plan.iter().enumerate() {
        if let Some(bad) = entry.after_steps.iter().find(|&&step| step >= index) {
            return Err(ForemanError::Plan(format!(
                "plan entry {index} depends on entry {bad}, which does not precede it"
            )));
        }
    }

    let mut admitted: Vec<Task> = Vec::with_capacity(plan.len());
    for entry in plan {
        let mut spec = entry.spec;
        let resolved: Vec<_> = entry.after_steps.iter().map(|&step| admitted[step].id).collect();
        spec.depends_on.extend(resolved);
        admitted.push(queue.add(spec));
    }
    Ok(admitted)
}
