use foreman_core::{ForemanError, ForemanResult};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;

/// Settings for the orchestrator tick loop.
///
/// Every field has a default, so an empty TOML table is a valid config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Pause between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Turns a task may consume before it is failed.
    #[serde(default = "default_max_turns")]
    pub max_turns_per_task: u32,
    /// Added to a blocked task's priority to rank its help request.
    ///
    /// At least 1, so the help request outranks the blocked task. The sum
    /// saturates, so a blocked task already at `i64::MAX` yields a help
    /// request of equal priority.
    #[serde(default = "default_escalation_bonus")]
    pub escalation_priority_bonus: NonZeroU32,
    /// Role that receives the planning task created from a goal.
    #[serde(default = "default_planning_role")]
    pub planning_role: String,
    /// Priority of the planning task created from a goal.
    #[serde(default = "default_planning_priority")]
    pub planning_priority: i64,
    /// Task type whose results are fed to the plan ingestor.
    #[serde(default = "default_plan_task_type")]
    pub plan_task_type: String,
    /// Task type given to tasks created from help requests.
    #[serde(default = "default_help_task_type")]
    pub help_task_type: String,
    /// Wall-clock limit on a single worker turn. Unset means no limit.
    #[serde(default)]
    pub turn_timeout_ms: Option<u64>,
}

fn default_tick_interval_ms() -> u64 {
    2000
}

fn default_max_turns() -> u32 {
    20
}

fn default_escalation_bonus() -> NonZeroU32 {
    NonZeroU32::MIN.saturating_add(9)
}

fn default_planning_role() -> String {
    "architect".to_string()
}

fn default_planning_priority() -> i64 {
    100
}

fn default_plan_task_type() -> String {
    "plan".to_string()
}

fn default_help_task_type() -> String {
    "help_request".to_string()
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            max_turns_per_task: default_max_turns(),
            escalation_priority_bonus: default_escalation_bonus(),
            planning_role: default_planning_role(),
            planning_priority: default_planning_priority(),
            plan_task_type: default_plan_task_type(),
            help_task_type: default_help_task_type(),
            turn_timeout_ms: None,
        }
    }
}

impl OrchestratorConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(source: &str) -> ForemanResult<Self> {
        toml::from_str(source).map_err(|e| ForemanError::Config(format!("Invalid config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> ForemanResult<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ForemanError::Config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&source)
    }

    /// Priority of a help request raised by a task of `priority`.
    pub fn escalated_priority(&self, priority: i64) -> i64 {
        priority.saturating_add(i64::from(self.escalation_priority_bonus.get()))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn turn_timeout(&self) -> Option<Duration> {
        self.turn_timeout_ms.map(Duration::from_millis)
    }

    pub fn with_tick_interval_ms(mut self, ms: u64) -> Self {
        self.tick_interval_ms = ms;
        self
    }

    pub fn with_max_turns(mut self, max: u32) -> Self {
        self.max_turns_per_task = max;
        self
    }

    pub fn with_escalation_bonus(mut self, bonus: NonZeroU32) -> Self {
        self.escalation_priority_bonus = bonus;
        self
    }

    pub fn with_turn_timeout_ms(mut self, ms: u64) -> Self {
        self.turn_timeout_ms = Some(ms);
        self
    }
}
