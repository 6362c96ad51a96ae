use anyhow::Context;
use foreman_orchestrator::OrchestratorConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Everything the `foreman` binary reads from its TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default = "default_workers")]
    pub workers: Vec<WorkerConfig>,
    /// Steps the simulated planner proposes for every goal.
    #[serde(default = "default_plan")]
    pub plan: Vec<PlanStep>,
}

/// One simulated worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub id: String,
    pub role: String,
    /// Turns spent on each task before reporting it completed.
    #[serde(default = "default_turns_per_task")]
    pub turns_per_task: u32,
    /// Role to ask for help once per task before finishing it.
    #[serde(default)]
    pub asks: Option<String>,
}

/// One entry of the simulated plan, in the JSON plan format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    pub role: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub depends_on: Vec<usize>,
}

fn default_turns_per_task() -> u32 {
    1
}

fn default_workers() -> Vec<WorkerConfig> {
    [
        ("architect-1", "architect"),
        ("designer-1", "designer"),
        ("coder-1", "coder"),
        ("tester-1", "tester"),
    ]
    .into_iter()
    .map(|(id, role)| WorkerConfig {
        id: id.to_string(),
        role: role.to_string(),
        turns_per_task: 2,
        asks: None,
    })
    .collect()
}

fn default_plan() -> Vec<PlanStep> {
    let step = |description: &str, task_type: &str, role: &str, depends_on: Vec<usize>| PlanStep {
        description: description.to_string(),
        task_type: task_type.to_string(),
        role: role.to_string(),
        priority: 0,
        depends_on,
    };
    vec![
        step("Design the assets", "design", "designer", vec![]),
        step("Implement the gameplay", "code", "coder", vec![0]),
        step("Test the build", "test", "tester", vec![1]),
    ]
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            orchestrator: OrchestratorConfig::default(),
            workers: default_workers(),
            plan: default_plan(),
        }
    }
}

impl FileConfig {
    /// Load from `path`, or fall back to the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        Self::parse(&source)
    }

    pub fn parse(source: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(source).context("Invalid config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.workers.is_empty() {
            anyhow::bail!("Config must declare at least one worker");
        }
        let mut ids: Vec<&str> = self.workers.iter().map(|w| w.id.as_str()).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            anyhow::bail!("Duplicate worker id '{}'", pair[0]);
        }
        for (index, step) in self.plan.iter().enumerate() {
            if step.depends_on.iter().any(|&dep| dep >= index) {
                anyhow::bail!("Plan step {index} depends on a step that does not precede it");
            }
        }
        Ok(())
    }

    /// The plan in the format `JsonPlanIngestor` reads.
    pub fn plan_json(&self) -> serde_json::Value {
        serde_json::json!({ "tasks": self.plan })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = FileConfig::load(None).unwrap();
        assert_eq!(config.workers.len(), 4);
        assert_eq!(config.plan.len(), 3);
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn test_parse_full_file() {
        let config = FileConfig::parse(
            r#"
[orchestrator]
tick_interval_ms = 50
max_turns_per_task = 4

[[workers]]
id = "lead"
role = "architect"

[[workers]]
id = "dev"
role = "coder"
turns_per_task = 3
asks = "architect"

[[plan]]
description = "Build it"
type = "code"
role = "coder"
"#,
        )
        .unwrap();
        assert_eq!(config.orchestrator.tick_interval_ms, 50);
        assert_eq!(config.orchestrator.escalation_priority_bonus.get(), 10);
        assert_eq!(config.workers[0].turns_per_task, 1);
        assert_eq!(config.workers[1].asks.as_deref(), Some("architect"));
        assert_eq!(config.plan_json()["tasks"][0]["type"], "code");
    }

    #[test]
    fn test_rejects_duplicate_workers() {
        let err = FileConfig::parse(
            "[[workers]]\nid = \"a\"\nrole = \"coder\"\n\
             [[workers]]\nid = \"a\"\nrole = \"tester\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("Duplicate worker id"));
    }

    #[test]
    fn test_rejects_forward_plan_reference() {
        let err = FileConfig::parse(
            "[[plan]]\ndescription = \"x\"\ntype = \"code\"\nrole = \"coder\"\ndepends_on = [0]\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not precede"));
    }

    #[test]
    fn test_load_reports_missing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[orchestrator]\nmax_turns_per_task = 2").unwrap();
        let config = FileConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.orchestrator.max_turns_per_task, 2);

        let err = FileConfig::load(Some(Path::new("/nonexistent/foreman.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
