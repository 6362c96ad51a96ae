mod config;
mod sim;

use clap::{Parser, Subcommand, ValueEnum};
use config::FileConfig;
use foreman_core::{read_jsonl, ConsoleSink, EventBus, EventRecorder};
use foreman_orchestrator::{JsonPlanIngestor, Orchestrator};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "foreman", about = "Foreman: tick-driven orchestration of role-based workers")]
struct Cli {
    /// Path to config file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Json)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a goal to completion with simulated workers
    Run {
        /// Goal handed to the planning role
        goal: String,
        /// Write every event to this JSONL file
        #[arg(long)]
        events: Option<PathBuf>,
        /// Tick interval in milliseconds (overrides config)
        #[arg(long)]
        tick_ms: Option<u64>,
        /// Turn budget per task (overrides config)
        #[arg(long)]
        max_turns: Option<u32>,
    },
    /// Print the effective configuration
    Config,
    /// Summarize a recorded JSONL event log
    Events {
        /// JSONL file written by `run --events`
        path: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = FileConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            goal,
            events,
            tick_ms,
            max_turns,
        } => {
            if let Some(ms) = tick_ms {
                config.orchestrator.tick_interval_ms = ms;
            }
            if let Some(max) = max_turns {
                config.orchestrator.max_turns_per_task = max;
            }

            let bus = EventBus::new();
            let _console = ConsoleSink::attach(&bus);
            let recorder = events.as_ref().map(|_| EventRecorder::attach(&bus));

            let pool = sim::build_pool(&config);
            info!(workers = config.workers.len(), "Worker pool ready");

            let orchestrator = Arc::new(
                Orchestrator::new(config.orchestrator.clone(), bus, Arc::new(pool))
                    .with_plan_ingestor(Arc::new(JsonPlanIngestor)),
            );
            orchestrator.set_goal(&goal).await;
            orchestrator.start();

            tokio::select! {
                _ = orchestrator.wait_until_stopped() => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted; stopping");
                    orchestrator.stop().await;
                }
            }

            let summary = orchestrator.summary().await;
            println!("{summary}");
            println!(
                "{}",
                serde_json::to_string_pretty(&orchestrator.monitor().to_json().await)?
            );

            if let (Some(path), Some(recorder)) = (events, recorder) {
                recorder.write_jsonl(&path)?;
                info!(path = %path.display(), events = recorder.len(), "Event log written");
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Commands::Events { path } => {
            let contents = tokio::fs::read_to_string(&path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read event log '{}': {e}", path.display())
            })?;
            let events = read_jsonl(&contents)?;
            if events.is_empty() {
                println!("No events recorded.");
            } else {
                for event in &events {
                    let agent = event
                        .agent_id()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "-".to_string());
                    let task = event
                        .task_id()
                        .map_or_else(|| "-".to_string(), |t| t.to_string());
                    println!(
                        "{:>5}  {}  {:<24} {:<14} {:<10} {}",
                        event.id(),
                        event.timestamp().format("%H:%M:%S%.3f"),
                        event.event_type(),
                        agent,
                        task,
                        event.data()
                    );
                }
                println!("\nTotal: {} event(s)", events.len());
            }
        }
    }

    Ok(())
}
