//! `trendvisor` command-line entry point.

mod config;
mod console;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use trendvisor_agents::{
    Agent, AgentContext, AgentWorker, AnalysisAgent, CollectionAgent, CommandTool,
    OrchestratorAgent, TaskOutcome,
};
use trendvisor_bus::{InMemoryMessageBus, SharedBus};
use trendvisor_core::{PipelineObserver, StatusRecord};
use trendvisor_store::{FileStateStore, SharedStore, StateStore};

use crate::config::TrendvisorConfig;
use crate::console::ConsoleRenderer;

#[derive(Parser)]
#[command(
    name = "trendvisor",
    about = "Trendvisor: event-driven review collection and analysis"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "trendvisor.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one task through the pipeline and wait for its outcome
    Run {
        /// What to analyze, e.g. a product name
        goal: String,
        /// Stage parameter as key=value (value parsed as JSON when possible)
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, serde_json::Value)>,
    },
    /// Print the stored record of a task
    Status {
        /// Task id as printed by `run`
        task_id: String,
    },
    /// List stored task ids
    List,
}

fn parse_param(raw: &str) -> Result<(String, serde_json::Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    let value = serde_json::from_str(value)
        .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = TrendvisorConfig::load(&cli.config).await?;

    match cli.command {
        Commands::Run { goal, params } => run(config, &goal, params.into_iter().collect()).await,
        Commands::Status { task_id } => {
            let store = FileStateStore::new(config.tasks_dir()).await?;
            let record = store
                .get(&task_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("No stored record for task '{task_id}'"))?;
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::List => {
            let store = FileStateStore::new(config.tasks_dir()).await?;
            for task_id in store.list().await? {
                println!("{task_id}");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(
    config: TrendvisorConfig,
    goal: &str,
    params: BTreeMap<String, serde_json::Value>,
) -> anyhow::Result<ExitCode> {
    let console = Arc::new(ConsoleRenderer::stdout());
    console.header(
        "Trendvisor",
        "Autonomous agent-based e-commerce review analysis",
    );

    let store: SharedStore = Arc::new(FileStateStore::new(config.tasks_dir()).await?);
    let bus: SharedBus = Arc::new(InMemoryMessageBus::new(config.bus_config())?);
    let ctx = AgentContext::new(store, bus, console.clone());

    let orchestrator = Arc::new(OrchestratorAgent::new(ctx.clone()));
    let collection = CommandTool::new("collection", config.tools.collection.clone());
    let analysis = CommandTool::new("analysis", config.tools.analysis.clone());
    let agents: Vec<Arc<dyn Agent>> = vec![
        orchestrator.clone(),
        Arc::new(CollectionAgent::new(ctx.clone(), Arc::new(collection))),
        Arc::new(AnalysisAgent::new(ctx.clone(), Arc::new(analysis))),
    ];
    let workers: Vec<AgentWorker> = agents
        .into_iter()
        .map(|agent| AgentWorker::new(agent, ctx.clone()).with_stop_timeout(config.stop_timeout()))
        .collect();

    let outcome = drive(&workers, &orchestrator, console.as_ref(), goal, params).await;

    console.rule("System Shutdown");
    for worker in workers.iter().rev() {
        if !worker.stop().await {
            warn!(agent = %worker.name(), "Agent still busy at shutdown");
        }
    }
    console.agent_summary(&ctx.monitor.snapshot().await);

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            console.notify(StatusRecord::error(
                "SYSTEM",
                format!("A critical error occurred: {e}"),
            ));
            return Err(e);
        }
    };
    info!(outcome = ?outcome, "Trendvisor has shut down");
    Ok(match outcome {
        Some(outcome) if outcome.is_success() => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

/// Starts the agents and one task, then waits for its outcome or Ctrl-C.
async fn drive(
    workers: &[AgentWorker],
    orchestrator: &OrchestratorAgent,
    console: &dyn PipelineObserver,
    goal: &str,
    params: BTreeMap<String, serde_json::Value>,
) -> anyhow::Result<Option<TaskOutcome>> {
    for worker in workers {
        worker.start().await?;
    }
    let task_id = orchestrator.start_task(goal, params).await?;
    console.notify(StatusRecord::status(
        OrchestratorAgent::NAME,
        "Monitoring task workflow... (Press Ctrl+C to exit)",
    ));

    tokio::select! {
        outcome = orchestrator.wait_for(&task_id) => Ok(outcome),
        _ = tokio::signal::ctrl_c() => {
            console.notify(StatusRecord::error(
                "SYSTEM",
                "Shutdown signal received. Terminating all agents.",
            ));
            Ok(None)
        }
    }
}
