mod config;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{LogFormat, LoggingConfig, TacConfig};
use std::path::PathBuf;
use std::time::Duration;
use tac_agent::build_backend;
use tac_memory::build_store;
use tac_orchestrator::{Orchestrator, StatusSnapshot, TaskRequest, VariantResolver};
use tokio::time::Interval;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tac", version, about = "TAC: task dispatch over a bounded pool of AI workers")]
struct Cli {
    /// Path to config file (defaults to ./tac.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and submit tasks
    Run {
        /// Free-text task; repeatable
        #[arg(short, long = "task")]
        tasks: Vec<String>,
        /// Task details as a JSON object; repeatable
        #[arg(short, long = "details")]
        details: Vec<String>,
        /// Print a status table every SECS seconds
        #[arg(long, value_name = "SECS")]
        watch: Option<u64>,
        /// Stop once nothing is queued, retrying or running
        #[arg(long)]
        exit_when_idle: bool,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// List the worker-type hints and the variant each maps to
    Variants,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load and validate the config, then print the resolved values
    Check,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.pretty().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = config::load(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Run {
            tasks,
            details,
            watch,
            exit_when_idle,
        } => run(config, tasks, details, watch, exit_when_idle).await?,
        Commands::Config { action } => match action {
            ConfigAction::Check => {
                println!("Configuration OK\n");
                print!("{}", toml::to_string_pretty(&config.redacted())?);
            }
        },
        Commands::Variants => {
            let resolver = VariantResolver::new(&config.orchestrator.worker_variant_map)?;
            println!("Worker-type hints:");
            for (hint, variant) in resolver.table() {
                println!("  {hint:<20} -> {variant}");
            }
            println!("\nTasks without a hint (or with \"default\") are routed by content.");
        }
    }

    Ok(())
}

async fn run(
    config: TacConfig,
    tasks: Vec<String>,
    details: Vec<String>,
    watch: Option<u64>,
    exit_when_idle: bool,
) -> anyhow::Result<()> {
    let backend = build_backend(&config.llm)?;
    let memory = build_store(&config.memory).await?;
    let grace = config.orchestrator.shutdown_grace();
    let orchestrator = Orchestrator::with_worker_settings(
        config.orchestrator,
        config.workers,
        backend,
        memory,
    )?;
    orchestrator.start()?;

    let mut requests: Vec<TaskRequest> = tasks.into_iter().map(TaskRequest::new).collect();
    for raw in &details {
        let request: TaskRequest = serde_json::from_str(raw)
            .with_context(|| format!("invalid --details JSON: {raw}"))?;
        requests.push(request);
    }
    for request in requests {
        let id = orchestrator.submit(request)?;
        println!("submitted {id}");
    }

    let mut watch_interval = watch.map(|secs| tokio::time::interval(Duration::from_secs(secs.max(1))));
    let mut idle_check = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Interrupt received, shutting down");
                break;
            }
            _ = tick(&mut watch_interval) => print_table(&orchestrator.status_all()),
            _ = idle_check.tick(), if exit_when_idle => {
                if orchestrator.is_idle() {
                    info!("All tasks finished");
                    break;
                }
            }
        }
    }

    orchestrator
        .shutdown(grace)
        .await
        .context("dispatch loop stopped with an error")?;
    println!("{}", serde_json::to_string_pretty(&orchestrator.status_all())?);
    Ok(())
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn print_table(snapshot: &StatusSnapshot) {
    let c = &snapshot.counts;
    println!(
        "\n[{}] queued={} running={} retrying={} succeeded={} failed={} busy={}/{}",
        snapshot.generated_at.format("%H:%M:%S"),
        c.queued,
        c.running,
        c.retrying,
        c.succeeded,
        c.failed,
        snapshot.busy_workers,
        snapshot.max_concurrent_agents
    );
    println!(
        "{:<36}  {:<10}  {:<8}  {:<16}  {}",
        "TASK", "STAGE", "ATTEMPT", "VARIANT", "WORKER"
    );
    for task in &snapshot.tasks {
        let variant = task.variant.map(|v| v.to_string()).unwrap_or_default();
        let worker = task
            .worker_id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        println!(
            "{:<36}  {:<10}  {:<8}  {:<16}  {}",
            task.id.to_string(),
            task.stage.to_string(),
            format!("{}/{}", task.attempts, task.max_attempts),
            variant,
            worker
        );
    }
}
