//! `swarmctl` — operator CLI for the swarmkeeper coordination kernel.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{presets, Attribute, Cell, ContentArrangement, Table};

use swarmkeeper::domain::ports::RelationalStore;
use swarmkeeper::infrastructure::config::ConfigLoader;
use swarmkeeper::infrastructure::logging::LoggerImpl;
use swarmkeeper::infrastructure::store::{InMemoryRegistry, LocalProcessRuntime, SqliteStore};
use swarmkeeper::infrastructure::Supervisor;
use swarmkeeper::services::bus::InMemoryStore;

#[derive(Parser)]
#[command(name = "swarmctl")]
#[command(about = "Operator CLI for the swarmkeeper coordination kernel", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or recreate) the relational store's tables
    Init {
        /// Drop existing tables before recreating them
        #[arg(long)]
        drop: bool,
    },
    /// Start the supervisor and run every component's background loops
    Run,
    /// Print queue depths and scheduling metrics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Init doesn't need the full supervisor wiring, only a store
    // connection (mirrors the teacher's special-casing of `init` before
    // the service layer is built).
    if let Commands::Init { drop } = cli.command {
        let config = ConfigLoader::load().context("failed to load configuration")?;
        let store = SqliteStore::connect(&config.database.url, config.database.max_connections)
            .await
            .context("failed to connect to relational store")?;
        store.init_schema(drop).await.context("failed to initialize schema")?;
        println!("relational store schema ready at {}", config.database.url);
        return Ok(());
    }

    let config = ConfigLoader::load().context("failed to load configuration")?;
    let _logger = LoggerImpl::init(&config.logging).context("failed to initialize logger")?;

    let message_store = Arc::new(InMemoryStore::new());
    let container_runtime = Arc::new(LocalProcessRuntime::new("swarm-agent"));
    let service_registry = Arc::new(InMemoryRegistry::new());
    let backup_dir = PathBuf::from(".swarm/backups");

    let mut supervisor = Supervisor::bootstrap(&config, message_store, container_runtime, service_registry, backup_dir);

    match cli.command {
        Commands::Init { .. } => unreachable!("init is handled before supervisor bootstrap"),
        Commands::Run => {
            supervisor.spawn_background_loops();
            tracing::info!("swarmctl supervisor running, press ctrl-c to stop");
            tokio::signal::ctrl_c().await.context("failed to listen for shutdown signal")?;
            supervisor.shutdown(Duration::from_secs(30)).await;
        }
        Commands::Status => {
            let orchestrator_metrics = supervisor.orchestrator.metrics().await;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&serde_json::json!({
                    "queue_depths": orchestrator_metrics.queue_depths,
                    "avg_queue_time_ms": orchestrator_metrics.avg_queue_time_ms,
                    "avg_execution_time_ms": orchestrator_metrics.avg_execution_time_ms,
                    "throughput_per_min": orchestrator_metrics.throughput_per_min,
                }))?);
            } else {
                print_status_table(&orchestrator_metrics);
            }
        }
    }

    Ok(())
}

fn print_status_table(metrics: &swarmkeeper::services::orchestrator::OrchestratorMetrics) {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic).set_header(vec![
        Cell::new("Priority").add_attribute(Attribute::Bold),
        Cell::new("Queue depth").add_attribute(Attribute::Bold),
    ]);
    for (priority, depth) in &metrics.queue_depths {
        table.add_row(vec![priority.as_str().to_string(), depth.to_string()]);
    }
    println!("{table}");
    println!(
        "avg queue time: {:.1}ms  avg execution time: {:.1}ms  throughput: {:.1}/min",
        metrics.avg_queue_time_ms, metrics.avg_execution_time_ms, metrics.throughput_per_min
    );
}
