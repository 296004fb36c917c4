use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use mido::cli;
use mido::config::{self, MidoConfig};
use mido::memory::MemoryType;

#[derive(Parser)]
#[command(name = "mido", version, about = "A minimal reflective agent with durable memory")]
struct Cli {
    /// Agent name; selects ~/.mido/<agent>/mido.toml
    #[arg(long, global = true, default_value = "mido")]
    agent: String,

    /// Explicit config file path (overrides --agent)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the agent home and a starter config
    Init,
    /// Talk to the agent interactively
    Run,
    /// Run a single reflection step
    Step {
        /// Input for the step; omitted means a heartbeat step
        input: Option<String>,
    },
    /// Retrieve memories relevant to a query
    Search {
        query: String,
        #[arg(short, long)]
        k: Option<usize>,
        #[arg(long = "type")]
        memory_type: Option<MemoryType>,
        #[arg(long)]
        min_importance: Option<f64>,
    },
    /// Show one memory in full
    Inspect { id: u64 },
    /// Show recent state snapshots
    History {
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Memory statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Fold stale, low-importance memories into a reflection summary
    Consolidate {
        /// Look back this many hours instead of the configured window
        #[arg(long, conflicts_with = "all")]
        hours: Option<u64>,
        /// Consider the whole log
        #[arg(long)]
        all: bool,
    },
    /// Hide stale, unimportant memories from retrieval
    Prune {
        #[arg(long)]
        dry_run: bool,
    },
    /// Reconcile the vector index with the memory log
    Reindex {
        /// Re-embed every memory and replace the index
        #[arg(long)]
        full: bool,
    },
    /// Check the agent's stores
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| config::default_config_path(&cli.agent));
    let config = match &cli.config {
        Some(path) => MidoConfig::load_from(path)?,
        None => MidoConfig::load(&cli.agent)?,
    };

    // stderr keeps stdout for the agent's own output.
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run => cli::run::run(&config).await,
        Command::Step { input } => cli::run::step(&config, input).await,
        command => {
            // The store commands are synchronous and may use a blocking HTTP
            // client, so they run off the async runtime.
            let handle = tokio::runtime::Handle::current();
            tokio::task::spawn_blocking(move || match command {
                Command::Init => cli::init::init(&config, &config_path),
                Command::Search {
                    query,
                    k,
                    memory_type,
                    min_importance,
                } => cli::search::search(&config, &query, k, memory_type, min_importance),
                Command::Inspect { id } => cli::inspect::inspect(&config, id),
                Command::History { limit } => cli::inspect::history(&config, limit),
                Command::Stats { json } => cli::stats::stats(&config, json),
                Command::Consolidate { hours, all } => {
                    cli::maintenance::consolidate(&config, hours, all, handle)
                }
                Command::Prune { dry_run } => cli::maintenance::prune(&config, dry_run),
                Command::Reindex { full } => cli::reindex::reindex(&config, full),
                Command::Doctor => cli::doctor::doctor(&config),
                Command::Run | Command::Step { .. } => Ok(()),
            })
            .await?
        }
    }
}
