use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::init::InitBuilder;
use crate::program::Program;
use crate::scheduler::{Scheduler, ScriptExit};
use crate::types::Clock;

#[derive(Parser)]
#[command(name = "shardscript")]
#[command(about = "Shardscript - cooperative script scheduler for game shards", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter directives, e.g. "shardscript_core=debug"
    #[arg(long, global = true)]
    pub log: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run script files until every script exits
    Run {
        /// JSON program files
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Stop after this many server ticks
        #[arg(long)]
        max_ticks: Option<u64>,
    },

    /// Print the resolved configuration as TOML
    Config,
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    let mut init = InitBuilder::new();
    if let Some(path) = &cli.config {
        init = init.config_path(path);
    }
    if let Some(filter) = &cli.log {
        init = init.log_filter(filter);
    }
    let config = init.init()?;

    match cli.command {
        Commands::Run { files, max_ticks } => {
            let exits = run_files(&config, &files, max_ticks).await?;
            for exit in exits {
                println!("{}", serde_json::to_string(&exit)?);
            }
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

/// Launch every program and drive the scheduler the way a server tick loop
/// would, sleeping for the idle budget between ticks
pub async fn run_files(
    config: &Config,
    files: &[PathBuf],
    max_ticks: Option<u64>,
) -> Result<Vec<ScriptExit>> {
    let mut scheduler = Scheduler::new(config.scheduler.clone());

    for path in files {
        let program = Program::from_file(path)?;
        let pid = scheduler
            .start_script(Arc::new(program))
            .with_context(|| format!("Failed to start {}", path.display()))?;
        info!(%pid, file = %path.display(), "loaded script");
    }

    let mut now: Clock = 0;
    let mut ticks: u64 = 0;

    while !scheduler.is_empty() {
        if max_ticks.is_some_and(|max| ticks >= max) {
            warn!(ticks, remaining = scheduler.len(), "tick limit reached");
            break;
        }

        scheduler.run_ready(now);

        let mut clocksleft = config.server.idle_clocks;
        scheduler.check_blocked(now, &mut clocksleft);

        let idle = match scheduler.calc_script_clocksleft(now) {
            Some(0) => config.server.tick_ms,
            Some(left) => left.min(clocksleft),
            None if scheduler.external_count() > 0 => config.server.tick_ms,
            // Nothing can wake without outside input
            None if !scheduler.is_empty() => {
                warn!(remaining = scheduler.len(), "scripts blocked with nothing to wake them");
                break;
            }
            None => break,
        };

        tokio::time::sleep(Duration::from_millis(idle)).await;
        now += idle;
        ticks += 1;
    }

    scheduler.shutdown();
    Ok(scheduler.take_exits())
}
