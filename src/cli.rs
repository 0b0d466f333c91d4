//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands;

/// evlav - Rebuild git history from package mirror snapshots
#[derive(Parser, Debug)]
#[command(name = "evlav")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Synthesize and push the history of a repository
    Sync(commands::sync::SyncArgs),

    /// Show the updates a sync would materialize, without changing anything
    Plan(commands::plan::PlanArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // RUST_LOG, when set, takes precedence over --log-level.
        env_logger::Builder::from_env(
            env_logger::Env::default().default_filter_or(self.log_level.as_str()),
        )
        .format_timestamp_secs()
        .init();

        match self.command {
            Commands::Sync(args) => commands::sync::execute(args),
            Commands::Plan(args) => commands::plan::execute(args),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}
