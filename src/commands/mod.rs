//! # CLI Command Implementations
//!
//! Each subcommand of `evlav` lives in its own file with:
//! - an `Args` struct, derived using `clap`;
//! - an `execute` function taking the parsed `Args`, calling into the `evlav`
//!   library and reporting the outcome.
//!
//! `sync` and `plan` share their repository selection arguments through
//! [`RunArgs`].

pub mod completions;
pub mod plan;
pub mod sync;

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use evlav::config::{self, SyncConfig};
use evlav::sync::{SyncOptions, DEFAULT_SOURCES, DEFAULT_VERSIONS};

/// Arguments selecting what to synchronise and where
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Repository to synchronise (e.g. holo, jupiter)
    pub repo: String,

    /// Base URL of the source package listings
    #[arg(long, value_name = "URL", default_value = DEFAULT_SOURCES)]
    pub sources: String,

    /// Versions to synchronise. The first one MUST be the trunk (main)
    #[arg(
        short = 'v',
        long = "version",
        value_name = "VERSION",
        num_args = 1..,
        default_values = DEFAULT_VERSIONS
    )]
    pub versions: Vec<String>,

    /// Cache directory for indexes, packages and scratch checkouts
    #[arg(long, value_name = "PATH", env = "EVLAV_CACHE", default_value = "./cache")]
    pub cache: PathBuf,

    /// Destination of the synthesized repositories: a directory or an organisation URL
    #[arg(short, long, value_name = "DEST", env = "EVLAV_REMOTE", default_value = "./repositories")]
    pub remote: String,

    /// Reuse cached index listings instead of refreshing them
    #[arg(long)]
    pub skip_existing: bool,

    /// Path to the YAML configuration file
    #[arg(long, value_name = "PATH", env = "EVLAV_CONFIG")]
    pub config: Option<PathBuf>,

    /// Number of concurrent downloads (overrides the configuration)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,

    /// Rebuild the history from scratch instead of resuming it
    #[arg(long)]
    pub restart: bool,
}

impl RunArgs {
    /// Loads the configuration, applying command-line overrides.
    pub fn load_config(&self) -> Result<SyncConfig> {
        let mut config = config::load(self.config.as_deref()).with_context(|| {
            match &self.config {
                Some(path) => format!("Failed to load configuration {}", path.display()),
                None => "Failed to load configuration".to_string(),
            }
        })?;
        if let Some(workers) = self.workers {
            config.workers = usize::from(workers);
        }
        Ok(config)
    }

    pub fn options(&self) -> SyncOptions {
        SyncOptions {
            repo: self.repo.clone(),
            sources: self.sources.clone(),
            versions: self.versions.clone(),
            cache: self.cache.clone(),
            remote: self.remote.clone(),
            skip_existing: self.skip_existing,
            restart: self.restart,
            ..SyncOptions::default()
        }
    }
}
