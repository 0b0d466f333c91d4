//! Sync command implementation
//!
//! Runs a full synchronisation of one repository: index refresh, planning,
//! archive downloads, materialization of every version and mirroring of the
//! embedded sources.

use anyhow::{Context, Result};
use clap::Args;
use std::time::Instant;

use evlav::fetch::HttpFetcher;
use evlav::repository::DefaultGitOperations;
use evlav::sync::Syncer;

use super::RunArgs;

/// Arguments for the sync command
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Mirror the embedded sources of the latest update of every version again
    #[arg(long)]
    pub push_all: bool,

    /// Do not show download progress
    #[arg(long)]
    pub no_progress: bool,
}

/// Execute the sync command
pub fn execute(args: SyncArgs) -> Result<()> {
    let start_time = Instant::now();
    let config = args.run.load_config()?;

    let mut options = args.run.options();
    options.push_all = args.push_all;
    options.show_progress = !args.no_progress;

    println!("🔄 Synchronising {}", args.run.repo);
    if args.run.restart {
        println!("⚠️  Restart requested: history will be rebuilt and force-pushed");
    }
    println!();

    let git = DefaultGitOperations;
    let fetcher = HttpFetcher::new()?;
    let report = Syncer::new(options, config, &git, &fetcher)
        .run()
        .with_context(|| format!("Sync of {} failed", args.run.repo))?;

    println!(
        "✅ Synchronised in {:.2}s",
        start_time.elapsed().as_secs_f64()
    );
    println!(
        "   {} package(s) downloaded, {} already cached",
        report.fetched.downloaded, report.fetched.skipped
    );
    for branch in &report.branches {
        let result = &branch.result;
        println!(
            "   {}: {} commit(s), {} push(es), {} source(s) mirrored, {} package(s) skipped",
            branch.version, result.commits, result.pushes, result.mirrored, result.skipped_packages
        );
    }
    if args.push_all {
        println!(
            "   {} source(s) of the latest updates mirrored",
            report.mirrored_latest
        );
    }
    Ok(())
}
