//! Plan command implementation
//!
//! Prints the work plan of every version: the checkpoint each pending update
//! will be tagged with and the checkpoint it starts from. Index listings are
//! refreshed and the scratch checkout is fetched, but no archive is
//! downloaded and nothing is committed or pushed.

use anyhow::{Context, Result};
use clap::Args;

use evlav::checkpoint::tag_name;
use evlav::fetch::HttpFetcher;
use evlav::repository::DefaultGitOperations;
use evlav::sync::{BranchPlan, Syncer};

use super::RunArgs;

/// Arguments for the plan command
#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

/// Renders a plan as printed by the command.
fn render(plans: &[BranchPlan]) -> String {
    let mut out = String::new();
    for plan in plans {
        let version = &plan.repo.version;
        if plan.todo.is_empty() {
            out.push_str(&format!("✅ {}: up to date\n", version));
            continue;
        }
        out.push_str(&format!(
            "📦 {}: {} update(s) to materialize\n",
            version,
            plan.todo.len()
        ));
        for item in &plan.todo {
            out.push_str(&format!(
                "   {} <- {} ({} package(s))\n",
                tag_name(version, &item.update),
                item.start.as_deref().unwrap_or("new root"),
                item.update.packages.len()
            ));
        }
    }
    out
}

/// Execute the plan command
pub fn execute(args: PlanArgs) -> Result<()> {
    let config = args.run.load_config()?;
    let git = DefaultGitOperations;
    let fetcher = HttpFetcher::new()?;

    let plans = Syncer::new(args.run.options(), config, &git, &fetcher)
        .plan()
        .with_context(|| format!("Planning {} failed", args.run.repo))?;

    println!("🔎 Plan for {}", args.run.repo);
    println!();
    print!("{}", render(&plans));
    Ok(())
}
