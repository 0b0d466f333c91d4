//! # evlav CLI
//!
//! Binary entry point for the `evlav` command-line tool.
//!
//! The binary only parses arguments, sets up logging and dispatches to a
//! command. All behavior lives in the `evlav` library crate.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
