//! Completions command implementation
//!
//! Writes a `clap_complete` completion script for `evlav` to stdout:
//!
//! ```bash
//! evlav completions bash > ~/.local/share/bash-completion/completions/evlav
//! evlav completions fish > ~/.config/fish/completions/evlav.fish
//! ```

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};
use std::io::{self, Write};

use crate::cli::Cli;

/// Arguments for the completions command
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// The shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

fn write_completions(shell: Shell, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "evlav", out);
}

/// Execute the completions command
pub fn execute(args: CompletionsArgs) -> Result<()> {
    write_completions(args.shell, &mut io::stdout());
    Ok(())
}
