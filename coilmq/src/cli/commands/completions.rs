//! Shell completion generation.

use std::io::Write;

use clap::CommandFactory;

use crate::cli::args::{Cli, CompletionsArgs};

/// Writes the completion script for `args.shell` to `out`.
pub fn generate(args: &CompletionsArgs, out: &mut dyn Write) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(args.shell, &mut cmd, name, out);
}

/// Print a shell completion script to stdout.
pub fn run(args: &CompletionsArgs) {
    generate(args, &mut std::io::stdout());
}
