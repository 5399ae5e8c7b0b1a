pub mod config;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "aiop", version, about = "AI operator control plane: task queue, memory log, HTTP orchestrator")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Runs the HTTP orchestrator (default when no subcommand is given).
    Serve,
    /// Runs the task worker loop against the configured store.
    Worker,
    /// Configuration inspection.
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Prints the resolved configuration (secrets redacted).
    Show,
    /// Validates the configuration; exits non-zero on any `Error`-severity issue.
    Validate,
}
