//! CLI argument parsing and command dispatch

use anyhow::Result;
use clap::{Parser, Subcommand};
use repo_fleet::output::OutputConfig;

use crate::commands;

/// Repository Fleet - keep many git repositories current
#[derive(Parser, Debug)]
#[command(name = "repo-fleet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update every safe git repository under a directory
    PullAll(commands::pull_all::PullAllArgs),

    /// Clone or update every repository of an organization into a directory
    Sync(commands::sync::SyncArgs),

    /// Inspect or clear saved sync sessions
    State(commands::state::StateArgs),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let output = OutputConfig::from_env_and_flag(&self.color);

        match self.command {
            Commands::PullAll(args) => commands::pull_all::execute(args, &output),
            Commands::Sync(args) => commands::sync::execute(args, &output),
            Commands::State(args) => commands::state::execute(args, &output),
        }
    }
}

/// `RUST_LOG` wins over `--log-level` when set.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}
