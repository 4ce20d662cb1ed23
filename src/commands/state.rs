//! # State Command Implementation
//!
//! Inspects or removes the session a sync run leaves behind when it did not
//! finish. `state show` prints per-status counts and the repositories that
//! still need work; `state clear` deletes the session so the next run
//! starts over.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Args, Subcommand};

use repo_fleet::output::{emoji, OutputConfig};
use repo_fleet::provider::ProviderKind;
use repo_fleet::session::{self, RepoState, SessionState};
use repo_fleet::suggestions;

/// Inspect or clear saved sync sessions
#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(subcommand)]
    pub command: StateCommand,
}

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Show the saved session of a sync target
    Show(SessionArgs),
    /// Delete the saved session of a sync target
    Clear(SessionArgs),
}

#[derive(Args, Debug)]
pub struct SessionArgs {
    /// Organization the session belongs to
    #[arg(long, value_name = "NAME", env = "REPO_FLEET_ORG")]
    pub org: String,

    /// Hosting provider: github, gitlab or gitea
    #[arg(long, value_name = "NAME", env = "REPO_FLEET_PROVIDER", default_value = "github")]
    pub provider: String,

    /// Sync target directory (defaults to ./<org>)
    #[arg(long, value_name = "DIR", env = "REPO_FLEET_TARGET")]
    pub target: Option<PathBuf>,

    /// Print the session as JSON
    #[arg(long)]
    pub json: bool,
}

impl SessionArgs {
    fn resolve(&self) -> Result<(ProviderKind, PathBuf)> {
        let provider = ProviderKind::from_str(&self.provider)
            .map_err(|_| suggestions::unknown_provider(&self.provider))?;
        let target = self
            .target
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.org));
        Ok((provider, target))
    }
}

/// Execute the `state` command.
pub fn execute(args: StateArgs, output: &OutputConfig) -> Result<()> {
    match args.command {
        StateCommand::Show(args) => execute_show(args, output),
        StateCommand::Clear(args) => execute_clear(args, output),
    }
}

fn execute_show(args: SessionArgs, output: &OutputConfig) -> Result<()> {
    let (provider, target) = args.resolve()?;
    let path = session::session_path(&target, provider, &args.org);
    let Some(state) = session::load_session(&path)? else {
        if args.json {
            println!("null");
        } else {
            println!("No saved session for {}/{} in {}", provider, args.org, target.display());
        }
        return Ok(());
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else {
        print!("{}", render_session(&state, output));
    }
    Ok(())
}

fn render_session(state: &SessionState, output: &OutputConfig) -> String {
    let mut out = format!(
        "{} Session {} for {}/{} ({})\n  started {}, last update {}\n  strategy {}, {} workers\n",
        emoji(output, "📋", "[STATE]"),
        state.resume_token,
        state.provider,
        output.bold(&state.organization),
        state.target.display(),
        state.started_at.to_rfc3339(),
        state.updated_at.to_rfc3339(),
        state.strategy,
        state.options.workers,
    );
    for (label, status) in [
        ("succeeded", RepoState::Succeeded),
        ("skipped", RepoState::Skipped),
        ("failed", RepoState::Failed),
        ("in progress", RepoState::InProgress),
        ("pending", RepoState::Pending),
    ] {
        let n = state.count(status);
        if n > 0 {
            out.push_str(&format!("  {:>5} {}\n", n, label));
        }
    }
    for (id, entry) in &state.repos {
        if entry.status == RepoState::Failed {
            out.push_str(&format!(
                "  failed: {} after {} attempt(s): {}\n",
                id,
                entry.attempts,
                entry.last_error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
    out
}

fn execute_clear(args: SessionArgs, output: &OutputConfig) -> Result<()> {
    let (provider, target) = args.resolve()?;
    if session::clear_session(&target, provider, &args.org)? {
        println!(
            "{} Cleared session for {}/{}",
            emoji(output, "🗑️ ", "[CLEAR]"),
            provider,
            args.org
        );
    } else {
        println!("No saved session for {}/{}", provider, args.org);
    }
    Ok(())
}
