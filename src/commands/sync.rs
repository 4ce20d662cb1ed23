//! # Sync Command Implementation
//!
//! Reconciles an organization's repositories with a local directory: clones
//! what is missing and applies the chosen strategy to existing clones.
//!
//! ## Functionality
//!
//! - **Listing**: read from a YAML listing (`--listing`) and persisted as the
//!   target's manifest; later runs reuse the manifest unless it is older than
//!   `--manifest-max-age` or `--refresh-manifest` is given.
//! - **Resume**: an interrupted run leaves a session behind; `--resume`
//!   continues it without touching repositories that already succeeded.
//! - **Orphans**: directories no longer in the listing are reported, and
//!   deleted with `--cleanup-orphans` after confirmation (skip it with
//!   `--yes`).
//!
//! Exits non-zero when the run aborted or any repository failed.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use dialoguer::{theme::ColorfulTheme, Confirm};
use log::warn;

use repo_fleet::config::{Strategy, SyncOptions};
use repo_fleet::defaults;
use repo_fleet::git::{CloneOptions, SystemGit};
use repo_fleet::manifest::ReusePolicy;
use repo_fleet::orchestrator::Orchestrator;
use repo_fleet::output::{BarProgress, OutputConfig};
use repo_fleet::provider::{ListingProvider, ProviderKind};
use repo_fleet::report;
use repo_fleet::retry::RetryPolicy;
use repo_fleet::suggestions;

/// Clone or update every repository of an organization
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Organization (or group) to sync
    #[arg(long, value_name = "NAME", env = "REPO_FLEET_ORG")]
    pub org: String,

    /// Hosting provider: github, gitlab or gitea
    #[arg(long, value_name = "NAME", env = "REPO_FLEET_PROVIDER", default_value = "github")]
    pub provider: String,

    /// YAML listing of the organization's repositories
    #[arg(long, value_name = "FILE", env = "REPO_FLEET_LISTING")]
    pub listing: Option<PathBuf>,

    /// Directory holding one clone per repository (defaults to ./<org>)
    #[arg(long, value_name = "DIR", env = "REPO_FLEET_TARGET")]
    pub target: Option<PathBuf>,

    /// What to do with existing clones: rebase, reset, clone, skip, pull, fetch
    #[arg(long, value_name = "STRATEGY", default_value = "reset")]
    pub strategy: String,

    /// Number of repositories processed at once
    #[arg(short, long, value_name = "N", env = "REPO_FLEET_PARALLEL", default_value_t = defaults::SYNC_WORKERS)]
    pub parallel: usize,

    /// Retries for rate-limit, network and timeout failures
    #[arg(long, value_name = "N", default_value_t = defaults::MAX_RETRIES)]
    pub max_retries: u32,

    /// Continue an interrupted run
    #[arg(long)]
    pub resume: bool,

    /// Replace directories that are not clones of the expected remote
    #[arg(short, long)]
    pub force: bool,

    /// Show what would be done without making changes
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Delete directories that are not in the listing
    #[arg(long)]
    pub cleanup_orphans: bool,

    /// Do not ask before deleting orphans
    #[arg(short, long)]
    pub yes: bool,

    /// Start work on each listing page as soon as it arrives
    #[arg(long)]
    pub streaming: bool,

    /// Also sync archived repositories
    #[arg(long)]
    pub include_archived: bool,

    /// Keep bare mirrors instead of work trees
    #[arg(long, conflicts_with_all = ["depth", "branch"])]
    pub mirror: bool,

    /// Shallow-clone with this many commits
    #[arg(long, value_name = "N")]
    pub depth: Option<u32>,

    /// Clone this branch instead of the default branch
    #[arg(long, value_name = "NAME")]
    pub branch: Option<String>,

    /// List the provider again even if a manifest exists
    #[arg(long, conflicts_with = "manifest_max_age")]
    pub refresh_manifest: bool,

    /// Reuse the manifest only if it is younger than this many seconds
    #[arg(long, value_name = "SECS")]
    pub manifest_max_age: Option<u64>,

    /// Seconds allowed for each git command
    #[arg(long, value_name = "SECS", default_value_t = defaults::OPERATION_TIMEOUT.as_secs())]
    pub git_timeout: u64,

    /// Overall time budget in seconds; the session is kept for --resume
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    fn options(&self) -> Result<SyncOptions> {
        let provider = ProviderKind::from_str(&self.provider)
            .map_err(|_| suggestions::unknown_provider(&self.provider))?;
        let strategy = Strategy::from_str(&self.strategy)
            .map_err(|_| suggestions::unknown_strategy(&self.strategy))?;
        let target = self
            .target
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.org));

        let mut options = SyncOptions::new(provider, &self.org, target);
        options.strategy = strategy;
        options.workers = self.parallel;
        options.retry = RetryPolicy::new(self.max_retries);
        options.resume = self.resume;
        options.force = self.force;
        options.dry_run = self.dry_run;
        options.cleanup_orphans = self.cleanup_orphans;
        options.streaming = self.streaming;
        options.include_archived = self.include_archived;
        options.mirror = self.mirror;
        options.clone = CloneOptions {
            depth: self.depth,
            branch: self.branch.clone(),
        };
        options.manifest_policy = match (self.refresh_manifest, self.manifest_max_age) {
            (true, _) => ReusePolicy::Never,
            (false, Some(secs)) => ReusePolicy::MaxAge(Duration::from_secs(secs)),
            (false, None) => ReusePolicy::Always,
        };
        options.deadline = self.timeout.map(Duration::from_secs);
        Ok(options)
    }
}

/// Ask on the terminal whether `orphans` may be deleted. Anything but an
/// explicit yes keeps them.
fn confirm_removal(orphans: &[PathBuf]) -> bool {
    eprintln!("Directories not in the listing:");
    for path in orphans {
        eprintln!("  {}", path.display());
    }
    match Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Delete these {} directories?", orphans.len()))
        .default(false)
        .interact()
    {
        Ok(answer) => answer,
        Err(e) => {
            warn!("cannot prompt for orphan removal ({}); pass --yes to remove", e);
            false
        }
    }
}

/// Execute the `sync` command.
pub fn execute(args: SyncArgs, output: &OutputConfig) -> Result<()> {
    let options = args.options()?;
    let listing = args
        .listing
        .as_deref()
        .ok_or_else(|| suggestions::listing_required(options.provider))?;
    let provider = ListingProvider::from_file(options.provider, listing)
        .with_context(|| format!("Failed to load listing {}", listing.display()))?;

    let cancel = super::run_token(options.deadline);
    let git = SystemGit::new()
        .with_timeout(Duration::from_secs(args.git_timeout))
        .with_cancel(cancel.clone());
    let progress = BarProgress::new(super::show_progress(args.json));
    let confirm = |orphans: &[PathBuf]| progress.suspend(|| confirm_removal(orphans));

    let mut orchestrator = Orchestrator::new(&git, &provider)
        .with_progress(&progress)
        .with_cancel(cancel);
    if !args.yes {
        orchestrator = orchestrator.with_orphan_confirmation(&confirm);
    }
    let result = orchestrator.run(&options);
    progress.finish();
    let report = result?;

    if args.json {
        println!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::render_sync(&report, output));
    }

    if report.has_failures() {
        return Err(suggestions::sync_incomplete(
            report.summary.failed(),
            options.strategy,
        ));
    }
    Ok(())
}
