//! # Pull-All Command Implementation
//!
//! Finds every git repository under a directory and rebase-pulls the ones
//! the safety classifier considers safe. Repositories with local changes,
//! diverged history, no upstream or an unfinished merge are reported and
//! left alone.
//!
//! Exits non-zero when any repository failed.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;

use repo_fleet::bulk::BulkUpdater;
use repo_fleet::config::BulkOptions;
use repo_fleet::defaults;
use repo_fleet::git::SystemGit;
use repo_fleet::locator::LocatorOptions;
use repo_fleet::output::{BarProgress, OutputConfig};
use repo_fleet::report;
use repo_fleet::suggestions;

/// Update every safe repository under a directory
#[derive(Args, Debug)]
pub struct PullAllArgs {
    /// Directory to scan (defaults to the current directory)
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Number of repositories processed at once
    #[arg(short, long, value_name = "N", env = "REPO_FLEET_PARALLEL", default_value_t = defaults::BULK_WORKERS)]
    pub parallel: usize,

    /// Maximum directory depth to scan
    #[arg(long, value_name = "N", default_value_t = defaults::MAX_SCAN_DEPTH)]
    pub max_depth: usize,

    /// Only repositories whose path matches this regex
    #[arg(long, value_name = "REGEX")]
    pub include: Option<String>,

    /// Skip repositories whose path matches this regex
    #[arg(long, value_name = "REGEX")]
    pub exclude: Option<String>,

    /// Extra directory names never descended into
    #[arg(long, value_name = "NAME")]
    pub ignore: Vec<String>,

    /// Show what would be pulled without pulling
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Classify on local refs only, without fetching
    #[arg(long)]
    pub no_fetch: bool,

    /// Seconds allowed for each fetch
    #[arg(long, value_name = "SECS", default_value_t = defaults::FETCH_TIMEOUT.as_secs())]
    pub fetch_timeout: u64,

    /// Overall time budget in seconds; unstarted repositories are cancelled
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

impl PullAllArgs {
    fn options(&self) -> BulkOptions {
        let mut locator = LocatorOptions {
            max_depth: self.max_depth,
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            ..LocatorOptions::default()
        };
        locator.ignore.extend(self.ignore.iter().cloned());

        BulkOptions {
            root: self.dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            locator,
            workers: self.parallel,
            dry_run: self.dry_run,
            no_fetch: self.no_fetch,
            fetch_timeout: Duration::from_secs(self.fetch_timeout),
            deadline: self.timeout.map(Duration::from_secs),
        }
    }
}

/// Execute the `pull-all` command.
pub fn execute(args: PullAllArgs, output: &OutputConfig) -> Result<()> {
    let options = args.options();
    if !options.root.is_dir() {
        return Err(suggestions::path_not_found(&options.root));
    }

    let cancel = super::run_token(options.deadline);
    let git = SystemGit::new().with_cancel(cancel.clone());
    let progress = BarProgress::new(super::show_progress(args.json));
    let result = BulkUpdater::new(&git, &progress)
        .with_cancel(cancel)
        .run(&options);
    progress.finish();
    let report = result?;

    if args.json {
        println!("{}", report::to_json(&report)?);
    } else {
        print!("{}", report::render_bulk(&report, output));
    }

    if report.has_failures() {
        return Err(suggestions::repositories_failed(
            report.summary.failed(),
            report.summary.total,
        ));
    }
    Ok(())
}
