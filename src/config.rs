//! # Run Options
//!
//! Plain option structs for the two entry points of the engine. The CLI
//! fills them from flags; library callers build them directly. Each has a
//! `validate` method that is run before any work starts, so malformed
//! options surface as a `Validation` error and nothing is touched.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::git::CloneOptions;
use crate::locator::LocatorOptions;
use crate::manifest::ReusePolicy;
use crate::provider::ProviderKind;
use crate::retry::RetryPolicy;

/// What to do with a local clone that already matches its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// `git pull --rebase`
    Rebase,
    /// Fetch, then hard-reset to the remote-tracking branch
    #[default]
    Reset,
    /// Remove the clone and clone again
    Clone,
    /// Leave the clone alone
    Skip,
    /// Plain merge `git pull`
    Pull,
    /// Update remote refs only
    Fetch,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Rebase => "rebase",
            Strategy::Reset => "reset",
            Strategy::Clone => "clone",
            Strategy::Skip => "skip",
            Strategy::Pull => "pull",
            Strategy::Fetch => "fetch",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rebase" => Ok(Strategy::Rebase),
            "reset" => Ok(Strategy::Reset),
            "clone" => Ok(Strategy::Clone),
            "skip" => Ok(Strategy::Skip),
            "pull" => Ok(Strategy::Pull),
            "fetch" => Ok(Strategy::Fetch),
            other => Err(Error::validation_with_hint(
                format!("unknown strategy '{}'", other),
                "Use one of: rebase, reset, clone, skip, pull, fetch",
            )),
        }
    }
}

fn check_workers(workers: usize) -> Result<()> {
    if workers == 0 {
        return Err(Error::validation_with_hint(
            "worker count must be at least 1",
            "Pass --parallel with a positive number",
        ));
    }
    Ok(())
}

/// Options for updating every repository under a local directory.
#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub root: PathBuf,
    pub locator: LocatorOptions,
    pub workers: usize,
    /// Report what would be pulled without pulling
    pub dry_run: bool,
    /// Classify on local refs only
    pub no_fetch: bool,
    pub fetch_timeout: Duration,
    /// Overall budget for the run
    pub deadline: Option<Duration>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            locator: LocatorOptions::default(),
            workers: defaults::BULK_WORKERS,
            dry_run: false,
            no_fetch: false,
            fetch_timeout: defaults::FETCH_TIMEOUT,
            deadline: None,
        }
    }
}

impl BulkOptions {
    pub fn validate(&self) -> Result<()> {
        check_workers(self.workers)?;
        if self.fetch_timeout.is_zero() {
            return Err(Error::validation("fetch timeout must be positive"));
        }
        Ok(())
    }
}

/// Options for reconciling a provider organization with a local directory.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub provider: ProviderKind,
    pub organization: String,
    /// Directory holding one clone per repository
    pub target: PathBuf,
    pub strategy: Strategy,
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Continue a previously interrupted run
    pub resume: bool,
    /// Replace local directories that are not a clone of the expected remote
    pub force: bool,
    pub dry_run: bool,
    /// Delete local directories that are not in the manifest
    pub cleanup_orphans: bool,
    /// Process the listing page by page instead of loading it whole
    pub streaming: bool,
    pub include_archived: bool,
    /// Keep bare mirrors instead of work trees
    pub mirror: bool,
    pub clone: CloneOptions,
    pub manifest_policy: ReusePolicy,
    pub deadline: Option<Duration>,
}

impl SyncOptions {
    pub fn new(
        provider: ProviderKind,
        organization: impl Into<String>,
        target: impl Into<PathBuf>,
    ) -> Self {
        Self {
            provider,
            organization: organization.into(),
            target: target.into(),
            strategy: Strategy::default(),
            workers: defaults::SYNC_WORKERS,
            retry: RetryPolicy::default(),
            resume: false,
            force: false,
            dry_run: false,
            cleanup_orphans: false,
            streaming: false,
            include_archived: false,
            mirror: false,
            clone: CloneOptions::default(),
            manifest_policy: ReusePolicy::default(),
            deadline: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let org = self.organization.trim();
        if org.is_empty() {
            return Err(Error::validation_with_hint(
                "organization is required",
                "Pass --org <NAME>",
            ));
        }
        if org.contains('/') || org.contains('\\') || org == "." || org == ".." {
            return Err(Error::validation(format!(
                "invalid organization name '{}'",
                self.organization
            )));
        }
        if self.target.as_os_str().is_empty() {
            return Err(Error::validation("target directory is required"));
        }
        if self.target.exists() && !self.target.is_dir() {
            return Err(Error::validation(format!(
                "target {} exists and is not a directory",
                self.target.display()
            )));
        }
        check_workers(self.workers)?;
        if self.clone.depth == Some(0) {
            return Err(Error::validation("clone depth must be at least 1"));
        }
        if self.mirror && (self.clone.depth.is_some() || self.clone.branch.is_some()) {
            return Err(Error::validation(
                "--depth and --branch cannot be combined with --mirror",
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::validation(
                "retry base delay must not exceed the maximum delay",
            ));
        }
        Ok(())
    }
}
