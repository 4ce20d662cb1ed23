//! # Bulk Update
//!
//! The local fleet path: locate every repository under a root, classify
//! each one, and rebase-pull only those classified `Safe`.
//!
//! Repositories in any other state get a descriptive result and are left
//! untouched. In dry-run mode `Safe` repositories are reported as
//! `would-update` and nothing is pulled.

use std::path::{Path, PathBuf};

use log::info;
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::BulkOptions;
use crate::error::{Error, Result};
use crate::git::GitRunner;
use crate::locator;
use crate::result::{RepoResult, RepoStatus, RepositoryRef, Summary};
use crate::safety::{Classifier, SafetyState};
use crate::scheduler::{ProgressSink, Scheduler};

/// How a pull ended, judged from its output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    AlreadyUpToDate,
    Updated(String),
}

/// Interpret the output of a successful `git pull` / `git pull --rebase`.
pub fn interpret_pull(output: &str) -> PullOutcome {
    let up_to_date = output.contains("Already up to date")
        || output.contains("Already up-to-date")
        || (output.contains("Current branch") && output.contains("is up to date"));
    if up_to_date {
        return PullOutcome::AlreadyUpToDate;
    }
    let first = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("updated");
    PullOutcome::Updated(first.to_string())
}

/// Results of a bulk update run.
#[derive(Debug, Serialize)]
pub struct BulkReport {
    pub root: PathBuf,
    pub results: Vec<RepoResult>,
    pub summary: Summary,
}

impl BulkReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failed() > 0
    }
}

/// Updates every safe repository under a root directory.
pub struct BulkUpdater<'a> {
    git: &'a dyn GitRunner,
    progress: &'a dyn ProgressSink,
    cancel: CancelToken,
}

impl<'a> BulkUpdater<'a> {
    pub fn new(git: &'a dyn GitRunner, progress: &'a dyn ProgressSink) -> Self {
        Self {
            git,
            progress,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run(&self, options: &BulkOptions) -> Result<BulkReport> {
        options.validate()?;
        let found = locator::locate(&options.root, &options.locator)?;
        info!(
            "found {} repositories under {}",
            found.len(),
            options.root.display()
        );

        let repos: Vec<RepositoryRef> = found.into_iter().map(RepositoryRef::local).collect();
        let scheduler = Scheduler::new(options.workers)?.with_cancel(self.cancel.clone());
        let results = scheduler.run(&repos, self.progress, |repo| match repo {
            RepositoryRef::Local { path } => self.update_one(path, options),
            RepositoryRef::Remote { .. } => RepoResult::failed(
                repo.clone(),
                &Error::validation("bulk update works on local paths only"),
            ),
        })?;

        let summary = Summary::from_results(&results);
        Ok(BulkReport {
            root: options.root.clone(),
            results,
            summary,
        })
    }

    /// Classify one repository and pull it if, and only if, it is safe.
    pub fn update_one(&self, path: &Path, options: &BulkOptions) -> RepoResult {
        let repo = RepositoryRef::local(path);
        let classifier = Classifier::new(self.git)
            .with_no_fetch(options.no_fetch)
            .with_fetch_timeout(options.fetch_timeout);

        let c = match classifier.classify(path) {
            Ok(c) => c,
            Err(e) => return RepoResult::failed(repo, &e.in_repo(&path.display().to_string())),
        };

        if c.state != SafetyState::Safe {
            let status = RepoStatus::from_safety(c.state);
            return RepoResult::new(repo, status, c.describe()).with_classification(&c);
        }

        if options.dry_run {
            return RepoResult::new(repo, RepoStatus::WouldUpdate, c.describe())
                .with_classification(&c);
        }

        match self.git.pull_rebase(path) {
            Ok(output) => match interpret_pull(&output) {
                PullOutcome::AlreadyUpToDate => {
                    RepoResult::new(repo, RepoStatus::UpToDate, "already up to date")
                }
                PullOutcome::Updated(line) => RepoResult::new(repo, RepoStatus::Updated, line),
            }
            .with_classification(&c),
            Err(e) => RepoResult::failed(repo, &e).with_classification(&c),
        }
    }
}
