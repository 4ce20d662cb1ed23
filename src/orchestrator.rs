//! # Clone/Sync Orchestrator
//!
//! Reconciles a provider organization with a local target directory that
//! holds one clone per repository.
//!
//! ## Process
//!
//! 1. **Setup**: validate options, create the target, open (or resume) the
//!    session.
//! 2. **Listing**: reuse the manifest or list the provider. In streaming mode
//!    the listing is consumed one page at a time and each page is scheduled
//!    as soon as it arrives.
//! 3. **Per repository** (on the bounded scheduler):
//!    - missing locally → clone
//!    - a clone of the expected remote (https and ssh forms are equal) →
//!      apply the strategy
//!    - anything else → error, unless `force` is set or the strategy is
//!      `clone`, which replace the directory
//! 4. **Retry**: each action runs under the retry policy. Auth and
//!    validation failures cancel the run and are returned as its error.
//! 5. **Orphans**: directories not in the manifest are reported and, when
//!    cleanup is enabled, removed. Without streaming this happens before
//!    cloning; with streaming after the last page.
//! 6. **Finish**: the session file is deleted once every repository is done.
//!
//! Repositories that succeeded in a previous run of a resumed session are
//! not touched again and are reported as `previously-synced`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{info, warn};
use serde::Serialize;

use crate::bulk::{interpret_pull, PullOutcome};
use crate::cancel::CancelToken;
use crate::config::{Strategy, SyncOptions};
use crate::error::{Error, Result};
use crate::git::{self, GitRunner};
use crate::manifest::{self, Manifest, ManifestStore};
use crate::provider::{self, Pages, ProviderClient, ProviderKind, RepoSummary};
use crate::result::{sort_results, RepoResult, RepoStatus, RepositoryRef, Summary};
use crate::retry::{self, Sleeper, ThreadSleeper};
use crate::safety::{Classifier, SafetyState};
use crate::scheduler::{NoProgress, ProgressSink, Scheduler};
use crate::session::{RepoState, SessionStore};

static THREAD_SLEEPER: ThreadSleeper = ThreadSleeper;

/// What a sync run did.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    pub provider: ProviderKind,
    pub organization: String,
    pub target: PathBuf,
    pub results: Vec<RepoResult>,
    pub summary: Summary,
    pub manifest_path: PathBuf,
    pub manifest_reused: bool,
    pub orphans: Vec<PathBuf>,
    pub orphans_removed: bool,
    pub resumed: bool,
    /// The session file was deleted because every repository finished
    pub session_cleared: bool,
}

impl SyncReport {
    pub fn has_failures(&self) -> bool {
        self.summary.failed() > 0
    }
}

/// The decision for one existing or missing clone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Clone,
    Reclone,
    Apply(Strategy),
}

/// Result of a successfully executed action.
struct Outcome {
    status: RepoStatus,
    message: String,
    branch: Option<String>,
}

impl Outcome {
    fn new(status: RepoStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            branch: None,
        }
    }

    fn session_state(&self) -> RepoState {
        match self.status {
            RepoStatus::Skipped
            | RepoStatus::Dirty
            | RepoStatus::Conflicts
            | RepoStatus::NoUpstream
            | RepoStatus::MergeInProgress => RepoState::Skipped,
            _ => RepoState::Succeeded,
        }
    }
}

/// State shared by the workers of one run.
struct Run<'r> {
    options: &'r SyncOptions,
    session: &'r SessionStore,
    fatal: Mutex<Option<Error>>,
}

impl Run<'_> {
    fn abort(&self, error: Error) {
        if let Ok(mut slot) = self.fatal.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
    }

    fn take_fatal(&self) -> Option<Error> {
        self.fatal.lock().ok().and_then(|mut slot| slot.take())
    }

    fn has_fatal(&self) -> bool {
        self.fatal.lock().map(|s| s.is_some()).unwrap_or(true)
    }
}

type OrphanConfirm<'a> = &'a (dyn Fn(&[PathBuf]) -> bool + Sync);

/// Drives a sync run. Collaborators are injected; nothing is global.
pub struct Orchestrator<'a> {
    git: &'a dyn GitRunner,
    provider: &'a dyn ProviderClient,
    progress: &'a dyn ProgressSink,
    sleeper: &'a dyn Sleeper,
    cancel: CancelToken,
    confirm_orphans: Option<OrphanConfirm<'a>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(git: &'a dyn GitRunner, provider: &'a dyn ProviderClient) -> Self {
        Self {
            git,
            provider,
            progress: &NoProgress,
            sleeper: &THREAD_SLEEPER,
            cancel: CancelToken::new(),
            confirm_orphans: None,
        }
    }

    pub fn with_progress(mut self, progress: &'a dyn ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_sleeper(mut self, sleeper: &'a dyn Sleeper) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ask before deleting orphans. Without a callback, cleanup proceeds
    /// whenever it is enabled.
    pub fn with_orphan_confirmation(mut self, confirm: OrphanConfirm<'a>) -> Self {
        self.confirm_orphans = Some(confirm);
        self
    }

    pub fn run(&self, options: &SyncOptions) -> Result<SyncReport> {
        options.validate()?;
        if options.provider != self.provider.kind() {
            return Err(Error::validation(format!(
                "provider client serves {} but the run targets {}",
                self.provider.kind(),
                options.provider
            )));
        }
        if !options.dry_run {
            fs::create_dir_all(&options.target)
                .map_err(|e| Error::filesystem(&options.target, e))?;
        }

        let session = SessionStore::open(options)?;
        let run = Run {
            options,
            session: &session,
            fatal: Mutex::new(None),
        };
        let manifests = ManifestStore::new(&options.target);

        let outcome = if options.streaming {
            self.run_streaming(&run, &manifests)
        } else {
            self.run_whole(&run, &manifests)
        };
        let (mut results, orphans, orphans_removed, manifest_reused) = match outcome {
            Ok(parts) => parts,
            Err(e) => {
                let _ = session.finish();
                return Err(e);
            }
        };

        sort_results(&mut results);
        let session_cleared = session.finish()?;
        if let Some(fatal) = run.take_fatal() {
            return Err(fatal);
        }

        let summary = Summary::from_results(&results);
        info!(
            "sync of {}/{} finished: {} repositories, {} failed",
            options.provider,
            options.organization,
            summary.total,
            summary.failed()
        );
        Ok(SyncReport {
            provider: options.provider,
            organization: options.organization.clone(),
            target: options.target.clone(),
            results,
            summary,
            manifest_path: manifests.path().to_path_buf(),
            manifest_reused,
            orphans,
            orphans_removed,
            resumed: session.resumed(),
            session_cleared,
        })
    }

    /// Materialize the listing, clean orphans, then schedule everything.
    fn run_whole(
        &self,
        run: &Run<'_>,
        manifests: &ManifestStore,
    ) -> Result<(Vec<RepoResult>, Vec<PathBuf>, bool, bool)> {
        let options = run.options;
        let (manifest, reused) = manifests.load_or_fetch(
            self.listing(options),
            options.cleanup_orphans,
            options.manifest_policy,
            !options.dry_run,
        )?;
        let (orphans, removed) = self.handle_orphans(options, &manifest)?;
        let results = self.sync_batch(run, &manifest.repositories)?;
        Ok((results, orphans, removed, reused))
    }

    /// Schedule each listing page as it arrives; write the manifest and
    /// clean orphans only once the whole listing has been seen.
    fn run_streaming(
        &self,
        run: &Run<'_>,
        manifests: &ManifestStore,
    ) -> Result<(Vec<RepoResult>, Vec<PathBuf>, bool, bool)> {
        let options = run.options;
        if let Some(manifest) = manifests.reusable(
            self.provider.kind(),
            &options.organization,
            options.manifest_policy,
        )? {
            let results = self.sync_batch(run, &manifest.repositories)?;
            let (orphans, removed) = self.handle_orphans(options, &manifest)?;
            return Ok((results, orphans, removed, true));
        }

        let mut seen = Vec::new();
        let mut results = Vec::new();
        let mut complete = true;
        for page in self.listing(options) {
            let page = page?;
            info!("processing page of {} repositories", page.len());
            results.extend(self.sync_batch(run, &page)?);
            seen.extend(page);
            if self.cancel.is_cancelled() || run.has_fatal() {
                complete = false;
                break;
            }
        }

        if !complete {
            warn!("listing not fully processed; manifest and orphan cleanup skipped");
            return Ok((results, Vec::new(), false, false));
        }

        let manifest = Manifest::new(
            self.provider.kind(),
            &options.organization,
            options.cleanup_orphans,
            seen,
        );
        if !options.dry_run {
            manifests.save(&manifest)?;
        }
        let (orphans, removed) = self.handle_orphans(options, &manifest)?;
        Ok((results, orphans, removed, false))
    }

    /// The organization's listing, with each page request under the retry
    /// policy so a throttled provider does not end the run.
    fn listing(&self, options: &SyncOptions) -> Pages<'_> {
        provider::pages(self.provider, &options.organization).with_retry(
            options.retry,
            self.sleeper,
            self.cancel.clone(),
        )
    }

    fn handle_orphans(
        &self,
        options: &SyncOptions,
        manifest: &Manifest,
    ) -> Result<(Vec<PathBuf>, bool)> {
        let orphans = manifest::compute_orphans(&options.target, &manifest.names())?;
        if orphans.is_empty() {
            return Ok((orphans, false));
        }
        if !options.cleanup_orphans || options.dry_run {
            info!("{} orphaned directories left in place", orphans.len());
            return Ok((orphans, false));
        }
        if let Some(confirm) = self.confirm_orphans {
            if !confirm(&orphans) {
                info!("orphan removal declined");
                return Ok((orphans, false));
            }
        }
        manifest::remove_orphans(&orphans)?;
        Ok((orphans, true))
    }

    fn sync_batch(&self, run: &Run<'_>, entries: &[RepoSummary]) -> Result<Vec<RepoResult>> {
        let options = run.options;
        let mut results = Vec::new();
        let mut pending = Vec::new();
        let mut seen = HashSet::new();

        for entry in entries {
            let repo = RepositoryRef::Remote {
                provider: options.provider,
                organization: options.organization.clone(),
                name: entry.name.clone(),
                clone_url: entry.clone_url.clone(),
            };
            if !seen.insert(entry.name.clone()) {
                warn!("duplicate listing entry {} ignored", entry.name);
                continue;
            }
            if let Err(e) = manifest::repository_dir(&options.target, &entry.name) {
                warn!("{}", e);
                results.push(RepoResult::failed(repo, &e));
                continue;
            }
            if entry.archived && !options.include_archived {
                results.push(RepoResult::new(repo, RepoStatus::Skipped, "archived"));
                continue;
            }
            if run.session.succeeded(&repo.identity())? {
                results.push(RepoResult::new(
                    repo,
                    RepoStatus::PreviouslySynced,
                    "completed in an earlier run",
                ));
                continue;
            }
            pending.push(repo);
        }

        let ids: Vec<String> = pending.iter().map(|r| r.identity()).collect();
        run.session.register(ids.iter().map(String::as_str))?;

        let scheduler = Scheduler::new(options.workers)?.with_cancel(self.cancel.clone());
        results.extend(scheduler.run(&pending, self.progress, |repo| self.sync_one(run, repo))?);
        Ok(results)
    }

    fn sync_one(&self, run: &Run<'_>, repo: &RepositoryRef) -> RepoResult {
        let RepositoryRef::Remote {
            name, clone_url, ..
        } = repo
        else {
            return RepoResult::failed(
                repo.clone(),
                &Error::validation("sync works on remote repositories only"),
            );
        };
        let options = run.options;
        let id = repo.identity();

        if let Err(e) = run.session.transition(&id, RepoState::InProgress, 0, None) {
            return RepoResult::failed(repo.clone(), &e);
        }
        let dest = match manifest::repository_dir(&options.target, name) {
            Ok(dest) => dest,
            Err(e) => return self.fail(run, repo, &id, e, 0),
        };

        let action = match self.plan(&dest, clone_url, options) {
            Ok(action) => action,
            Err(e) => return self.fail(run, repo, &id, e, 1),
        };

        if options.dry_run {
            let _ = run
                .session
                .transition(&id, RepoState::Skipped, 0, None);
            return preview(repo, action);
        }

        let attempted = retry::retry(&options.retry, self.sleeper, &self.cancel, |_| {
            self.execute(action, &dest, clone_url, options)
        });
        match attempted.result {
            Ok(outcome) => {
                if let Err(e) =
                    run.session
                        .transition(&id, outcome.session_state(), attempted.attempts, None)
                {
                    warn!("{}: could not record progress: {}", id, e);
                }
                RepoResult::new(repo.clone(), outcome.status, outcome.message)
                    .with_branch(outcome.branch)
                    .with_remote_url(Some(clone_url.clone()))
            }
            Err(e) => self.fail(run, repo, &id, e, attempted.attempts),
        }
    }

    /// Record a failure. Cancellation puts the repository back to pending;
    /// run-aborting kinds cancel every other worker.
    fn fail(
        &self,
        run: &Run<'_>,
        repo: &RepositoryRef,
        id: &str,
        error: Error,
        attempts: u32,
    ) -> RepoResult {
        if matches!(error, Error::Cancelled) {
            let _ = run.session.transition(id, RepoState::Pending, attempts, None);
            return RepoResult::new(repo.clone(), RepoStatus::Cancelled, "cancelled while running");
        }
        let error = error.in_repo(id);
        let result = RepoResult::failed(repo.clone(), &error);
        if let Err(e) = run
            .session
            .transition(id, RepoState::Failed, attempts, Some(&error))
        {
            warn!("{}: could not record failure: {}", id, e);
        }
        if error.aborts_run() {
            warn!("aborting run: {}", error);
            self.cancel.cancel();
            run.abort(error);
        }
        result
    }

    fn plan(&self, dest: &Path, clone_url: &str, options: &SyncOptions) -> Result<Action> {
        if !dest.exists() {
            return Ok(Action::Clone);
        }
        let replace = options.force || options.strategy == Strategy::Clone;
        let valid = if options.mirror {
            dest.join("HEAD").is_file()
        } else {
            git::is_repository(dest)
        };
        if !valid {
            return if replace {
                Ok(Action::Reclone)
            } else {
                Err(Error::filesystem(
                    dest,
                    "exists but is not a git repository; pass --force to replace it",
                ))
            };
        }

        match self.git.remote_url(dest)? {
            Some(remote) if git::same_remote(&remote, clone_url) => Ok(match options.strategy {
                Strategy::Clone => Action::Reclone,
                strategy => Action::Apply(strategy),
            }),
            _ if replace => Ok(Action::Reclone),
            remote => Err(Error::filesystem(
                dest,
                format!(
                    "origin is {} but {} was expected; pass --force to replace it",
                    remote.as_deref().unwrap_or("unset"),
                    clone_url
                ),
            )),
        }
    }

    fn execute(
        &self,
        action: Action,
        dest: &Path,
        url: &str,
        options: &SyncOptions,
    ) -> Result<Outcome> {
        match action {
            Action::Clone => {
                self.fresh_clone(dest, url, options)?;
                Ok(Outcome::new(RepoStatus::Cloned, "cloned"))
            }
            Action::Reclone | Action::Apply(Strategy::Clone) => {
                self.fresh_clone(dest, url, options)?;
                Ok(Outcome::new(RepoStatus::Cloned, "replaced with a fresh clone"))
            }
            Action::Apply(Strategy::Skip) => {
                Ok(Outcome::new(RepoStatus::Skipped, "left unchanged"))
            }
            Action::Apply(_) if options.mirror => {
                self.git.fetch_all(dest)?;
                Ok(Outcome::new(RepoStatus::Fetched, "mirror refs updated"))
            }
            Action::Apply(Strategy::Fetch) => {
                self.git.fetch_all(dest)?;
                Ok(Outcome::new(RepoStatus::Fetched, "remote refs updated"))
            }
            Action::Apply(Strategy::Reset) => {
                self.git.fetch_all(dest)?;
                let branch = self.git.current_branch(dest)?;
                let target = match &branch {
                    Some(b) => format!("origin/{}", b),
                    None => "origin/HEAD".to_string(),
                };
                self.git.reset_hard(dest, &target)?;
                Ok(Outcome {
                    branch,
                    ..Outcome::new(RepoStatus::Reset, format!("reset to {}", target))
                })
            }
            Action::Apply(strategy @ (Strategy::Rebase | Strategy::Pull)) => {
                self.update_in_place(dest, strategy)
            }
        }
    }

    /// Pull-based strategies only touch clones the safety classifier
    /// considers safe.
    fn update_in_place(&self, dest: &Path, strategy: Strategy) -> Result<Outcome> {
        self.git.fetch_all(dest)?;
        let c = Classifier::new(self.git).with_no_fetch(true).classify(dest)?;
        let outcome = match c.state {
            SafetyState::Safe => {
                let output = if strategy == Strategy::Rebase {
                    self.git.pull_rebase(dest)?
                } else {
                    self.git.pull(dest)?
                };
                match interpret_pull(&output) {
                    PullOutcome::AlreadyUpToDate => {
                        Outcome::new(RepoStatus::UpToDate, "already up to date")
                    }
                    PullOutcome::Updated(line) => Outcome::new(RepoStatus::Updated, line),
                }
            }
            state => Outcome::new(RepoStatus::from_safety(state), c.describe()),
        };
        Ok(Outcome {
            branch: c.branch,
            ..outcome
        })
    }

    fn fresh_clone(&self, dest: &Path, url: &str, options: &SyncOptions) -> Result<()> {
        if dest.exists() {
            fs::remove_dir_all(dest).map_err(|e| Error::filesystem(dest, e))?;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::filesystem(parent, e))?;
        }
        if options.mirror {
            self.git.clone_mirror(url, dest)
        } else {
            self.git.clone_repo(url, dest, &options.clone)
        }
    }
}

fn preview(repo: &RepositoryRef, action: Action) -> RepoResult {
    let (status, message) = match action {
        Action::Clone => (RepoStatus::WouldClone, "would clone".to_string()),
        Action::Reclone => (
            RepoStatus::WouldClone,
            "would replace with a fresh clone".to_string(),
        ),
        Action::Apply(Strategy::Skip) => (RepoStatus::Skipped, "left unchanged".to_string()),
        Action::Apply(strategy) => (RepoStatus::WouldUpdate, format!("would {}", strategy)),
    };
    RepoResult::new(repo.clone(), status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::provider::{summary, ListingProvider};
    use crate::retry::RetryPolicy;
    use crate::session::{load_session, session_path};
    use crate::testing::{FlakyProvider, MockGit, MockRepo};
    use std::time::Duration;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _delay: Duration, _cancel: &CancelToken) {}
    }

    fn listing(names: &[&str]) -> ListingProvider {
        ListingProvider::new(ProviderKind::Github)
            .with_organization("acme", names.iter().map(|n| summary(n)).collect())
            .with_page_size(2)
    }

    fn options(target: &Path) -> SyncOptions {
        let mut o = SyncOptions::new(ProviderKind::Github, "acme", target);
        o.workers = 2;
        o.retry = RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        };
        o
    }

    fn status_of(report: &SyncReport, name: &str) -> RepoStatus {
        report
            .results
            .iter()
            .find(|r| r.repository().label() == name)
            .map(|r| r.status())
            .unwrap()
    }

    /// A local clone of `name` whose origin matches the listing.
    fn existing_clone(git: &MockGit, target: &Path, name: &str, repo: MockRepo) {
        let dest = target.join(name);
        fs::create_dir_all(dest.join(".git")).unwrap();
        git.add_repo(
            &dest,
            MockRepo {
                remote_url: Some(format!("git@github.com:acme/{}.git", name)),
                ..repo
            },
        );
    }

    #[test]
    fn test_missing_repositories_are_cloned() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = listing(&["a", "b", "c"]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert!(report.results.iter().all(|r| r.status() == RepoStatus::Cloned));
        assert_eq!(git.calls_of("clone"), 3);
        assert!(report.manifest_path.exists());
        assert!(report.session_cleared);
        assert!(!session_path(temp.path(), ProviderKind::Github, "acme").exists());
    }

    #[test]
    fn test_existing_clone_gets_strategy_with_ssh_remote() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        existing_clone(&git, temp.path(), "a", MockRepo::behind(2));
        let provider = listing(&["a"]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();

        assert_eq!(status_of(&report, "a"), RepoStatus::Reset);
        assert_eq!(git.calls_of("clone"), 0);
        let resets = git.targets_of("reset");
        assert_eq!(resets.len(), 1);
        assert!(resets[0].ends_with("origin/main"));
    }

    #[test]
    fn test_rebase_strategy_respects_safety() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        existing_clone(&git, temp.path(), "safe", MockRepo::behind(2));
        existing_clone(
            &git,
            temp.path(),
            "dirty",
            MockRepo {
                status: " M x".into(),
                ..MockRepo::behind(2)
            },
        );
        let provider = listing(&["safe", "dirty"]);
        let mut o = options(temp.path());
        o.strategy = Strategy::Rebase;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();

        assert_eq!(status_of(&report, "safe"), RepoStatus::Updated);
        assert_eq!(status_of(&report, "dirty"), RepoStatus::Dirty);
        assert_eq!(git.calls_of("pull-rebase"), 1);
        assert!(!report.has_failures());
    }

    #[test]
    fn test_mismatched_directory_fails_without_force() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        fs::create_dir_all(temp.path().join("a/src")).unwrap();
        let provider = listing(&["a", "b"]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();

        assert_eq!(status_of(&report, "a"), RepoStatus::Failed);
        assert_eq!(status_of(&report, "b"), RepoStatus::Cloned);
        assert!(report.has_failures());
        assert!(temp.path().join("a/src").exists());
        // The failed repository keeps the session alive for --resume.
        assert!(!report.session_cleared);
    }

    #[test]
    fn test_force_replaces_mismatched_clone() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let dest = temp.path().join("a");
        fs::create_dir_all(dest.join(".git")).unwrap();
        git.add_repo(
            &dest,
            MockRepo {
                remote_url: Some("https://github.com/someone-else/a.git".into()),
                ..MockRepo::behind(0)
            },
        );
        let provider = listing(&["a"]);
        let mut o = options(temp.path());
        o.force = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert_eq!(status_of(&report, "a"), RepoStatus::Cloned);
        assert_eq!(git.targets_of("clone"), vec!["https://github.com/acme/a.git"]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let temp = tempfile::tempdir().unwrap();
        let target = temp.path().join("fleet");
        let git = MockGit::new();
        let provider = listing(&["a", "b"]);
        let mut o = options(&target);
        o.dry_run = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert!(report
            .results
            .iter()
            .all(|r| r.status() == RepoStatus::WouldClone));
        assert_eq!(git.calls_of("clone"), 0);
        assert!(!target.exists());
    }

    #[test]
    fn test_rate_limit_retried_then_fails_repository_only() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new().with_clone_failures(
            "https://github.com/acme/a.git",
            &[ErrorKind::RateLimit; 10],
        );
        let provider = listing(&["a", "b"]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();

        let a_clones = git
            .targets_of("clone")
            .iter()
            .filter(|u| u.ends_with("/a.git"))
            .count();
        assert_eq!(a_clones, 4);
        assert_eq!(status_of(&report, "a"), RepoStatus::Failed);
        assert_eq!(status_of(&report, "b"), RepoStatus::Cloned);

        let session = load_session(&session_path(temp.path(), ProviderKind::Github, "acme"))
            .unwrap()
            .unwrap();
        assert_eq!(session.repos["github/acme/a"].attempts, 4);
    }

    #[test]
    fn test_transient_failure_recovers() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new().with_clone_failures(
            "https://github.com/acme/a.git",
            &[ErrorKind::Network, ErrorKind::Timeout],
        );
        let provider = listing(&["a"]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();
        assert_eq!(status_of(&report, "a"), RepoStatus::Cloned);
        assert_eq!(git.calls_of("clone"), 3);
    }

    #[test]
    fn test_auth_error_aborts_run() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new()
            .with_clone_failures("https://github.com/acme/a.git", &[ErrorKind::Auth]);
        let provider = listing(&["a", "b", "c", "d"]);
        let mut o = options(temp.path());
        o.workers = 1;
        let err = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Auth);
        let a_clones = git
            .targets_of("clone")
            .iter()
            .filter(|u| u.ends_with("/a.git"))
            .count();
        assert_eq!(a_clones, 1, "auth failures are never retried");
        assert!(git.calls_of("clone") < 4);
    }

    #[test]
    fn test_orphans_removed_only_when_enabled() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        fs::create_dir_all(temp.path().join("stale")).unwrap();
        fs::create_dir_all(temp.path().join(".keep")).unwrap();
        let provider = listing(&["a"]);

        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();
        assert_eq!(report.orphans, vec![temp.path().join("stale")]);
        assert!(!report.orphans_removed);
        assert!(temp.path().join("stale").exists());

        let mut o = options(temp.path());
        o.cleanup_orphans = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert!(report.orphans_removed);
        assert!(!temp.path().join("stale").exists());
        assert!(temp.path().join(".keep").exists());
        assert!(temp.path().join("a").exists());
    }

    #[test]
    fn test_orphan_removal_can_be_declined() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        fs::create_dir_all(temp.path().join("stale")).unwrap();
        let provider = listing(&["a"]);
        let mut o = options(temp.path());
        o.cleanup_orphans = true;
        let decline = |_: &[PathBuf]| false;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .with_orphan_confirmation(&decline)
            .run(&o)
            .unwrap();
        assert!(!report.orphans_removed);
        assert!(temp.path().join("stale").exists());
    }

    #[test]
    fn test_streaming_processes_every_page() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        fs::create_dir_all(temp.path().join("stale")).unwrap();
        let provider = listing(&["a", "b", "c", "d", "e"]);
        let mut o = options(temp.path());
        o.streaming = true;
        o.cleanup_orphans = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert_eq!(report.results.len(), 5);
        assert_eq!(git.calls_of("clone"), 5);
        assert!(report.orphans_removed);
        let manifest = ManifestStore::new(temp.path()).load().unwrap().unwrap();
        assert_eq!(manifest.repositories.len(), 5);
    }

    #[test]
    fn test_archived_repositories_skipped() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let mut old = summary("old");
        old.archived = true;
        let provider = ListingProvider::new(ProviderKind::Github)
            .with_organization("acme", vec![summary("a"), old]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();
        assert_eq!(status_of(&report, "old"), RepoStatus::Skipped);
        assert_eq!(git.calls_of("clone"), 1);
    }

    #[test]
    fn test_resume_processes_only_remaining() {
        let temp = tempfile::tempdir().unwrap();
        let names = ["r0", "r1", "r2", "r3", "r4", "r5"];
        let provider = listing(&names);

        // First run: terminated after 2 of 6 clones.
        let cancel = CancelToken::new();
        let git = MockGit::new().with_cancel_after(2, cancel.clone());
        let mut o = options(temp.path());
        o.workers = 1;
        let first = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .with_cancel(cancel)
            .run(&o)
            .unwrap();
        assert_eq!(first.summary.count(RepoStatus::Cloned), 2);
        assert_eq!(first.summary.count(RepoStatus::Cancelled), 4);
        assert!(!first.session_cleared);

        // Without --resume the interrupted session blocks a fresh start.
        assert!(Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .is_err());

        // Resume with a different worker count.
        let git = MockGit::new();
        o.resume = true;
        o.workers = 3;
        let second = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert!(second.resumed);
        assert_eq!(git.calls_of("clone"), 4);
        assert_eq!(second.results.len(), 6);
        assert_eq!(second.summary.count(RepoStatus::PreviouslySynced), 2);
        assert_eq!(second.summary.count(RepoStatus::Cloned), 4);

        let mut ids: Vec<_> = second.results.iter().map(|r| r.repository().identity()).collect();
        ids.dedup();
        assert_eq!(ids.len(), 6);
        assert!(second.session_cleared);
    }

    #[test]
    fn test_resume_rejects_strategy_change() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new().with_clone_failures(
            "https://github.com/acme/a.git",
            &[ErrorKind::GitOperation],
        );
        let provider = listing(&["a"]);
        let o = options(temp.path());
        Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();

        let mut resume = options(temp.path());
        resume.resume = true;
        resume.strategy = Strategy::Pull;
        let err = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&resume)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_provider_listing_failure_is_run_error() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = ListingProvider::new(ProviderKind::Github);
        let err = Orchestrator::new(&git, &provider)
            .run(&options(temp.path()))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        // A failed start leaves no session behind.
        assert!(!session_path(temp.path(), ProviderKind::Github, "acme").exists());
    }

    #[test]
    fn test_concurrency_bounded_by_workers() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new().with_delay(Duration::from_millis(5));
        let names: Vec<String> = (0..12).map(|i| format!("repo-{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let provider = listing(&refs);
        let mut o = options(temp.path());
        o.workers = 3;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert_eq!(report.results.len(), 12);
        assert!(git.peak_concurrency() <= 3);
    }

    #[test]
    fn test_mirror_mode() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = listing(&["a"]);
        let mut o = options(temp.path());
        o.mirror = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();
        assert_eq!(status_of(&report, "a"), RepoStatus::Cloned);
        assert_eq!(git.calls_of("clone-mirror"), 1);
        assert_eq!(git.calls_of("clone"), 0);
    }

    #[test]
    fn test_throttled_listing_is_retried() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = FlakyProvider::new(listing(&["a", "b", "c"]), &[ErrorKind::RateLimit]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert_eq!(git.calls_of("clone"), 3);
        // One throttled request, then two pages.
        assert_eq!(provider.calls(), 3);
    }

    #[test]
    fn test_throttled_page_is_retried_when_streaming() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = FlakyProvider::new(
            listing(&["a", "b", "c"]),
            &[ErrorKind::Network, ErrorKind::Timeout],
        );
        let mut o = options(temp.path());
        o.streaming = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();

        assert_eq!(report.results.len(), 3);
        assert!(report.manifest_path.exists());
    }

    #[test]
    fn test_listing_gives_up_after_max_retries() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = FlakyProvider::new(listing(&["a"]), &[ErrorKind::RateLimit; 4]);
        let err = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(temp.path()))
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RateLimit);
        assert_eq!(provider.calls(), 4);
        assert_eq!(git.calls_of("clone"), 0);
    }

    #[test]
    fn test_names_outside_target_are_refused() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("fleet");
        let git = MockGit::new();
        let provider = listing(&["ok", "", ".", "..", "a/b", "../escaped", "/tmp/abs"]);
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&options(&target))
            .unwrap();

        assert_eq!(report.results.len(), 7);
        assert_eq!(report.summary.failed(), 6);
        assert_eq!(status_of(&report, "ok"), RepoStatus::Cloned);
        assert_eq!(git.calls_of("clone"), 1);
        assert!(!root.path().join("escaped").exists());
        for r in report.results.iter().filter(|r| r.status() == RepoStatus::Failed) {
            assert_eq!(r.error().unwrap().kind, ErrorKind::Filesystem);
        }
    }

    #[test]
    fn test_force_never_deletes_target_for_empty_name() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("notes.txt"), "mine").unwrap();
        let git = MockGit::new();
        let provider = listing(&["", "keepme"]);
        let mut o = options(temp.path());
        o.force = true;
        o.strategy = Strategy::Clone;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();

        assert!(report.has_failures());
        assert!(temp.path().join("notes.txt").exists());
        assert_eq!(status_of(&report, "keepme"), RepoStatus::Cloned);
        assert_eq!(git.calls_of("clone"), 1);
    }

    #[test]
    fn test_reserved_names_are_refused() {
        let temp = tempfile::tempdir().unwrap();
        let git = MockGit::new();
        let provider = listing(&[crate::defaults::MANIFEST_FILE, crate::defaults::STATE_DIR]);
        let mut o = options(temp.path());
        o.force = true;
        let report = Orchestrator::new(&git, &provider)
            .with_sleeper(&NoSleep)
            .run(&o)
            .unwrap();

        assert_eq!(report.summary.failed(), 2);
        assert_eq!(git.calls_of("clone"), 0);
    }
}
