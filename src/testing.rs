//! Scriptable [`GitRunner`] and [`ProviderClient`] used by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Context, Error, ErrorKind, Result};
use crate::git::{CloneOptions, GitRunner};
use crate::provider::{ListingProvider, ProviderClient, ProviderKind, RepoPage, RepoSummary};

/// Build an error of the given kind the way the system runner would.
pub fn error_of(kind: ErrorKind, target: &str) -> Error {
    let context = Context::new("mock").with_repo(target);
    match kind {
        ErrorKind::Validation => Error::validation(format!("invalid {}", target)),
        ErrorKind::Auth => Error::Auth {
            context,
            message: "Authentication failed".into(),
        },
        ErrorKind::RateLimit => Error::RateLimit {
            context,
            message: "API rate limit exceeded".into(),
            retry_after: None,
        },
        ErrorKind::Network => Error::Network {
            context,
            message: "Could not resolve host".into(),
        },
        ErrorKind::Timeout => Error::Timeout {
            context,
            after: Duration::from_secs(30),
        },
        ErrorKind::GitOperation => Error::GitOperation {
            context,
            command: "mock".into(),
            stderr: "fatal: mock failure".into(),
        },
        ErrorKind::Filesystem => Error::filesystem(target, "mock failure"),
    }
}

/// Scripted state of one repository.
#[derive(Debug, Clone)]
pub struct MockRepo {
    pub merge_in_progress: bool,
    pub status: String,
    pub upstream: Option<String>,
    /// `None` makes the ahead/behind query fail
    pub ahead_behind: Option<(u32, u32)>,
    pub branch: Option<String>,
    pub remote_url: Option<String>,
    pub has_stash: bool,
    pub fetch_error: Option<ErrorKind>,
    pub pull_output: String,
    pub pull_error: Option<ErrorKind>,
}

impl MockRepo {
    /// A clean repository tracking `origin/main`, `behind` commits behind.
    pub fn behind(behind: u32) -> Self {
        Self {
            merge_in_progress: false,
            status: String::new(),
            upstream: Some("origin/main".into()),
            ahead_behind: Some((0, behind)),
            branch: Some("main".into()),
            remote_url: Some("https://github.com/acme/repo.git".into()),
            has_stash: false,
            fetch_error: None,
            pull_output: if behind == 0 {
                "Already up to date.".into()
            } else {
                "Updating 1a2b3c4..5d6e7f8\nFast-forward\n".into()
            },
            pull_error: None,
        }
    }
}

#[derive(Default)]
pub struct MockGit {
    repos: Mutex<HashMap<PathBuf, MockRepo>>,
    clone_failures: Mutex<HashMap<String, VecDeque<ErrorKind>>>,
    calls: Mutex<Vec<(String, String)>>,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    clones: AtomicUsize,
    cancel_after: Option<(usize, CancelToken)>,
}

impl MockGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_repo(self, path: &Path, repo: MockRepo) -> Self {
        self.add_repo(path, repo);
        self
    }

    /// Make mutating operations take `delay`, so overlap can be observed.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the next clones of `url` with these kinds, in order.
    pub fn with_clone_failures(self, url: &str, kinds: &[ErrorKind]) -> Self {
        self.clone_failures
            .lock()
            .unwrap()
            .insert(url.to_string(), kinds.iter().copied().collect());
        self
    }

    /// Trip `cancel` once `n` clones have succeeded.
    pub fn with_cancel_after(mut self, n: usize, cancel: CancelToken) -> Self {
        self.cancel_after = Some((n, cancel));
        self
    }

    pub fn add_repo(&self, path: &Path, repo: MockRepo) {
        self.repos.lock().unwrap().insert(path.to_path_buf(), repo);
    }

    pub fn calls_of(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| o == op)
            .count()
    }

    pub fn targets_of(&self, op: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(o, _)| o == op)
            .map(|(_, t)| t.clone())
            .collect()
    }

    /// Highest number of mutating operations observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, op: &str, target: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((op.to_string(), target.to_string()));
    }

    fn busy(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn repo(&self, path: &Path) -> Result<MockRepo> {
        self.repos
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::filesystem(path, "not a git repository"))
    }
}

impl GitRunner for MockGit {
    fn current_branch(&self, repo: &Path) -> Result<Option<String>> {
        Ok(self.repo(repo)?.branch)
    }

    fn remote_url(&self, repo: &Path) -> Result<Option<String>> {
        Ok(self.repo(repo).ok().and_then(|r| r.remote_url))
    }

    fn status(&self, repo: &Path) -> Result<String> {
        Ok(self.repo(repo)?.status)
    }

    fn upstream(&self, repo: &Path) -> Result<Option<String>> {
        Ok(self.repo(repo)?.upstream)
    }

    fn fetch_remote(&self, repo: &Path, _timeout: Duration) -> Result<()> {
        self.record("fetch", &repo.display().to_string());
        match self.repo(repo)?.fetch_error {
            Some(kind) => Err(error_of(kind, &repo.display().to_string())),
            None => Ok(()),
        }
    }

    fn ahead_behind(&self, repo: &Path) -> Result<(u32, u32)> {
        self.repo(repo)?.ahead_behind.ok_or_else(|| {
            error_of(ErrorKind::GitOperation, &repo.display().to_string())
        })
    }

    fn merge_in_progress(&self, repo: &Path) -> Result<bool> {
        Ok(self.repo(repo)?.merge_in_progress)
    }

    fn pull_rebase(&self, repo: &Path) -> Result<String> {
        self.record("pull-rebase", &repo.display().to_string());
        self.busy();
        let state = self.repo(repo)?;
        match state.pull_error {
            Some(kind) => Err(error_of(kind, &repo.display().to_string())),
            None => Ok(state.pull_output),
        }
    }

    fn pull(&self, repo: &Path) -> Result<String> {
        self.record("pull", &repo.display().to_string());
        self.busy();
        let state = self.repo(repo)?;
        match state.pull_error {
            Some(kind) => Err(error_of(kind, &repo.display().to_string())),
            None => Ok(state.pull_output),
        }
    }

    fn has_stash(&self, repo: &Path) -> Result<bool> {
        Ok(self.repo(repo)?.has_stash)
    }

    fn clone_repo(&self, url: &str, dest: &Path, _options: &CloneOptions) -> Result<()> {
        self.record("clone", url);
        self.busy();
        let failure = self
            .clone_failures
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|q| q.pop_front());
        if let Some(kind) = failure {
            return Err(error_of(kind, url));
        }
        fs::create_dir_all(dest.join(".git"))?;
        self.add_repo(
            dest,
            MockRepo {
                remote_url: Some(url.to_string()),
                ..MockRepo::behind(0)
            },
        );
        let done = self.clones.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((n, cancel)) = &self.cancel_after {
            if done >= *n {
                cancel.cancel();
            }
        }
        Ok(())
    }

    fn reset_hard(&self, repo: &Path, target: &str) -> Result<()> {
        self.record("reset", &format!("{} {}", repo.display(), target));
        self.busy();
        Ok(())
    }

    fn fetch_all(&self, repo: &Path) -> Result<()> {
        self.record("fetch-all", &repo.display().to_string());
        match self.repo(repo)?.fetch_error {
            Some(kind) => Err(error_of(kind, &repo.display().to_string())),
            None => Ok(()),
        }
    }

    fn clone_mirror(&self, url: &str, dest: &Path) -> Result<()> {
        self.record("clone-mirror", url);
        fs::create_dir_all(dest)?;
        Ok(())
    }
}

/// [`ProviderClient`] that fails its next listing calls with scripted
/// kinds before delegating to a [`ListingProvider`].
pub struct FlakyProvider {
    inner: ListingProvider,
    failures: Mutex<VecDeque<ErrorKind>>,
    calls: AtomicUsize,
}

impl FlakyProvider {
    pub fn new(inner: ListingProvider, kinds: &[ErrorKind]) -> Self {
        Self {
            inner,
            failures: Mutex::new(kinds.iter().copied().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `list_repositories` calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ProviderClient for FlakyProvider {
    fn kind(&self) -> ProviderKind {
        self.inner.kind()
    }

    fn list_repositories(&self, organization: &str, page: u32) -> Result<RepoPage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = self.failures.lock().unwrap().pop_front() {
            return Err(error_of(kind, organization));
        }
        self.inner.list_repositories(organization, page)
    }

    fn get_repository(&self, full_name: &str) -> Result<RepoSummary> {
        self.inner.get_repository(full_name)
    }
}
