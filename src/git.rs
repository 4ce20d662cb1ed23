//! # Git Command Runner
//!
//! Every git interaction of the engine goes through the [`GitRunner`] trait
//! so the classifier, scheduler and orchestrator can be exercised against
//! mock implementations. [`SystemGit`] is the production implementation: it
//! runs the `git` binary, which automatically picks up:
//!
//! - SSH keys from `~/.ssh/`
//! - Git credential helpers
//! - Personal access tokens
//! - Any authentication configured in `~/.gitconfig`
//!
//! Each invocation is bounded by a timeout and observes the run's
//! [`CancelToken`]; a child that outlives either is killed. Failed
//! invocations are mapped onto the [`ErrorKind`](crate::error::ErrorKind)
//! taxonomy by inspecting stderr once, here, so callers never match on
//! message text.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, trace};
use wait_timeout::ChildExt;

use crate::cancel::CancelToken;
use crate::defaults;
use crate::error::{Context, Error, Result};

/// Files or directories inside the git dir that mark an unfinished merge or
/// rebase.
pub const MERGE_MARKERS: &[&str] = &["MERGE_HEAD", "rebase-merge", "rebase-apply"];

/// How often a waiting subprocess is checked for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Optional knobs for `clone`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloneOptions {
    /// Shallow clone depth
    pub depth: Option<u32>,
    /// Branch to check out instead of the remote default
    pub branch: Option<String>,
}

/// The logical git operations the engine relies on.
pub trait GitRunner: Send + Sync {
    /// Current branch name, `None` when HEAD is detached.
    fn current_branch(&self, repo: &Path) -> Result<Option<String>>;

    /// URL of the `origin` remote, `None` when there is no origin.
    fn remote_url(&self, repo: &Path) -> Result<Option<String>>;

    /// `git status --porcelain` output; empty means a clean working tree.
    fn status(&self, repo: &Path) -> Result<String>;

    /// Upstream tracking ref of the current branch, `None` when unset.
    fn upstream(&self, repo: &Path) -> Result<Option<String>>;

    /// Refresh remote-tracking refs from origin within `timeout`.
    fn fetch_remote(&self, repo: &Path, timeout: Duration) -> Result<()>;

    /// `(ahead, behind)` commit counts of HEAD relative to its upstream.
    fn ahead_behind(&self, repo: &Path) -> Result<(u32, u32)>;

    /// Whether a merge or rebase is in progress.
    fn merge_in_progress(&self, repo: &Path) -> Result<bool>;

    /// `git pull --rebase`, returning combined output.
    fn pull_rebase(&self, repo: &Path) -> Result<String>;

    /// Plain merge `git pull`, returning combined output.
    fn pull(&self, repo: &Path) -> Result<String>;

    /// Whether the stash holds any entries.
    fn has_stash(&self, repo: &Path) -> Result<bool>;

    fn clone_repo(&self, url: &str, dest: &Path, options: &CloneOptions) -> Result<()>;

    /// `git reset --hard <target>`.
    fn reset_hard(&self, repo: &Path, target: &str) -> Result<()>;

    /// `git fetch --all --prune`.
    fn fetch_all(&self, repo: &Path) -> Result<()>;

    fn clone_mirror(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Captured output of a finished git process.
#[derive(Debug, Clone, Default)]
pub struct GitOutput {
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// [`GitRunner`] backed by the system `git` binary.
#[derive(Debug, Clone)]
pub struct SystemGit {
    program: PathBuf,
    timeout: Duration,
    cancel: CancelToken,
}

impl Default for SystemGit {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            timeout: defaults::OPERATION_TIMEOUT,
            cancel: CancelToken::new(),
        }
    }
}

impl SystemGit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound applied to every invocation that has no narrower timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Kill in-flight subprocesses once `cancel` trips.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Use a git binary other than the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, repo: Option<&Path>, args: &[&str], operation: &str) -> Result<GitOutput> {
        self.run_with_timeout(repo, args, operation, self.timeout)
    }

    fn run_with_timeout(
        &self,
        repo: Option<&Path>,
        args: &[&str],
        operation: &str,
        timeout: Duration,
    ) -> Result<GitOutput> {
        let mut context = Context::new(operation);
        if let Some(dir) = repo {
            context = context.with_repo(dir.display().to_string());
        }
        let command = args.join(" ");

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        trace!("git {} in {:?}", command, repo);
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Never block on an interactive credential prompt.
            .env("GIT_TERMINAL_PROMPT", "0");
        if let Some(dir) = repo {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| Error::GitOperation {
            context: context.clone(),
            command: command.clone(),
            stderr: format!("failed to spawn git: {}", e),
        })?;

        // Drain pipes on their own threads so a chatty child never blocks on
        // a full pipe while we wait for it.
        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let status = loop {
            if self.cancel.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                debug!("git {} cancelled", command);
                return Err(Error::Cancelled);
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Timeout {
                    context,
                    after: timeout,
                });
            }
            if let Some(status) = child.wait_timeout(remaining.min(POLL_INTERVAL))? {
                break status;
            }
        };

        let output = GitOutput {
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
        };

        if status.success() {
            Ok(output)
        } else {
            Err(classify_failure(context, &command, &output.stderr))
        }
    }

    /// Runs a query whose failure means "absent" rather than an error.
    fn optional(&self, repo: &Path, args: &[&str], operation: &str) -> Result<Option<String>> {
        match self.run(Some(repo), args, operation) {
            Ok(out) => {
                let value = out.stdout.trim();
                Ok((!value.is_empty()).then(|| value.to_string()))
            }
            Err(Error::GitOperation { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

impl GitRunner for SystemGit {
    fn current_branch(&self, repo: &Path) -> Result<Option<String>> {
        self.optional(repo, &["branch", "--show-current"], "current-branch")
    }

    fn remote_url(&self, repo: &Path) -> Result<Option<String>> {
        self.optional(repo, &["remote", "get-url", "origin"], "remote-url")
    }

    fn status(&self, repo: &Path) -> Result<String> {
        Ok(self
            .run(Some(repo), &["status", "--porcelain"], "status")?
            .stdout)
    }

    fn upstream(&self, repo: &Path) -> Result<Option<String>> {
        self.optional(
            repo,
            &["rev-parse", "--abbrev-ref", "--symbolic-full-name", "@{u}"],
            "upstream",
        )
    }

    fn fetch_remote(&self, repo: &Path, timeout: Duration) -> Result<()> {
        self.run_with_timeout(Some(repo), &["fetch", "--quiet"], "fetch", timeout)?;
        Ok(())
    }

    fn ahead_behind(&self, repo: &Path) -> Result<(u32, u32)> {
        let out = self.run(
            Some(repo),
            &["rev-list", "--left-right", "--count", "HEAD...@{u}"],
            "ahead-behind",
        )?;
        parse_ahead_behind(&out.stdout).ok_or_else(|| Error::GitOperation {
            context: Context::new("ahead-behind").with_repo(repo.display().to_string()),
            command: "rev-list --left-right --count HEAD...@{u}".to_string(),
            stderr: format!("unexpected output: {:?}", out.stdout.trim()),
        })
    }

    fn merge_in_progress(&self, repo: &Path) -> Result<bool> {
        let dir = git_dir(repo)?;
        Ok(MERGE_MARKERS.iter().any(|m| dir.join(m).exists()))
    }

    fn pull_rebase(&self, repo: &Path) -> Result<String> {
        Ok(self
            .run(Some(repo), &["pull", "--rebase"], "pull-rebase")?
            .combined())
    }

    fn pull(&self, repo: &Path) -> Result<String> {
        Ok(self.run(Some(repo), &["pull"], "pull")?.combined())
    }

    fn has_stash(&self, repo: &Path) -> Result<bool> {
        let out = self.run(Some(repo), &["stash", "list"], "stash-list")?;
        Ok(!out.stdout.trim().is_empty())
    }

    fn clone_repo(&self, url: &str, dest: &Path, options: &CloneOptions) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        let depth;
        let mut args = vec!["clone", "--quiet"];
        if let Some(d) = options.depth {
            depth = d.to_string();
            args.extend(["--depth", depth.as_str()]);
        }
        if let Some(branch) = &options.branch {
            args.extend(["--branch", branch.as_str()]);
        }
        // `--` keeps a listing-supplied URL from being read as an option.
        args.extend(["--", url, &*dest_str]);
        self.run(None, &args, "clone")
            .map_err(|e| e.in_repo(url))?;
        Ok(())
    }

    fn reset_hard(&self, repo: &Path, target: &str) -> Result<()> {
        self.run(Some(repo), &["reset", "--hard", target], "reset")?;
        Ok(())
    }

    fn fetch_all(&self, repo: &Path) -> Result<()> {
        self.run(Some(repo), &["fetch", "--all", "--prune", "--quiet"], "fetch")?;
        Ok(())
    }

    fn clone_mirror(&self, url: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        self.run(
            None,
            &["clone", "--mirror", "--quiet", "--", url, &*dest_str],
            "clone-mirror",
        )
        .map_err(|e| e.in_repo(url))?;
        Ok(())
    }
}

/// Map a failed invocation's stderr onto the error taxonomy.
///
/// Throttling is checked first because providers often answer it with a
/// 403, then transport failures (ssh reports "Could not read from remote
/// repository" for unreachable hosts too), then credentials.
pub fn classify_failure(context: Context, command: &str, stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    const RATE_LIMIT: &[&str] = &["rate limit", "error: 429", "429 too many requests"];
    const NETWORK: &[&str] = &[
        "could not resolve host",
        "could not resolve hostname",
        "connection refused",
        "connection timed out",
        "operation timed out",
        "connection reset",
        "network is unreachable",
        "failed to connect",
        "early eof",
        "the remote end hung up",
    ];
    const AUTH: &[&str] = &[
        "authentication failed",
        "permission denied",
        "could not read username",
        "could not read password",
        "could not read from remote repository",
        "error: 403",
        "403 forbidden",
        "access denied",
    ];

    if RATE_LIMIT.iter().any(|p| lower.contains(p)) {
        Error::RateLimit {
            context,
            message,
            retry_after: None,
        }
    } else if NETWORK.iter().any(|p| lower.contains(p)) {
        Error::Network { context, message }
    } else if AUTH.iter().any(|p| lower.contains(p)) {
        Error::Auth { context, message }
    } else {
        Error::GitOperation {
            context,
            command: command.to_string(),
            stderr: message,
        }
    }
}

/// Parse `rev-list --left-right --count` output (`"<ahead>\t<behind>"`).
pub fn parse_ahead_behind(output: &str) -> Option<(u32, u32)> {
    let mut parts = output.split_whitespace();
    let ahead = parts.next()?.parse().ok()?;
    let behind = parts.next()?.parse().ok()?;
    Some((ahead, behind))
}

/// Reduce a clone URL to `host/path` so https, ssh and scp-style forms of
/// the same repository compare equal. Credentials, ports, a trailing
/// `.git` and host case are dropped. Local paths are returned trimmed.
pub fn normalize_remote(raw: &str) -> String {
    let raw = raw.trim();
    let (host, path) = if let Ok(parsed) = url::Url::parse(raw) {
        match parsed.host_str() {
            Some(host) => (host.to_ascii_lowercase(), parsed.path().to_string()),
            None => return raw.trim_end_matches('/').to_string(),
        }
    } else if let Some((user_host, path)) = raw.split_once(':').filter(|(h, _)| !h.contains('/')) {
        let host = user_host.rsplit('@').next().unwrap_or(user_host);
        (host.to_ascii_lowercase(), path.to_string())
    } else {
        return raw.trim_end_matches('/').to_string();
    };
    let path = path.trim_matches('/');
    let path = path.strip_suffix(".git").unwrap_or(path);
    format!("{}/{}", host, path)
}

/// Whether two clone URLs point at the same repository.
pub fn same_remote(a: &str, b: &str) -> bool {
    normalize_remote(a) == normalize_remote(b)
}

/// Whether `path` has a `.git` entry (directory or gitfile).
pub fn is_repository(path: &Path) -> bool {
    path.join(".git").exists()
}

/// Resolve the git directory of a work tree, following a `.git` file's
/// `gitdir:` pointer for worktrees and submodules.
pub fn git_dir(repo: &Path) -> Result<PathBuf> {
    let dot_git = repo.join(".git");
    if dot_git.is_dir() {
        return Ok(dot_git);
    }
    if dot_git.is_file() {
        let content = fs::read_to_string(&dot_git).map_err(|e| Error::filesystem(&dot_git, e))?;
        if let Some(target) = content
            .lines()
            .find_map(|l| l.strip_prefix("gitdir:"))
            .map(str::trim)
        {
            let target = Path::new(target);
            return Ok(if target.is_absolute() {
                target.to_path_buf()
            } else {
                repo.join(target)
            });
        }
        return Err(Error::filesystem(&dot_git, "gitfile without a gitdir line"));
    }
    Err(Error::filesystem(repo, "not a git repository"))
}
