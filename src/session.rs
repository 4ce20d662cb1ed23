//! # Resume Sessions
//!
//! A sync run records every repository's lifecycle state in a session file
//! so an interrupted run can be continued:
//!
//! ```text
//! Pending → InProgress → Succeeded | Failed | Skipped
//! ```
//!
//! The file lives at `<target>/.repo-fleet/state/<provider>-<org>.json`.
//! It is read once when the run starts and rewritten after every terminal
//! transition. Writes go to a temporary file in the same directory which is
//! then renamed over the old one, so a killed process never leaves a
//! half-written session behind.
//!
//! A resumed run must use the same provider, organization, target and
//! strategy as the run that created the session. Worker count and retry
//! count may change.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::config::{Strategy, SyncOptions};
use crate::defaults;
use crate::error::{Error, Result};
use crate::provider::ProviderKind;

/// Write `bytes` to `path` through a temporary file and a rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl RepoState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RepoState::Succeeded | RepoState::Failed | RepoState::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoEntry {
    pub status: RepoState,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Run options recorded with a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    pub workers: usize,
    pub max_retries: u32,
    #[serde(default)]
    pub depth: Option<u32>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub cleanup_orphans: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub mirror: bool,
}

impl OptionsSnapshot {
    pub fn of(options: &SyncOptions) -> Self {
        Self {
            workers: options.workers,
            max_retries: options.retry.max_retries,
            depth: options.clone.depth,
            branch: options.clone.branch.clone(),
            cleanup_orphans: options.cleanup_orphans,
            streaming: options.streaming,
            force: options.force,
            mirror: options.mirror,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub resume_token: String,
    pub provider: ProviderKind,
    pub organization: String,
    pub target: PathBuf,
    pub strategy: Strategy,
    pub options: OptionsSnapshot,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub repos: BTreeMap<String, RepoEntry>,
}

impl SessionState {
    pub fn new(options: &SyncOptions) -> Self {
        let now = Utc::now();
        Self {
            resume_token: uuid::Uuid::new_v4().to_string(),
            provider: options.provider,
            organization: options.organization.clone(),
            target: options.target.clone(),
            strategy: options.strategy,
            options: OptionsSnapshot::of(options),
            started_at: now,
            updated_at: now,
            repos: BTreeMap::new(),
        }
    }

    pub fn count(&self, state: RepoState) -> usize {
        self.repos.values().filter(|e| e.status == state).count()
    }

    /// Every tracked repository succeeded or was skipped.
    pub fn is_complete(&self) -> bool {
        self.repos
            .values()
            .all(|e| matches!(e.status, RepoState::Succeeded | RepoState::Skipped))
    }
}

/// Path of the session file for `provider`/`organization` under `target`.
pub fn session_path(target: &Path, provider: ProviderKind, organization: &str) -> PathBuf {
    defaults::state_dir(target).join(format!("{}-{}.json", provider, organization))
}

/// Read a session file, `None` if there is none.
pub fn load_session(path: &Path) -> Result<Option<SessionState>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|e| state_error(path, e, None))?;
    let state = serde_json::from_str(&content).map_err(|e| {
        state_error(
            path,
            e,
            Some("The session file is corrupt; remove it with `repo-fleet state clear`"),
        )
    })?;
    Ok(Some(state))
}

fn state_error(path: &Path, e: impl std::fmt::Display, hint: Option<&str>) -> Error {
    Error::State {
        path: path.to_path_buf(),
        message: e.to_string(),
        hint: hint.map(str::to_string),
    }
}

/// Owns the session of one run. All writes go through here.
#[derive(Debug)]
pub struct SessionStore {
    path: PathBuf,
    state: Mutex<SessionState>,
    persist: bool,
    resumed: bool,
}

impl SessionStore {
    /// Start or resume the session for `options`.
    ///
    /// Without `resume`, an existing session is an error: silently starting
    /// over would discard its progress. With `resume`, the stored session
    /// must match provider, organization, target and strategy. A missing
    /// session with `resume` simply starts a new one.
    ///
    /// Dry runs read the session but never write it.
    pub fn open(options: &SyncOptions) -> Result<Self> {
        let path = session_path(&options.target, options.provider, &options.organization);
        let persist = !options.dry_run;
        let existing = load_session(&path)?;

        let (state, resumed) = match (existing, options.resume) {
            (Some(_), false) if persist => {
                return Err(Error::State {
                    path,
                    message: "a previous run was interrupted".to_string(),
                    hint: Some(
                        "Pass --resume to continue it, or run `repo-fleet state clear` to start over"
                            .to_string(),
                    ),
                })
            }
            (Some(_), false) => (SessionState::new(options), false),
            (Some(mut stored), true) => {
                check_compatible(&path, &stored, options)?;
                apply_overrides(&mut stored, options);
                info!(
                    "resuming session {} ({} of {} succeeded)",
                    stored.resume_token,
                    stored.count(RepoState::Succeeded),
                    stored.repos.len()
                );
                (stored, true)
            }
            (None, _) => (SessionState::new(options), false),
        };

        let store = Self {
            path,
            state: Mutex::new(state),
            persist,
            resumed,
        };
        store.save()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn resumed(&self) -> bool {
        self.resumed
    }

    pub fn snapshot(&self) -> Result<SessionState> {
        Ok(self.lock()?.clone())
    }

    /// Whether a previous run already finished `identity` successfully.
    pub fn succeeded(&self, identity: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .repos
            .get(identity)
            .is_some_and(|e| e.status == RepoState::Succeeded))
    }

    /// Register repositories about to be scheduled. Entries that are already
    /// tracked keep their attempt counts but go back to `Pending`.
    pub fn register<'i>(&self, identities: impl IntoIterator<Item = &'i str>) -> Result<()> {
        {
            let mut state = self.lock()?;
            let now = Utc::now();
            for id in identities {
                let entry = state.repos.entry(id.to_string()).or_insert(RepoEntry {
                    status: RepoState::Pending,
                    attempts: 0,
                    last_error: None,
                    updated_at: now,
                });
                entry.status = RepoState::Pending;
                entry.updated_at = now;
            }
        }
        self.save()
    }

    /// Record a state change. Terminal states are persisted immediately.
    pub fn transition(
        &self,
        identity: &str,
        status: RepoState,
        attempts: u32,
        error: Option<&Error>,
    ) -> Result<()> {
        {
            let mut state = self.lock()?;
            let now = Utc::now();
            let entry = state.repos.entry(identity.to_string()).or_insert(RepoEntry {
                status,
                attempts: 0,
                last_error: None,
                updated_at: now,
            });
            entry.status = status;
            entry.attempts += attempts;
            entry.last_error = error.map(|e| e.to_string());
            entry.updated_at = now;
            state.updated_at = now;
        }
        if status.is_terminal() {
            self.save()?;
        }
        Ok(())
    }

    /// Close the session: delete the file when every repository is done,
    /// otherwise keep it for `--resume`. Returns whether it was deleted.
    pub fn finish(&self) -> Result<bool> {
        let complete = self.lock()?.is_complete();
        if complete && self.persist && self.path.exists() {
            fs::remove_file(&self.path).map_err(|e| state_error(&self.path, e, None))?;
            debug!("session complete, removed {}", self.path.display());
            return Ok(true);
        }
        if !complete {
            self.save()?;
        }
        Ok(false)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        self.state.lock().map_err(|_| Error::LockPoisoned {
            context: "session state".to_string(),
        })
    }

    /// Serialize under the lock so concurrent workers never interleave
    /// writes.
    fn save(&self) -> Result<()> {
        if !self.persist {
            return Ok(());
        }
        let state = self.lock()?;
        let json = serde_json::to_vec_pretty(&*state)?;
        write_atomic(&self.path, &json).map_err(|e| state_error(&self.path, e, None))
    }
}

fn check_compatible(path: &Path, stored: &SessionState, options: &SyncOptions) -> Result<()> {
    let mismatch = |what: &str, was: String, now: String| Error::State {
        path: path.to_path_buf(),
        message: format!(
            "cannot resume: {} was '{}' but is now '{}'",
            what, was, now
        ),
        hint: Some(format!(
            "Resume with the original {} or run `repo-fleet state clear`",
            what
        )),
    };
    if stored.provider != options.provider {
        return Err(mismatch(
            "provider",
            stored.provider.to_string(),
            options.provider.to_string(),
        ));
    }
    if stored.organization != options.organization {
        return Err(mismatch(
            "organization",
            stored.organization.clone(),
            options.organization.clone(),
        ));
    }
    if stored.target != options.target {
        return Err(mismatch(
            "target",
            stored.target.display().to_string(),
            options.target.display().to_string(),
        ));
    }
    if stored.strategy != options.strategy {
        return Err(mismatch(
            "strategy",
            stored.strategy.to_string(),
            options.strategy.to_string(),
        ));
    }
    Ok(())
}

fn apply_overrides(stored: &mut SessionState, options: &SyncOptions) {
    if stored.options.workers != options.workers {
        warn!(
            "worker count changed across resume: {} -> {}",
            stored.options.workers, options.workers
        );
        stored.options.workers = options.workers;
    }
    if stored.options.max_retries != options.retry.max_retries {
        warn!(
            "retry count changed across resume: {} -> {}",
            stored.options.max_retries, options.retry.max_retries
        );
        stored.options.max_retries = options.retry.max_retries;
    }
}

/// Delete the session for `provider`/`organization`. Returns whether one
/// existed.
pub fn clear_session(target: &Path, provider: ProviderKind, organization: &str) -> Result<bool> {
    let path = session_path(target, provider, organization);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).map_err(|e| state_error(&path, e, None))?;
    Ok(true)
}
