//! # Safety Classifier
//!
//! Decides whether a local repository may be updated automatically.
//!
//! The checks run in a fixed order and the first match wins:
//!
//! 1. a merge or rebase is in progress → [`SafetyState::MergeInProgress`]
//! 2. the working tree has uncommitted changes → [`SafetyState::Dirty`]
//! 3. the branch has no upstream → [`SafetyState::NoUpstream`]
//! 4. remote refs are refreshed (unless disabled; a failed fetch only logs a
//!    warning) and ahead/behind counts are computed
//! 5. nothing to pull → [`SafetyState::UpToDate`]
//! 6. local and remote have both moved → [`SafetyState::Conflicts`]
//! 7. otherwise → [`SafetyState::Safe`]
//!
//! States are computed fresh on every call; nothing is cached.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::git::GitRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyState {
    MergeInProgress,
    Dirty,
    NoUpstream,
    UpToDate,
    Conflicts,
    Safe,
}

impl fmt::Display for SafetyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SafetyState::MergeInProgress => "merge-in-progress",
            SafetyState::Dirty => "dirty",
            SafetyState::NoUpstream => "no-upstream",
            SafetyState::UpToDate => "up-to-date",
            SafetyState::Conflicts => "conflicts",
            SafetyState::Safe => "safe",
        };
        f.write_str(s)
    }
}

/// A safety state together with the facts gathered while computing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: SafetyState,
    pub branch: Option<String>,
    pub remote_url: Option<String>,
    pub upstream: Option<String>,
    pub ahead: u32,
    pub behind: u32,
    pub has_stash: bool,
}

impl Classification {
    fn new(state: SafetyState) -> Self {
        Self {
            state,
            branch: None,
            remote_url: None,
            upstream: None,
            ahead: 0,
            behind: 0,
            has_stash: false,
        }
    }

    /// Human-readable explanation used as the result message.
    pub fn describe(&self) -> String {
        match self.state {
            SafetyState::MergeInProgress => "merge or rebase in progress".to_string(),
            SafetyState::Dirty => "uncommitted changes".to_string(),
            SafetyState::NoUpstream => "no upstream branch configured".to_string(),
            SafetyState::UpToDate => "already up to date".to_string(),
            SafetyState::Conflicts => format!(
                "diverged from upstream ({} ahead, {} behind)",
                self.ahead, self.behind
            ),
            SafetyState::Safe => format!("{} commit(s) behind upstream", self.behind),
        }
    }
}

/// Runs the ordered safety checks against one repository.
pub struct Classifier<'a> {
    git: &'a dyn GitRunner,
    no_fetch: bool,
    fetch_timeout: Duration,
}

impl<'a> Classifier<'a> {
    pub fn new(git: &'a dyn GitRunner) -> Self {
        Self {
            git,
            no_fetch: false,
            fetch_timeout: defaults::FETCH_TIMEOUT,
        }
    }

    /// Skip refreshing remote refs and classify on local data only.
    pub fn with_no_fetch(mut self, no_fetch: bool) -> Self {
        self.no_fetch = no_fetch;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn classify(&self, repo: &Path) -> Result<Classification> {
        let mut c = self.facts(repo);

        if self.git.merge_in_progress(repo)? {
            c.state = SafetyState::MergeInProgress;
            return Ok(c);
        }

        if !self.git.status(repo)?.trim().is_empty() {
            c.state = SafetyState::Dirty;
            return Ok(c);
        }

        c.upstream = self.git.upstream(repo)?;
        if c.upstream.is_none() {
            c.state = SafetyState::NoUpstream;
            return Ok(c);
        }

        if !self.no_fetch {
            match self.git.fetch_remote(repo, self.fetch_timeout) {
                Ok(()) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) => warn!(
                    "fetch failed for {}, classifying on stale refs: {}",
                    repo.display(),
                    e
                ),
            }
        }

        let (ahead, behind) = self.git.ahead_behind(repo)?;
        c.ahead = ahead;
        c.behind = behind;
        c.state = if behind == 0 {
            SafetyState::UpToDate
        } else if ahead > 0 {
            SafetyState::Conflicts
        } else {
            SafetyState::Safe
        };
        debug!("{}: {}", repo.display(), c.state);
        Ok(c)
    }

    /// Branch, remote and stash are informational; a failing query leaves
    /// the field empty.
    fn facts(&self, repo: &Path) -> Classification {
        let mut c = Classification::new(SafetyState::Safe);
        c.branch = self.git.current_branch(repo).ok().flatten();
        c.remote_url = self.git.remote_url(repo).ok().flatten();
        c.has_stash = self.git.has_stash(repo).unwrap_or(false);
        c
    }
}
