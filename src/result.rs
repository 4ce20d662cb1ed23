//! Per-repository results and their aggregation.
//!
//! A [`RepoResult`] is built by the worker that processed a repository and
//! is then handed to a [`ResultSet`], which accepts at most one result per
//! repository identity. Once inserted a result is only readable.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, ErrorKind, Result};
use crate::provider::ProviderKind;
use crate::safety::{Classification, SafetyState};

/// A repository known either by its local path or by its remote identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RepositoryRef {
    Local {
        path: PathBuf,
    },
    Remote {
        provider: ProviderKind,
        organization: String,
        name: String,
        clone_url: String,
    },
}

impl RepositoryRef {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        RepositoryRef::Local { path: path.into() }
    }

    /// Stable key used for de-duplication, sorting and session tracking.
    pub fn identity(&self) -> String {
        match self {
            RepositoryRef::Local { path } => path.display().to_string(),
            RepositoryRef::Remote {
                provider,
                organization,
                name,
                ..
            } => format!("{}/{}/{}", provider, organization, name),
        }
    }

    /// Short label for tables: the path, or the bare repository name.
    pub fn label(&self) -> String {
        match self {
            RepositoryRef::Local { path } => path.display().to_string(),
            RepositoryRef::Remote { name, .. } => name.clone(),
        }
    }
}

/// Final status of one repository in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RepoStatus {
    Updated,
    UpToDate,
    WouldUpdate,
    Dirty,
    Conflicts,
    NoUpstream,
    MergeInProgress,
    Cloned,
    WouldClone,
    Fetched,
    Reset,
    Skipped,
    PreviouslySynced,
    Failed,
    Cancelled,
}

impl RepoStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RepoStatus::Updated => "updated",
            RepoStatus::UpToDate => "up-to-date",
            RepoStatus::WouldUpdate => "would-update",
            RepoStatus::Dirty => "dirty",
            RepoStatus::Conflicts => "conflicts",
            RepoStatus::NoUpstream => "no-upstream",
            RepoStatus::MergeInProgress => "merge-in-progress",
            RepoStatus::Cloned => "cloned",
            RepoStatus::WouldClone => "would-clone",
            RepoStatus::Fetched => "fetched",
            RepoStatus::Reset => "reset",
            RepoStatus::Skipped => "skipped",
            RepoStatus::PreviouslySynced => "previously-synced",
            RepoStatus::Failed => "failed",
            RepoStatus::Cancelled => "cancelled",
        }
    }

    /// The status reported for a repository left alone because of its
    /// safety state.
    pub fn from_safety(state: SafetyState) -> Self {
        match state {
            SafetyState::MergeInProgress => RepoStatus::MergeInProgress,
            SafetyState::Dirty => RepoStatus::Dirty,
            SafetyState::NoUpstream => RepoStatus::NoUpstream,
            SafetyState::UpToDate => RepoStatus::UpToDate,
            SafetyState::Conflicts => RepoStatus::Conflicts,
            SafetyState::Safe => RepoStatus::WouldUpdate,
        }
    }
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The error recorded on a failed result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultError {
    pub kind: ErrorKind,
    pub message: String,
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// Outcome of processing one repository.
#[derive(Debug, Clone, Serialize)]
pub struct RepoResult {
    repository: RepositoryRef,
    status: RepoStatus,
    message: String,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remote_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ahead: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    behind: Option<u32>,
    has_stash: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ResultError>,
}

impl RepoResult {
    pub fn new(repository: RepositoryRef, status: RepoStatus, message: impl Into<String>) -> Self {
        Self {
            repository,
            status,
            message: message.into(),
            duration: Duration::ZERO,
            branch: None,
            remote_url: None,
            ahead: None,
            behind: None,
            has_stash: false,
            error: None,
        }
    }

    pub fn failed(repository: RepositoryRef, error: &Error) -> Self {
        Self::new(repository, RepoStatus::Failed, error.to_string()).with_error(error)
    }

    pub fn cancelled(repository: RepositoryRef) -> Self {
        Self::new(repository, RepoStatus::Cancelled, "not started: run cancelled")
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_error(mut self, error: &Error) -> Self {
        self.error = Some(ResultError {
            kind: error.kind(),
            message: error.to_string(),
        });
        self
    }

    /// Copy the facts gathered by the safety classifier.
    pub fn with_classification(mut self, c: &Classification) -> Self {
        self.branch = c.branch.clone();
        self.remote_url = c.remote_url.clone();
        self.ahead = Some(c.ahead);
        self.behind = Some(c.behind);
        self.has_stash = c.has_stash;
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_remote_url(mut self, url: Option<String>) -> Self {
        self.remote_url = url;
        self
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    pub fn status(&self) -> RepoStatus {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn remote_url(&self) -> Option<&str> {
        self.remote_url.as_deref()
    }

    pub fn ahead(&self) -> Option<u32> {
        self.ahead
    }

    pub fn behind(&self) -> Option<u32> {
        self.behind
    }

    pub fn has_stash(&self) -> bool {
        self.has_stash
    }

    pub fn error(&self) -> Option<&ResultError> {
        self.error.as_ref()
    }
}

/// Append-only, lock-guarded collection holding one result per identity.
#[derive(Debug, Default)]
pub struct ResultSet {
    inner: Mutex<ResultSetInner>,
}

#[derive(Debug, Default)]
struct ResultSetInner {
    results: Vec<RepoResult>,
    seen: HashSet<String>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a result. A second result for the same identity is rejected and
    /// the first one is kept.
    pub fn insert(&self, result: RepoResult) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned {
            context: "result set".to_string(),
        })?;
        let identity = result.repository.identity();
        if !inner.seen.insert(identity.clone()) {
            return Err(Error::validation(format!(
                "duplicate result for {}",
                identity
            )));
        }
        inner.results.push(result);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.results.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the set, returning results sorted by identity.
    pub fn into_sorted(self) -> Result<Vec<RepoResult>> {
        let inner = self.inner.into_inner().map_err(|_| Error::LockPoisoned {
            context: "result set".to_string(),
        })?;
        let mut results = inner.results;
        sort_results(&mut results);
        Ok(results)
    }
}

pub fn sort_results(results: &mut [RepoResult]) {
    results.sort_by_key(|r| r.repository.identity());
}

/// Counts per status for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub counts: BTreeMap<RepoStatus, usize>,
}

impl Summary {
    pub fn from_results(results: &[RepoResult]) -> Self {
        let mut counts = BTreeMap::new();
        for r in results {
            *counts.entry(r.status).or_insert(0) += 1;
        }
        Self {
            total: results.len(),
            counts,
        }
    }

    pub fn count(&self, status: RepoStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn failed(&self) -> usize {
        self.count(RepoStatus::Failed)
    }
}
