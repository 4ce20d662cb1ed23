//! # Provider Client
//!
//! The engine only needs two capabilities from a hosting provider: paging
//! through an organization's repositories and looking up a single
//! repository. [`ProviderClient`] is that seam. Creating, deleting and
//! archiving repositories belong to a separate command layer and are not
//! part of this trait.
//!
//! [`ListingProvider`] serves a YAML listing file. It backs the CLI's
//! `--listing` flag and the tests:
//!
//! ```yaml
//! organizations:
//!   acme:
//!     - name: api
//!       clone_url: https://github.com/acme/api.git
//!       private: true
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::defaults;
use crate::error::{Error, Result};
use crate::retry::{self, RetryPolicy, Sleeper};

/// Hosting providers a fleet can be synchronized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Github,
    Gitlab,
    Gitea,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Github => "github",
            ProviderKind::Gitlab => "gitlab",
            ProviderKind::Gitea => "gitea",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(ProviderKind::Github),
            "gitlab" => Ok(ProviderKind::Gitlab),
            "gitea" => Ok(ProviderKind::Gitea),
            other => Err(Error::validation_with_hint(
                format!("unknown provider '{}'", other),
                "Use one of: github, gitlab, gitea",
            )),
        }
    }
}

/// One repository as reported by a provider listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSummary {
    pub name: String,
    pub clone_url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub fork: bool,
}

/// One page of a repository listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoPage {
    pub repositories: Vec<RepoSummary>,
    /// Page to request next, `None` after the last page
    pub next_page: Option<u32>,
}

/// Read-only view of a hosting provider.
pub trait ProviderClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Fetch page `page` (1-based) of `organization`'s repositories.
    fn list_repositories(&self, organization: &str, page: u32) -> Result<RepoPage>;

    /// Look up `organization/name`.
    fn get_repository(&self, full_name: &str) -> Result<RepoSummary>;
}

/// Lazily walks a listing page by page, so callers never hold more than
/// one page they have not consumed yet.
pub struct Pages<'a> {
    client: &'a dyn ProviderClient,
    organization: String,
    next: Option<u32>,
    backoff: Option<Backoff<'a>>,
}

/// Retry settings for listing calls.
struct Backoff<'a> {
    policy: RetryPolicy,
    sleeper: &'a dyn Sleeper,
    cancel: CancelToken,
}

impl<'a> Pages<'a> {
    /// Retry throttled or failed page requests under `policy` instead of
    /// ending the walk on the first retryable error.
    pub fn with_retry(
        mut self,
        policy: RetryPolicy,
        sleeper: &'a dyn Sleeper,
        cancel: CancelToken,
    ) -> Self {
        self.backoff = Some(Backoff {
            policy,
            sleeper,
            cancel,
        });
        self
    }

    pub fn kind(&self) -> ProviderKind {
        self.client.kind()
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    /// Collect every remaining page.
    pub fn collect_all(self) -> Result<Vec<RepoSummary>> {
        let mut all = Vec::new();
        for page in self {
            all.extend(page?);
        }
        Ok(all)
    }

    fn fetch(&self, page: u32) -> Result<RepoPage> {
        let Some(backoff) = &self.backoff else {
            return self.client.list_repositories(&self.organization, page);
        };
        let attempted = retry::retry(&backoff.policy, backoff.sleeper, &backoff.cancel, |_| {
            self.client.list_repositories(&self.organization, page)
        });
        if attempted.attempts > 1 && attempted.result.is_ok() {
            debug!(
                "listing page {} of {} succeeded after {} attempts",
                page, self.organization, attempted.attempts
            );
        }
        attempted.result
    }
}

impl Iterator for Pages<'_> {
    type Item = Result<Vec<RepoSummary>>;

    fn next(&mut self) -> Option<Self::Item> {
        let page = self.next?;
        match self.fetch(page) {
            Ok(p) => {
                self.next = p.next_page;
                Some(Ok(p.repositories))
            }
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}

pub fn pages<'a>(client: &'a dyn ProviderClient, organization: &str) -> Pages<'a> {
    Pages {
        client,
        organization: organization.to_string(),
        next: Some(1),
        backoff: None,
    }
}

/// Collect every page of `organization`'s listing without retries.
pub fn list_all(client: &dyn ProviderClient, organization: &str) -> Result<Vec<RepoSummary>> {
    pages(client, organization).collect_all()
}

#[derive(Debug, Deserialize)]
struct ListingFile {
    #[serde(default)]
    organizations: BTreeMap<String, Vec<RepoSummary>>,
}

/// [`ProviderClient`] backed by a static listing.
#[derive(Debug, Clone)]
pub struct ListingProvider {
    kind: ProviderKind,
    organizations: BTreeMap<String, Vec<RepoSummary>>,
    page_size: usize,
}

impl ListingProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            organizations: BTreeMap::new(),
            page_size: defaults::LISTING_PAGE_SIZE,
        }
    }

    pub fn from_yaml_str(kind: ProviderKind, content: &str) -> Result<Self> {
        let file: ListingFile = serde_yaml::from_str(content)?;
        Ok(Self {
            organizations: file.organizations,
            ..Self::new(kind)
        })
    }

    pub fn from_file(kind: ProviderKind, path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::validation_with_hint(
                format!("cannot read listing {}: {}", path.display(), e),
                "Pass an existing file to --listing",
            )
        })?;
        Self::from_yaml_str(kind, &content)
    }

    pub fn with_organization(mut self, organization: &str, repos: Vec<RepoSummary>) -> Self {
        self.organizations.insert(organization.to_string(), repos);
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn organization(&self, organization: &str) -> Result<&Vec<RepoSummary>> {
        self.organizations.get(organization).ok_or_else(|| {
            Error::validation(format!(
                "organization '{}' not found on {}",
                organization, self.kind
            ))
        })
    }
}

impl ProviderClient for ListingProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn list_repositories(&self, organization: &str, page: u32) -> Result<RepoPage> {
        if page == 0 {
            return Err(Error::validation("pages are numbered from 1"));
        }
        let repos = self.organization(organization)?;
        let start = (page as usize - 1).saturating_mul(self.page_size);
        let end = start.saturating_add(self.page_size).min(repos.len());
        let repositories = repos.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next_page = (end < repos.len()).then_some(page + 1);
        Ok(RepoPage {
            repositories,
            next_page,
        })
    }

    fn get_repository(&self, full_name: &str) -> Result<RepoSummary> {
        let (org, name) = full_name.split_once('/').ok_or_else(|| {
            Error::validation(format!("expected organization/name, got '{}'", full_name))
        })?;
        self.organization(org)?
            .iter()
            .find(|r| r.name == name)
            .cloned()
            .ok_or_else(|| Error::validation(format!("repository '{}' not found", full_name)))
    }
}

#[cfg(test)]
pub(crate) fn summary(name: &str) -> RepoSummary {
    RepoSummary {
        name: name.to_string(),
        clone_url: format!("https://github.com/acme/{}.git", name),
        description: String::new(),
        private: false,
        archived: false,
        fork: false,
    }
}
