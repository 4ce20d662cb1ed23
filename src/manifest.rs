//! # Manifest Store
//!
//! The manifest is the authoritative list of an organization's repositories
//! for one sync target. It is written into the target directory as
//! `fleet.yaml`:
//!
//! ```yaml
//! organization: acme
//! provider: github
//! generated_at: 2026-01-01T00:00:00Z
//! sync_mode:
//!   cleanup_orphans: false
//! repositories:
//!   - name: api
//!     clone_url: https://github.com/acme/api.git
//!     description: ""
//!     private: true
//!     archived: false
//!     fork: false
//! ```
//!
//! Every repository lives in the immediate subdirectory of the target named
//! after it, so a name must be a single plain path component. Orphans are
//! immediate subdirectories of the target whose name is not in the
//! manifest. The manifest file itself and dot-entries are never orphans.
//! Removing orphans is irreversible and only happens on explicit request.

use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};
use crate::provider::{Pages, ProviderKind, RepoSummary};
use crate::session::write_atomic;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMode {
    #[serde(default)]
    pub cleanup_orphans: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub organization: String,
    pub provider: ProviderKind,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub repositories: Vec<RepoSummary>,
}

impl Manifest {
    pub fn new(
        provider: ProviderKind,
        organization: &str,
        cleanup_orphans: bool,
        repositories: Vec<RepoSummary>,
    ) -> Self {
        Self {
            organization: organization.to_string(),
            provider,
            generated_at: Utc::now(),
            sync_mode: SyncMode { cleanup_orphans },
            repositories,
        }
    }

    pub fn names(&self) -> HashSet<String> {
        self.repositories.iter().map(|r| r.name.clone()).collect()
    }
}

/// When an existing manifest may stand in for a fresh provider listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReusePolicy {
    /// Reuse whenever the organization and provider match
    #[default]
    Always,
    /// Always list the provider again
    Never,
    /// Reuse only manifests younger than this
    MaxAge(Duration),
}

impl ReusePolicy {
    fn allows(&self, manifest: &Manifest, now: DateTime<Utc>) -> bool {
        match self {
            ReusePolicy::Always => true,
            ReusePolicy::Never => false,
            ReusePolicy::MaxAge(max) => {
                let age = now.signed_duration_since(manifest.generated_at);
                age.to_std().is_ok_and(|age| age <= *max)
            }
        }
    }
}

/// Reads and writes the manifest of one sync target.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(target: &Path) -> Self {
        Self {
            path: target.join(defaults::MANIFEST_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Manifest>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.path).map_err(|e| self.error(e))?;
        let manifest = serde_yaml::from_str(&content).map_err(|e| self.error(e))?;
        Ok(Some(manifest))
    }

    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        let yaml = serde_yaml::to_string(manifest).map_err(|e| self.error(e))?;
        write_atomic(&self.path, yaml.as_bytes()).map_err(|e| self.error(e))?;
        debug!("wrote manifest {}", self.path.display());
        Ok(())
    }

    /// The existing manifest, if `policy` allows reusing it for
    /// `provider`/`organization`.
    pub fn reusable(
        &self,
        provider: ProviderKind,
        organization: &str,
        policy: ReusePolicy,
    ) -> Result<Option<Manifest>> {
        if policy == ReusePolicy::Never {
            return Ok(None);
        }
        let Some(existing) = self.load()? else {
            return Ok(None);
        };
        if existing.organization != organization || existing.provider != provider {
            warn!(
                "manifest {} belongs to {}/{}, regenerating",
                self.path.display(),
                existing.provider,
                existing.organization
            );
            return Ok(None);
        }
        if !policy.allows(&existing, Utc::now()) {
            debug!("manifest {} is stale, regenerating", self.path.display());
            return Ok(None);
        }
        Ok(Some(existing))
    }

    /// Reuse the existing manifest or walk `listing` and build a new one.
    /// A new manifest is written only when `persist` is set. Returns the
    /// manifest and whether it was reused.
    pub fn load_or_fetch(
        &self,
        listing: Pages<'_>,
        cleanup_orphans: bool,
        policy: ReusePolicy,
        persist: bool,
    ) -> Result<(Manifest, bool)> {
        let kind = listing.kind();
        let organization = listing.organization().to_string();
        if let Some(existing) = self.reusable(kind, &organization, policy)? {
            info!(
                "reusing manifest with {} repositories",
                existing.repositories.len()
            );
            return Ok((existing, true));
        }
        let repositories = listing.collect_all()?;
        let manifest = Manifest::new(kind, &organization, cleanup_orphans, repositories);
        if persist {
            self.save(&manifest)?;
        }
        Ok((manifest, false))
    }

    fn error(&self, e: impl std::fmt::Display) -> Error {
        Error::Manifest {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

fn is_reserved(name: &str) -> bool {
    name == defaults::MANIFEST_FILE || name == ".git" || name.starts_with('.')
}

/// The directory that holds repository `name` inside `target`.
///
/// Names come from the provider and are refused unless they are one plain
/// path component: no separators, no `.` or `..`, not absolute, and not
/// the manifest file or the state directory.
pub fn repository_dir(target: &Path, name: &str) -> Result<PathBuf> {
    let mut components = Path::new(name).components();
    let single = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == name
    );
    let reserved = name == defaults::MANIFEST_FILE || name == defaults::STATE_DIR;
    if !single || reserved || name.contains(['/', '\\']) {
        return Err(Error::filesystem(
            target,
            format!(
                "repository name {:?} is not a plain directory name; entry ignored",
                name
            ),
        ));
    }
    Ok(target.join(name))
}

/// Immediate subdirectories of `target` whose names are not in `names`,
/// sorted. A missing target has no orphans.
pub fn compute_orphans(target: &Path, names: &HashSet<String>) -> Result<Vec<PathBuf>> {
    if !target.exists() {
        return Ok(Vec::new());
    }
    let mut orphans = Vec::new();
    for entry in fs::read_dir(target).map_err(|e| Error::filesystem(target, e))? {
        let entry = entry.map_err(|e| Error::filesystem(target, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_reserved(&name) || names.contains(&name) {
            continue;
        }
        // file_type does not follow symlinks, so a link to a directory is
        // left alone.
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            orphans.push(entry.path());
        }
    }
    orphans.sort();
    Ok(orphans)
}

/// Recursively and irreversibly delete `orphans`.
pub fn remove_orphans(orphans: &[PathBuf]) -> Result<()> {
    for path in orphans {
        info!("removing orphan {}", path.display());
        fs::remove_dir_all(path).map_err(|e| Error::filesystem(path, e))?;
    }
    Ok(())
}
