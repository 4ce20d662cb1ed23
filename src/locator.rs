//! # Repository Locator
//!
//! Scans a directory tree for local Git repositories.
//!
//! ## Rules
//!
//! - The walk stops at `max_depth` (the root is depth 0).
//! - A directory with a `.git` entry (directory or gitfile) is reported and
//!   never descended into, so nested repositories are not discovered.
//! - Directories whose name is on the ignore list are skipped with their
//!   whole subtree. The root itself is never skipped.
//! - Symbolic links are not followed; unreadable directories are skipped.
//! - Include/exclude regexes run after the walk, against both the absolute
//!   and the root-relative path. A pattern that fails to compile is dropped
//!   with a warning instead of aborting the scan.
//!
//! The result is sorted so that every run reports the same order.

use std::path::{Path, PathBuf};

use log::{debug, warn};
use regex::Regex;
use walkdir::{DirEntry, WalkDir};

use crate::defaults;
use crate::error::{Error, Result};
use crate::git;

/// Scan parameters for [`locate`].
#[derive(Debug, Clone)]
pub struct LocatorOptions {
    pub max_depth: usize,
    /// Directory names skipped entirely
    pub ignore: Vec<String>,
    /// Keep only repositories whose path matches
    pub include: Option<String>,
    /// Drop repositories whose path matches
    pub exclude: Option<String>,
}

impl Default for LocatorOptions {
    fn default() -> Self {
        Self {
            max_depth: defaults::MAX_SCAN_DEPTH,
            ignore: defaults::ignored_dirs(),
            include: None,
            exclude: None,
        }
    }
}

/// Return the sorted repository roots under `root`.
pub fn locate(root: &Path, options: &LocatorOptions) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        return Err(Error::validation_with_hint(
            format!("scan root {} is not a directory", root.display()),
            "Pass an existing directory to scan",
        ));
    }

    let mut found = walk(root, options);

    let include = compile_filter(options.include.as_deref(), "include");
    let exclude = compile_filter(options.exclude.as_deref(), "exclude");
    found.retain(|path| {
        let relative = path.strip_prefix(root).unwrap_or(path);
        if let Some(re) = &include {
            if !matches_either(re, path, relative) {
                return false;
            }
        }
        if let Some(re) = &exclude {
            if matches_either(re, path, relative) {
                return false;
            }
        }
        true
    });

    found.sort();
    debug!("located {} repositories under {}", found.len(), root.display());
    Ok(found)
}

fn walk(root: &Path, options: &LocatorOptions) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut entries = WalkDir::new(root)
        .follow_links(false)
        .max_depth(options.max_depth)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_ignored(e, &options.ignore));

    while let Some(entry) = entries.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!("skipping unreadable entry: {}", err);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if git::is_repository(entry.path()) {
            found.push(entry.path().to_path_buf());
            entries.skip_current_dir();
        }
    }
    found
}

fn is_ignored(entry: &DirEntry, ignore: &[String]) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| ignore.iter().any(|i| i == name))
}

fn compile_filter(pattern: Option<&str>, label: &str) -> Option<Regex> {
    let pattern = pattern.filter(|p| !p.is_empty())?;
    match Regex::new(pattern) {
        Ok(re) => Some(re),
        Err(err) => {
            warn!("ignoring invalid {} pattern {:?}: {}", label, pattern, err);
            None
        }
    }
}

fn matches_either(re: &Regex, absolute: &Path, relative: &Path) -> bool {
    re.is_match(&absolute.to_string_lossy()) || re.is_match(&relative.to_string_lossy())
}
