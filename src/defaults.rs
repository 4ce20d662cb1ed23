//! Default values for repo-fleet options.
//!
//! This module provides centralized default values used by the library
//! option structs and the CLI, ensuring consistency and avoiding
//! duplication.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Worker count for the local bulk-update path.
pub const BULK_WORKERS: usize = 5;

/// Maximum directory depth scanned by the locator.
pub const MAX_SCAN_DEPTH: usize = 10;

/// Worker count for the clone/sync path.
pub const SYNC_WORKERS: usize = 10;

/// Retries for retryable failures on the clone/sync path.
pub const MAX_RETRIES: u32 = 3;

/// Bound on the `git fetch` run during classification.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Bound on any other single git invocation (clone, pull, reset).
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(600);

/// First retry delay; doubled on every further attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Ceiling on the retry delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

/// Page size served by the listing provider.
pub const LISTING_PAGE_SIZE: usize = 100;

/// Name of the manifest written into a sync target.
pub const MANIFEST_FILE: &str = "fleet.yaml";

/// Directory (inside a sync target) holding tool state.
pub const STATE_DIR: &str = ".repo-fleet";

/// Directory names the locator never descends into.
pub const IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    "target",
    "build",
    "dist",
    ".gradle",
    ".idea",
    ".vscode",
    "vendor",
    "deps",
    ".next",
    ".nuxt",
    "coverage",
];

/// Returns the default ignore list as owned strings.
pub fn ignored_dirs() -> Vec<String> {
    IGNORED_DIRS.iter().map(|s| s.to_string()).collect()
}

/// Returns the directory resume sessions are stored in for `target`.
pub fn state_dir(target: &Path) -> PathBuf {
    target.join(STATE_DIR).join("state")
}
