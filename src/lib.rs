//! # Repository Fleet Library
//!
//! Keeps a fleet of git repositories current. It is designed to be used by
//! the `repo-fleet` command-line tool but every piece can be driven directly
//! by other applications.
//!
//! ## Quick Example
//!
//! ```no_run
//! use repo_fleet::bulk::BulkUpdater;
//! use repo_fleet::config::BulkOptions;
//! use repo_fleet::git::SystemGit;
//! use repo_fleet::scheduler::LogProgress;
//!
//! let git = SystemGit::new();
//! let options = BulkOptions {
//!     root: "/home/me/src".into(),
//!     dry_run: true,
//!     ..Default::default()
//! };
//! let report = BulkUpdater::new(&git, &LogProgress).run(&options).unwrap();
//! println!("{} repositories", report.summary.total);
//! ```
//!
//! ## Core Concepts
//!
//! - **Locator (`locator`)**: finds every git work tree under a root without
//!   descending into one.
//! - **Safety Classifier (`safety`)**: decides from a repository's state
//!   whether an automatic pull is safe.
//! - **Execution Scheduler (`scheduler`)**: runs one task per repository on a
//!   bounded worker pool and collects exactly one result for each.
//! - **Manifest Store (`manifest`)**: the persisted listing of an
//!   organization and the orphans it implies.
//! - **Orchestrator (`orchestrator`)**: clones missing repositories and
//!   applies an update strategy to existing ones, with retries (`retry`)
//!   and resumable sessions (`session`).
//!
//! ## Execution Flow
//!
//! The local path (`bulk`) is locate → classify → pull the safe ones.
//! The remote path (`orchestrator`) is list → plan → clone or update →
//! clean orphans. Both report through [`result::RepoResult`] and classify
//! failures with [`error::ErrorKind`].

pub mod bulk;
pub mod cancel;
pub mod config;
pub mod defaults;
pub mod error;
pub mod git;
pub mod locator;
pub mod manifest;
pub mod orchestrator;
pub mod output;
pub mod provider;
pub mod report;
pub mod result;
pub mod retry;
pub mod safety;
pub mod scheduler;
pub mod session;
pub mod suggestions;

#[cfg(test)]
mod testing;
