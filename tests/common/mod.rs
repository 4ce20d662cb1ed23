//! Shared test utilities for integration and E2E tests.
//!
//! This module provides common fixtures and git helpers to reduce
//! duplication across test files.
//!
//! ## Usage
//!
//! Add `mod common;` to your test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! #[test]
//! fn test_example() {
//!     let fixture = TestFixture::new();
//!     fixture.command().arg("pull-all").assert().success();
//! }
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    #[allow(unused_imports)]
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::{commit_file, git, init_git_repo, TestFixture};
}

/// Run `git` in `dir` and return its trimmed stdout. Panics on failure so
/// broken fixtures are obvious.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Initialize a git repository at `dir` with the given files committed.
///
/// The repository uses "main" as the default branch name.
pub fn init_git_repo(dir: &Path, files: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).expect("Failed to create repo directory");
    git(dir, &["init", "-b", "main"]);
    configure_identity(dir);

    for (path, content) in files {
        let file = dir.join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(&file, content).expect("Failed to write file");
    }

    git(dir, &["add", "."]);
    git(dir, &["commit", "-m", "Initial commit"]);
}

/// Configure a commit identity and disable signing for tests.
pub fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.email", "test@example.com"]);
    git(dir, &["config", "user.name", "Test User"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Write `name` in `dir` and commit it.
pub fn commit_file(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).expect("Failed to write file");
    git(dir, &["add", name]);
    git(dir, &["commit", "-m", &format!("Update {}", name)]);
}

/// Clone `source` into `dest` and give the clone an identity.
#[allow(dead_code)]
pub fn clone_into(source: &Path, dest: &Path) {
    let parent = dest.parent().expect("clone destination has a parent");
    std::fs::create_dir_all(parent).expect("Failed to create clone parent");
    git(
        parent,
        &[
            "clone",
            "--quiet",
            &source.display().to_string(),
            &dest.display().to_string(),
        ],
    );
    configure_identity(dest);
}

/// A temporary directory holding upstream repositories, a fleet directory
/// and, for `sync`, a listing file.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the temporary directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a child path in the temp directory.
    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// An upstream repository at `upstream/<name>` with one commit.
    #[allow(dead_code)]
    pub fn upstream(&self, name: &str) -> PathBuf {
        let dir = self.path().join("upstream").join(name);
        init_git_repo(&dir, &[("README.md", &format!("# {}\n", name))]);
        dir
    }

    /// Write `listing.yaml` for organization `org` with one entry per
    /// `(name, clone_url)` and return its path.
    #[allow(dead_code)]
    pub fn with_listing(&self, org: &str, repos: &[(&str, &Path)]) -> PathBuf {
        let mut yaml = format!("organizations:\n  {}:\n", org);
        for (name, url) in repos {
            yaml.push_str(&format!(
                "    - name: {}\n      clone_url: \"{}\"\n",
                name,
                url.display()
            ));
        }
        let listing = self.temp_dir.child("listing.yaml");
        listing.write_str(&yaml).expect("Failed to write listing");
        listing.path().to_path_buf()
    }

    /// Create a command configured to run in this fixture's directory,
    /// without colors and without inherited `REPO_FLEET_*` settings.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("repo-fleet");
        cmd.current_dir(self.path())
            .arg("--color")
            .arg("never")
            .env("GIT_AUTHOR_NAME", "Test User")
            .env("GIT_AUTHOR_EMAIL", "test@example.com")
            .env("GIT_COMMITTER_NAME", "Test User")
            .env("GIT_COMMITTER_EMAIL", "test@example.com");
        for var in [
            "REPO_FLEET_ORG",
            "REPO_FLEET_PROVIDER",
            "REPO_FLEET_LISTING",
            "REPO_FLEET_TARGET",
            "REPO_FLEET_PARALLEL",
            "RUST_LOG",
        ] {
            cmd.env_remove(var);
        }
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_creates_temp_dir() {
        let fixture = TestFixture::new();
        assert!(fixture.path().exists());
    }

    #[test]
    fn test_listing_is_valid_yaml() {
        let fixture = TestFixture::new();
        let path = fixture.with_listing("acme", &[("api", Path::new("/srv/git/api.git"))]);
        let content = std::fs::read_to_string(path).unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&content).unwrap();
        assert_eq!(
            value["organizations"]["acme"][0]["clone_url"].as_str(),
            Some("/srv/git/api.git")
        );
    }
}
