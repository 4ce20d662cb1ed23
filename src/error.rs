//! # Error Handling
//!
//! This module defines the centralized error type for `repo-fleet`. It uses
//! `thiserror` to build a single `Error` enum whose variants carry structured
//! context (repository identity, operation, underlying cause) instead of
//! free-form strings.
//!
//! ## Key Components
//!
//! - **`ErrorKind`**: the failure taxonomy used for retry and abort
//!   decisions. Every `Error` maps to exactly one kind.
//! - **`Error`**: the main error enum.
//! - **`Context`**: the repository and operation an error occurred in.
//! - **`Result<T>`**: alias for `std::result::Result<T, Error>`.
//!
//! ## Retry and abort policy
//!
//! | Kind           | Retried | Aborts run |
//! |----------------|---------|------------|
//! | `Validation`   | no      | yes        |
//! | `Auth`         | no      | yes        |
//! | `RateLimit`    | yes     | no         |
//! | `Network`      | yes     | no         |
//! | `Timeout`      | yes     | no         |
//! | `GitOperation` | no      | no         |
//! | `Filesystem`   | no      | no         |

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy shared by the scheduler, the orchestrator and the
/// retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input or options.
    Validation,
    /// Credential or permission failure.
    Auth,
    /// Provider throttling.
    RateLimit,
    /// Transient transport failure.
    Network,
    /// An operation exceeded its time bound.
    Timeout,
    /// A git subprocess failed for one repository.
    GitOperation,
    /// Local path or permission problem for one repository.
    Filesystem,
}

impl ErrorKind {
    /// Whether failures of this kind are retried with backoff.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimit | ErrorKind::Network | ErrorKind::Timeout
        )
    }

    /// Whether a failure of this kind stops the whole run, since every
    /// remaining repository would fail the same way.
    pub fn aborts_run(self) -> bool {
        matches!(self, ErrorKind::Validation | ErrorKind::Auth)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::GitOperation => "git_operation",
            ErrorKind::Filesystem => "filesystem",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an error happened: the operation and, when known, the repository.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    pub repo: Option<String>,
    pub operation: String,
}

impl Context {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            repo: None,
            operation: operation.into(),
        }
    }

    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.repo = Some(repo.into());
        self
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repo {
            Some(repo) => write!(f, "{} ({})", self.operation, repo),
            None => f.write_str(&self.operation),
        }
    }
}

fn render_hint(hint: &Option<String>) -> String {
    hint.as_ref()
        .map(|h| format!("\n  hint: {}", h))
        .unwrap_or_default()
}

/// Main error type for repo-fleet operations
#[derive(Error, Debug)]
pub enum Error {
    /// Options or input data are malformed.
    #[error("Validation error: {message}{}", render_hint(hint))]
    Validation {
        message: String,
        /// Optional hint for how to fix the problem
        hint: Option<String>,
    },

    /// Credentials were rejected or access was denied.
    #[error("Authentication failed during {context}: {message}")]
    Auth { context: Context, message: String },

    /// The provider or remote throttled the request.
    #[error("Rate limited during {context}: {message}")]
    RateLimit {
        context: Context,
        message: String,
        /// Delay suggested by the remote, if it sent one
        retry_after: Option<Duration>,
    },

    /// A transient transport failure (DNS, refused connection, dropped stream).
    #[error("Network error during {context}: {message}")]
    Network { context: Context, message: String },

    /// An operation did not finish within its bound.
    #[error("Timed out during {context} after {}s", after.as_secs())]
    Timeout { context: Context, after: Duration },

    /// A git subprocess exited unsuccessfully.
    #[error("Git command failed during {context}: git {command} - {stderr}")]
    GitOperation {
        context: Context,
        command: String,
        stderr: String,
    },

    /// A local path could not be read, written, or removed.
    #[error("Filesystem error at {}: {message}", path.display())]
    Filesystem { path: PathBuf, message: String },

    /// The manifest file could not be read or written.
    #[error("Manifest error at {}: {message}", path.display())]
    Manifest { path: PathBuf, message: String },

    /// The resume session file could not be read, written, or reused.
    #[error("Session state error at {}: {message}{}", path.display(), render_hint(hint))]
    State {
        path: PathBuf,
        message: String,
        hint: Option<String>,
    },

    /// The run was cancelled or its deadline passed before this work finished.
    #[error("Operation cancelled")]
    Cancelled,

    /// The task for one repository panicked. Isolated to that repository
    /// like a failed git command.
    #[error("Worker panicked: {message}")]
    WorkerPanicked { message: String },

    /// A mutex guarding shared run state was poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, err: impl fmt::Display) -> Self {
        Error::Filesystem {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// The taxonomy bucket this error belongs to.
    ///
    /// `Cancelled` reports as `Timeout` (a deadline or signal ended the work)
    /// but is never retried, see [`Error::is_retryable`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. }
            | Error::Manifest { .. }
            | Error::State { .. }
            | Error::Yaml(_)
            | Error::Json(_)
            | Error::Regex(_) => ErrorKind::Validation,
            Error::Auth { .. } => ErrorKind::Auth,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Network { .. } => ErrorKind::Network,
            Error::Timeout { .. } | Error::Cancelled => ErrorKind::Timeout,
            Error::GitOperation { .. } | Error::WorkerPanicked { .. } => ErrorKind::GitOperation,
            Error::Filesystem { .. } | Error::LockPoisoned { .. } | Error::Io(_) => {
                ErrorKind::Filesystem
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Cancelled) && self.kind().is_retryable()
    }

    pub fn aborts_run(&self) -> bool {
        self.kind().aborts_run()
    }

    /// Attach a repository identity to errors that carry a [`Context`].
    pub fn in_repo(mut self, identity: &str) -> Self {
        match &mut self {
            Error::Auth { context, .. }
            | Error::RateLimit { context, .. }
            | Error::Network { context, .. }
            | Error::Timeout { context, .. }
            | Error::GitOperation { context, .. } => {
                if context.repo.is_none() {
                    context.repo = Some(identity.to_string());
                }
            }
            _ => {}
        }
        self
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
