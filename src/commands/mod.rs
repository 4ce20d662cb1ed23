//! # CLI Command Implementations
//!
//! Each subcommand of `repo-fleet` lives in its own file with:
//! - An `Args` struct that defines the command-specific arguments and options,
//!   derived using `clap`.
//! - An `execute` function that takes the parsed `Args` and drives the
//!   `repo_fleet` library.

use std::time::Duration;

use repo_fleet::cancel::CancelToken;

pub mod pull_all;
pub mod state;
pub mod sync;

/// The run-wide token: tripped once the `--timeout` budget is spent.
fn run_token(deadline: Option<Duration>) -> CancelToken {
    match deadline {
        Some(budget) => CancelToken::with_deadline(budget),
        None => CancelToken::new(),
    }
}

/// Progress bars only go to an interactive stderr, and never with `--json`.
fn show_progress(json: bool) -> bool {
    !json && console::Term::stderr().is_term()
}
