//! # Execution Scheduler
//!
//! Runs one task per repository on a dedicated pool of `N` worker threads
//! and collects exactly one [`RepoResult`] per repository.
//!
//! - Each task is isolated: an error or panic in one repository becomes a
//!   `Failed` result for that repository and nothing else.
//! - Results go into a single append-only [`ResultSet`].
//! - Once the [`CancelToken`] trips, tasks that have not started yet are
//!   recorded as `Cancelled` instead of being run. Tasks already running
//!   finish (their git subprocesses observe the same token and are killed).
//! - The returned results are sorted by repository identity.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use log::{debug, warn};
use rayon::prelude::*;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::result::{RepoResult, RepoStatus, RepositoryRef, ResultSet};

/// Receives per-repository progress. Implementations must be cheap; they
/// are called from worker threads.
pub trait ProgressSink: Send + Sync {
    /// Total number of repositories in the next batch.
    fn batch(&self, _len: usize) {}

    fn started(&self, _repo: &RepositoryRef) {}

    fn finished(&self, _result: &RepoResult) {}
}

/// A sink that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// Sink that reports through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn started(&self, repo: &RepositoryRef) {
        debug!("processing {}", repo.identity());
    }

    fn finished(&self, result: &RepoResult) {
        if result.status() == RepoStatus::Failed {
            warn!("{}: {}", result.repository().identity(), result.message());
        } else {
            debug!("{}: {}", result.repository().identity(), result.status());
        }
    }
}

/// Bounded worker pool.
#[derive(Debug, Clone)]
pub struct Scheduler {
    workers: usize,
    cancel: CancelToken,
}

impl Scheduler {
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(Error::validation("worker count must be at least 1"));
        }
        Ok(Self {
            workers,
            cancel: CancelToken::new(),
        })
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `task` for every repository, at most `workers` at a time.
    pub fn run<F>(
        &self,
        repos: &[RepositoryRef],
        progress: &dyn ProgressSink,
        task: F,
    ) -> Result<Vec<RepoResult>>
    where
        F: Fn(&RepositoryRef) -> RepoResult + Send + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("fleet-worker-{}", i))
            .build()
            .map_err(|e| Error::validation(format!("failed to start worker pool: {}", e)))?;

        progress.batch(repos.len());
        let results = ResultSet::new();
        pool.install(|| {
            repos.par_iter().for_each(|repo| {
                let result = if self.cancel.is_cancelled() {
                    RepoResult::cancelled(repo.clone())
                } else {
                    progress.started(repo);
                    let started = Instant::now();
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(repo)));
                    let result = outcome.unwrap_or_else(|payload| {
                        let message = panic_message(payload.as_ref());
                        warn!("{}: worker panicked: {}", repo.identity(), message);
                        RepoResult::failed(repo.clone(), &Error::WorkerPanicked { message })
                    });
                    result.with_duration(started.elapsed())
                };
                progress.finished(&result);
                if let Err(e) = results.insert(result) {
                    warn!("{}", e);
                }
            });
        });

        results.into_sorted()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
