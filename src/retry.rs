//! Bounded exponential backoff for retryable failures.
//!
//! Only errors whose kind is retryable (`RateLimit`, `Network`, `Timeout`)
//! are retried. Anything else is returned after the first attempt.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::cancel::CancelToken;
use crate::defaults;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: defaults::MAX_RETRIES,
            base_delay: defaults::RETRY_BASE_DELAY,
            max_delay: defaults::RETRY_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    fn delay_for_error(&self, retry: u32, error: &Error) -> Duration {
        let delay = self.delay_for(retry);
        match error {
            Error::RateLimit {
                retry_after: Some(after),
                ..
            } => delay.max(*after),
            _ => delay,
        }
    }
}

/// Waits between attempts. Injected so tests can observe delays without
/// sleeping.
pub trait Sleeper: Send + Sync {
    /// Wait for `delay`, returning early once `cancel` trips.
    fn sleep(&self, delay: Duration, cancel: &CancelToken);
}

/// Sleeps on the current thread in short slices so cancellation is noticed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, delay: Duration, cancel: &CancelToken) {
        let until = Instant::now() + delay;
        while !cancel.is_cancelled() {
            let left = until.saturating_duration_since(Instant::now());
            if left.is_zero() {
                break;
            }
            thread::sleep(left.min(Duration::from_millis(100)));
        }
    }
}

/// Outcome of [`retry`]: the final result and how many attempts were made.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T>,
    pub attempts: u32,
}

/// Run `op` until it succeeds, fails with a non-retryable error, exhausts
/// `policy.max_retries`, or `cancel` trips.
pub fn retry<T>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    cancel: &CancelToken,
    mut op: impl FnMut(u32) -> Result<T>,
) -> Attempted<T> {
    let mut attempt = 0;
    loop {
        let result = op(attempt);
        attempt += 1;
        let err = match result {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => err,
        };

        let retries_used = attempt - 1;
        if !err.is_retryable() || retries_used >= policy.max_retries {
            if err.is_retryable() {
                warn!("giving up after {} attempt(s): {}", attempt, err);
            }
            return Attempted {
                result: Err(err),
                attempts: attempt,
            };
        }
        if cancel.is_cancelled() {
            return Attempted {
                result: Err(Error::Cancelled),
                attempts: attempt,
            };
        }

        let delay = policy.delay_for_error(retries_used, &err);
        debug!(
            "attempt {} failed ({}), retrying in {:?}",
            attempt,
            err.kind(),
            delay
        );
        sleeper.sleep(delay, cancel);
    }
}
