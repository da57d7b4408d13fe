//! Bounded re-execution of atomic units that failed for retryable reasons.
//!
//! Every attempt re-runs the whole unit, so boundary keys are read fresh each time. Attempts
//! follow each other immediately.

use crate::error::{Error, Result};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `attempt_fn(1)`, `attempt_fn(2)`, ... until it succeeds, fails terminally, or the
    /// cap is reached. The last retryable error is wrapped in `Error::RetriesExhausted`.
    pub fn run<T>(&self, op: &'static str, mut attempt_fn: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match attempt_fn(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(op, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    tracing::debug!(op, attempt, max = self.max_attempts, error = %err, "retrying");
                    attempt += 1;
                }
                Err(err) if err.is_retryable() => {
                    tracing::warn!(op, attempts = attempt, error = %err, "retries exhausted");
                    return Err(Error::RetriesExhausted {
                        op,
                        attempts: attempt,
                        last: Box::new(err),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }
}
