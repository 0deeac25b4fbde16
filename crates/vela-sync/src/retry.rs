//! # Bounded Retry
//!
//! Explicit retry loop for remote deliveries: a fixed number of attempts
//! with a fixed delay in between, stopping early on errors that retrying
//! cannot fix.
//!
//! The outcome type keeps "succeeded", "ran out of attempts" and "rejected
//! outright" distinct, because the export job treats them differently: only
//! a completed delivery removes a queue entry, and a rejection must not
//! burn further attempts.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Retry Policy
// =============================================================================

/// Attempt budget and pacing for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first (never zero).
    pub max_attempts: u32,

    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(2000),
        }
    }
}

/// How a retried operation ended.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// An attempt succeeded.
    Completed { value: T, attempts: u32 },

    /// Every attempt failed with a retryable error.
    Exhausted { attempts: u32, last_error: SyncError },

    /// An attempt failed with a non-retryable error; no further attempts
    /// were made.
    Rejected { attempts: u32, error: SyncError },
}

impl<T> RetryOutcome<T> {
    /// The error, if the operation did not complete.
    pub fn error(&self) -> Option<&SyncError> {
        match self {
            RetryOutcome::Completed { .. } => None,
            RetryOutcome::Exhausted { last_error, .. } => Some(last_error),
            RetryOutcome::Rejected { error, .. } => Some(error),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Runs `op` until it succeeds, fails non-retryably, or the attempt
    /// budget is spent. Sleeps `delay` between attempts.
    ///
    /// `op` is called fresh per attempt and must own its inputs (clone them
    /// into the future it returns).
    pub async fn run<T, F, Fut>(&self, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let mut last_error: Option<SyncError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.delay).await;
            }

            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Delivery succeeded after retry");
                    }
                    return RetryOutcome::Completed { value, attempts: attempt };
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempt, error = %e, "Delivery rejected, not retrying");
                    return RetryOutcome::Rejected { attempts: attempt, error: e };
                }
                Err(e) => {
                    debug!(
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Delivery attempt failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        RetryOutcome::Exhausted {
            attempts: self.max_attempts,
            last_error: last_error
                .unwrap_or_else(|| SyncError::Internal("Retry loop ran zero attempts".into())),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
