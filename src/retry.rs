//! Bounded exponential backoff
//!
//! The SSH client never retries on its own. Callers that talk to hosts still
//! coming up (freshly booted VMs, sshd restarting) wrap the operation here
//! and decide per error whether another attempt makes sense.
//!
//! # Example
//!
//! ```ignore
//! let client = retry(&RetryPolicy::default(), "connect", &cancel, SshError::is_retryable, || {
//!     connector.connect(&host, &cancel)
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How many times to try, and how long to back off between tries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; values below 1 are treated as 1
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the operation exactly once
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub fn backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }
}

/// Retry `f` with exponential backoff while `should_retry` approves the error
///
/// Returns the first success, the first non-retryable error, or the last
/// error once attempts run out or `cancel` fires during a backoff.
pub async fn retry<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation: &str,
    cancel: &CancellationToken,
    should_retry: P,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 1;

    loop {
        let err = match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(operation, attempt, "Retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !should_retry(&err) {
            debug!(operation, attempt, error = %err, "Error is not retryable");
            return Err(err);
        }

        if attempt >= max_attempts {
            warn!(
                operation,
                attempt,
                max_attempts,
                error = %err,
                "Retry exhausted all attempts"
            );
            return Err(err);
        }

        debug!(
            operation,
            attempt,
            max_attempts,
            backoff = ?backoff,
            error = %err,
            "Attempt failed, backing off"
        );
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            () = cancel.cancelled() => return Err(err),
        }
        backoff = std::cmp::min(backoff * 2, policy.max_backoff);
        attempt += 1;
    }
}
