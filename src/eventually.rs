//! Deadline-bound polling
//!
//! `eventually` re-runs an async check until it reports [`Check::Met`], the
//! deadline passes, the check aborts with an error, or a cancellation token
//! fires.
//!
//! # Example
//!
//! ```ignore
//! use kubeforge::eventually::{eventually, Check};
//! use std::time::Duration;
//!
//! let nodes = eventually(|| async {
//!     let ready = count_ready_nodes().await?;
//!     Ok::<_, MyError>(if ready == 3 {
//!         Check::Met(ready)
//!     } else {
//!         Check::Pending(format!("{ready}/3 nodes ready"))
//!     })
//! })
//! .timeout(Duration::from_secs(300))
//! .interval(Duration::from_secs(10))
//! .await_condition()
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Outcome of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check<T> {
    Met(T),
    /// Not yet; the string describes the observed state for timeout reports
    Pending(String),
}

/// Error type for eventually
#[derive(Debug, thiserror::Error)]
pub enum ConditionError<E> {
    #[error("condition not met after {attempts} attempts over {elapsed:?}: {last_state}")]
    Timeout {
        attempts: u32,
        elapsed: Duration,
        last_state: String,
    },

    #[error("wait cancelled")]
    Cancelled,

    #[error("{0}")]
    Aborted(E),
}

/// Builder for eventually checks
pub struct Eventually<F> {
    condition: F,
    timeout: Duration,
    interval: Duration,
    cancel: Option<CancellationToken>,
}

/// Create an eventually check that retries until the condition is met
///
/// Default timeout: 30 seconds
/// Default interval: 250ms
pub fn eventually<F>(condition: F) -> Eventually<F> {
    Eventually {
        condition,
        timeout: Duration::from_secs(30),
        interval: Duration::from_millis(250),
        cancel: None,
    }
}

impl<F> Eventually<F> {
    /// Set the timeout duration
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the polling interval
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Stop waiting as soon as `token` is cancelled
    #[must_use]
    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run the check until it is met, aborts, times out or is cancelled
    ///
    /// The first check runs immediately. A check still running when the
    /// deadline passes is dropped.
    pub async fn await_condition<Fut, T, E>(self) -> Result<T, ConditionError<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Check<T>, E>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let cancel = self.cancel.unwrap_or_else(CancellationToken::new);
        let mut attempts = 0u32;
        let mut last_state = String::from("not checked");

        loop {
            if cancel.is_cancelled() {
                return Err(ConditionError::Cancelled);
            }
            attempts += 1;

            let outcome = tokio::select! {
                biased;
                outcome = (self.condition)() => outcome,
                () = cancel.cancelled() => return Err(ConditionError::Cancelled),
                () = sleep_until(deadline) => {
                    return Err(ConditionError::Timeout {
                        attempts,
                        elapsed: start.elapsed(),
                        last_state: format!("{last_state} (check still running at deadline)"),
                    });
                }
            };

            match outcome.map_err(ConditionError::Aborted)? {
                Check::Met(value) => return Ok(value),
                Check::Pending(state) => last_state = state,
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ConditionError::Timeout {
                    attempts,
                    elapsed: now - start,
                    last_state,
                });
            }

            let pause = self.interval.min(deadline - now);
            tokio::select! {
                () = sleep(pause) => {}
                () = cancel.cancelled() => return Err(ConditionError::Cancelled),
            }
        }
    }
}
