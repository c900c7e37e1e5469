//! Rich wait errors with debugging context
//!
//! A [`WaitError`] records what was being waited for, the last state that
//! was observed and how long the wait ran. Its `Display` renders a small
//! tree so timeout reports are readable in logs.
//!
//! # Example
//!
//! ```ignore
//! match bootstrapper.wait_for_node_ready(&exec, timeout, &cancel).await {
//!     Err(BootstrapError::Timeout(err)) => {
//!         println!("Target: {}", err.target);
//!         println!("Last state: {}", err.last_state);
//!         for detail in &err.details {
//!             println!("  {detail}");
//!         }
//!     }
//!     _ => {}
//! }
//! ```

use std::fmt;
use std::time::Duration;

/// Rich error context for wait operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitError {
    /// What was waited for (e.g., "nodes on 10.0.0.5")
    pub target: String,
    /// Description of the last observed state
    pub last_state: String,
    /// How long we waited before giving up
    pub elapsed: Duration,
    /// The timeout that was configured
    pub timeout: Duration,
    /// Number of checks performed
    pub attempts: u32,
    /// Per-item detail lines (e.g., one per node that was not ready)
    pub details: Vec<String>,
}

impl WaitError {
    pub fn new(target: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            target: target.into(),
            last_state: "unknown".to_string(),
            elapsed,
            timeout,
            attempts: 0,
            details: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f)?;
        writeln!(f, "Wait timeout for {}", self.target)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        writeln!(f, "└─ Timeout: {:?}", self.timeout)?;

        if !self.details.is_empty() {
            writeln!(f)?;
            writeln!(f, "Details:")?;
            for (i, detail) in self.details.iter().enumerate() {
                let prefix = if i == self.details.len() - 1 {
                    "└─"
                } else {
                    "├─"
                };
                writeln!(f, "{prefix} {detail}")?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for WaitError {}
