//! Logging setup for binaries and tests embedding kubeforge
//!
//! The library itself only emits `tracing` events. Hosts that do not install
//! their own subscriber can call [`init_logging`] once at startup.
//!
//! # Example
//!
//! ```no_run
//! use kubeforge::telemetry::{init_logging, init_logging_with};
//!
//! init_logging();
//! // or, when RUST_LOG is unset, show remote command detail:
//! init_logging_with("kubeforge=debug,info");
//! ```

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install a stderr subscriber filtered by `RUST_LOG` (default: info)
pub fn init_logging() {
    init_logging_with("info");
}

/// Like [`init_logging`], with `default_filter` used when `RUST_LOG` is unset
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging_with(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_is_idempotent() {
        init_logging();
        init_logging_with("kubeforge=debug");
    }

    #[test]
    fn test_invalid_default_filter_does_not_panic() {
        init_logging_with("kubeforge=[not-a-level");
    }
}
