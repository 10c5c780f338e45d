//! Structured logging setup.
//!
//! Logs go to **stderr**: stdout carries the handshake line the host reads to
//! find the gRPC address. Filtering follows `RUST_LOG`, for example
//! `RUST_LOG=azurerm_provider=debug` to see every management API request.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, EnvFilter, Registry};

fn subscriber(default_level: &str) -> impl SubscriberInitExt {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    Registry::default().with(filter).with(
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false),
    )
}

/// Install the global subscriber at `info` unless `RUST_LOG` says otherwise.
///
/// # Panics
///
/// Panics if a global subscriber is already installed.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`] with a different fallback level.
pub fn init_logging_with_default(default_level: &str) {
    subscriber(default_level).init();
}

/// Install the global subscriber unless one is already set.
///
/// Returns `false` when another subscriber won.
pub fn try_init_logging() -> bool {
    try_init("info").is_ok()
}

fn try_init(default_level: &str) -> Result<(), TryInitError> {
    subscriber(default_level).try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_directives() {
        for directive in [
            "info",
            "azurerm_provider=debug",
            "warn,azurerm_provider::client=trace",
        ] {
            assert!(EnvFilter::try_new(directive).is_ok(), "{}", directive);
        }
    }

    #[test]
    fn test_second_init_is_refused() {
        // the first call may lose to another test in this process
        let _ = try_init_logging();
        assert!(!try_init_logging());
    }
}
