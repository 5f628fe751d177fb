//! Logging initialization
//!
//! Thin wrapper over `tracing_subscriber` so embedding hosts and tests
//! get consistent output. Hosts with their own subscriber simply skip this.

use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Initialize tracing with an env-filter, defaulting to `info` when
/// `RUST_LOG` is unset. Safe to call once per process.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    debug!("diskwatch logging initialized");
}

/// Like [`init_logging`] but tolerant of an already-installed subscriber,
/// for use in tests.
pub fn try_init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
}
