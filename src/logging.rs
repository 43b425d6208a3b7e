//! Tracing setup for Marksync.
//!
//! Logs go to stderr; stdout belongs to the RPC protocol.

use std::sync::OnceLock;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable overriding the configured filter.
pub const LOG_ENV: &str = "MARKSYNC_LOG";

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Builds the filter: `MARKSYNC_LOG` wins, then `default_filter`, then `info`.
fn build_filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber once. Later calls are no-ops.
///
/// Returns false if another subscriber was already registered elsewhere.
pub fn init_tracing(default_filter: &str) -> bool {
    *INSTALLED.get_or_init(|| {
        tracing_subscriber::registry()
            .with(build_filter(default_filter))
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
            .is_ok()
    })
}
