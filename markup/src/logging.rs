//! Tracing setup shared by the binaries.
//!
//! Diagnostics only: output goes to stderr and is filtered by `RUST_LOG`.
//! Run history lives in the run store, not in the logs.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "markup=info,markup_server=info";

/// Install the global subscriber.
///
/// Reads `RUST_LOG`; falls back to `markup=info,markup_server=info`.
///
/// # Example
/// ```bash
/// RUST_LOG=markup=debug,tower_http=debug markup-server --port 3000
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
