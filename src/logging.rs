//! Structured logging setup for the daemon binary.

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. `filter` is an `EnvFilter`
/// directive string (e.g. `"info"`, `"udisks2_linux_provider=debug"`);
/// `RUST_LOG` still takes precedence if set, per `EnvFilter`'s own rules.
pub fn init(filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
