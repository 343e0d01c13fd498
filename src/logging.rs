//! Tracing subscriber setup for binaries.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "table_orm=info";

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to
/// `directive`. Does nothing if a global subscriber is already set.
pub fn init_tracing(directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
