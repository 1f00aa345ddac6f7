//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "info,newsgate=debug";

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (or
/// [`DEFAULT_FILTER`]).
///
/// Safe to call more than once: returns `false` if a global subscriber
/// was already installed (tests, embedding applications).
pub fn init() -> bool {
    init_with(DEFAULT_FILTER)
}

/// Like [`init`] with a caller-chosen fallback filter.
pub fn init_with(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_ok()
}
