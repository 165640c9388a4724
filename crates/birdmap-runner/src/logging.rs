//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_filter` (e.g. `"birdmap=info"`).
/// Returns `false` if a global subscriber was already installed, which makes
/// repeated calls from tests harmless.
pub fn init_tracing(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
