//! Tracing subscriber setup for the `hookc` binary

use std::sync::OnceLock;
use tracing_subscriber::filter::EnvFilter;

static INIT_GUARD: OnceLock<()> = OnceLock::new();

/// Install the stderr subscriber once
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` when verbose.
pub fn initialize_logging(verbose: bool) {
    if INIT_GUARD.set(()).is_err() {
        return;
    }

    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .try_init();
}
