//! Logging init: stderr subscriber filtered by `RUST_LOG`.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,hdm_core=info";

/// Installs the global subscriber. `verbose` raises the engine to debug when
/// `RUST_LOG` is not set. Calling it twice is harmless.
pub fn init_logging(verbose: bool) {
    let fallback = if verbose {
        "info,hdm_core=debug,hdm_cli=debug"
    } else {
        DEFAULT_FILTER
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}
