//! Tracing subscriber setup for the `nbrag` binary.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Output goes to stderr so command output
/// on stdout stays machine-readable.
///
/// `RUST_LOG` wins when set; otherwise `filter` (from `[logging] filter`)
/// is used, and an unparsable filter falls back to `info`.
pub fn init_tracing(filter: &str) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    // A second init (e.g. from tests) is a no-op.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
