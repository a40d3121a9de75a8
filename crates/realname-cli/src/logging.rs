//! Diagnostic logging on stderr

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Level used when neither `--log-level` nor `RUST_LOG` is given
///
/// Notices are already written to stderr in plain text, so their mirrored
/// `warn!` events stay hidden unless asked for.
pub const DEFAULT_LEVEL: &str = "error";

/// Accepted values for `--log-level`
pub const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Build the filter: `--log-level` first, then `RUST_LOG`, then the default
pub fn filter(log_level: Option<&str>) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL)),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL)),
    }
}

/// Install the global subscriber; later calls are ignored
pub fn init(log_level: Option<&str>) {
    let _ = tracing_subscriber::registry()
        .with(filter(log_level))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init();
}
