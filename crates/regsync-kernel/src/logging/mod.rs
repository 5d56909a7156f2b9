//! Tracing setup for the `regsync` binary
//!
//! Logs go to stderr; stdout carries only the report.

use tracing_subscriber::{fmt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "regsync=info,regsync_kernel=info";

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber; later calls are no-ops
///
/// `verbose` raises the default filter to debug; an explicit `RUST_LOG`
/// always wins.
pub fn init(verbose: bool, format: LogFormat) {
    let fallback = if verbose {
        "regsync=debug,regsync_kernel=debug"
    } else {
        DEFAULT_FILTER
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
