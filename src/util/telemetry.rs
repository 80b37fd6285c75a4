//! Telemetry helpers for structured logging and tracing.

use std::io::Write;

/// Initialize tracing/telemetry. Users can install their own subscriber; this
/// helper installs a default env-based subscriber if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Flush buffered log output on stdout and stderr.
///
/// Registered as the last default shutdown handler so nothing written during
/// shutdown is lost when the process exits.
///
/// # Errors
///
/// Returns the underlying I/O error if either stream fails to flush.
pub fn flush_telemetry() -> std::io::Result<()> {
    tracing::debug!("flushing telemetry output");
    std::io::stdout().flush()?;
    std::io::stderr().flush()
}
