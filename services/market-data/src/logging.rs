//! Tracing subscriber setup

use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Calling it again is a no-op.
pub fn init(service_name: &'static str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "logger initialized");
    }
}
