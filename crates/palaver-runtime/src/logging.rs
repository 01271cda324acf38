//! Logging setup using `tracing` and `tracing-subscriber`.

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Initializes the global tracing subscriber from configuration.
///
/// `RUST_LOG`, when set, takes precedence over the configured level. Safe to
/// call more than once; later calls are no-ops.
pub fn init_from_config(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(true))
        .with(filter)
        .try_init();
}
