//! Telemetry and Observability
//!
//! Sets up the `tracing-subscriber` pipeline. The log level comes from the
//! configuration (or `--log`), with `RUST_LOG` taking precedence over both.
//! Debug builds log pretty-printed to the terminal; release builds emit
//! structured JSON with span context.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the subscriber at the given level.
///
/// Safe to call more than once: the first initialization wins, later calls
/// are no-ops. The startup path relies on this, logging before the config is
/// loaded and re-initializing with the configured level afterwards.
pub fn init_telemetry_with_level(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},neko_engine={log_level}")));

    let registry = tracing_subscriber::registry().with(filter);

    if cfg!(debug_assertions) {
        registry
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    } else {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Initialize the subscriber at the default "info" level.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
