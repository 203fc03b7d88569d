//! Telemetry and Observability
//!
//! Handles setting up `tracing-subscriber` for structured logging of the
//! acquisition pipeline. Supports config-driven log levels, environment
//! variable overrides, and format switching between pretty (debug) and
//! JSON (release).

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::AcquisitionConfig;

/// Filter directive for the given level, applied to both crates
fn default_directive(log_level: &str) -> String {
    format!(
        "{},warden_engine={},warden_sdk={}",
        log_level, log_level, log_level
    )
}

/// Initialize the tracing subscriber with the given log level.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
///
/// Calling this more than once is harmless; later calls are ignored.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = default_directive(log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Initialize telemetry from the `core.log_level` of a configuration
pub fn init_from_config(config: &AcquisitionConfig) {
    init_telemetry_with_level(&config.core.log_level);
}
