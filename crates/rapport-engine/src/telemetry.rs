//! Tracing subscriber setup for binaries.
//!
//! Library crates only emit `tracing` events; installing a subscriber is
//! left to the process entry point.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::EngineError;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. With
/// `logging.json` set, events are written as JSON lines.
///
/// # Errors
///
/// Returns [`EngineError::Telemetry`] if the configured level is not a
/// valid filter directive or a global subscriber is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), EngineError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| EngineError::Telemetry {
            message: format!("invalid log level `{}`: {e}", config.level),
        })?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Telemetry {
        message: format!("failed to install subscriber: {e}"),
    })
}
