//! Error types for the Rapport engine.
//!
//! [`EngineError`] wraps every failure the engine surface can report, so
//! callers and `main` can propagate with `?`.

/// Top-level error for engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: crate::config::ConfigError,
    },

    /// An agent lookup or registration failed.
    #[error("registry error: {source}")]
    Registry {
        /// The underlying registry error.
        #[from]
        source: rapport_state::RegistryError,
    },

    /// A stream transaction was misused or its commit was refused.
    #[error("stream error: {source}")]
    Stream {
        /// The underlying stream error.
        #[from]
        source: rapport_stream::StreamError,
    },

    /// The tracing subscriber could not be installed.
    #[error("telemetry error: {message}")]
    Telemetry {
        /// Description of the telemetry failure.
        message: String,
    },
}
