//! Engine wiring for the Rapport conversational-state engine.
//!
//! Ties the core crates together for a host process: typed YAML
//! configuration, an [`Engine`] that owns the agent registry, and a
//! [`StreamDriver`] that turns a generator's output stage into a committed
//! or aborted interaction.
//!
//! # Modules
//!
//! - [`config`] -- YAML configuration ([`RapportConfig`])
//! - [`driver`] -- Stage-to-transaction driver ([`StreamDriver`], [`StreamItem`])
//! - [`engine`] -- Registry-owning service object ([`Engine`])
//! - [`error`] -- Engine error type ([`EngineError`])
//! - [`telemetry`] -- Tracing subscriber setup for binaries

pub mod config;
pub mod driver;
pub mod engine;
pub mod error;
pub mod telemetry;

// Re-export primary types at crate root for convenience.
pub use config::{ConfigError, LOG_LEVEL_ENV, LoggingConfig, RapportConfig};
pub use driver::{StreamDriver, StreamItem, TIMEOUT_CODE};
pub use engine::Engine;
pub use error::EngineError;
