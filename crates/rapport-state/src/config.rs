//! Configuration and defaults for the reducer and the state store.
//!
//! The [`AdmissionConfig`] and [`StoreConfig`] structs bundle every tunable
//! so that callers (the engine, tests) can override defaults. Both
//! deserialize from the `admission` and `store` sections of the engine's
//! YAML configuration; absent keys keep the defaults below.

use serde::Deserialize;

/// Default capacity of each store's event log ring buffer.
pub const DEFAULT_EVENT_LOG_CAPACITY: usize = 1000;

/// Default maximum length, in characters, of an admitted fact.
pub const DEFAULT_MAX_FACT_LEN: usize = 2000;

/// Substrings that disqualify a fact when found (case-insensitive).
pub const DEFAULT_FORBIDDEN_SUBSTRINGS: &[&str] = &["<|", "|>", "system instruction"];

/// Admission policy applied to fact-insertion events.
///
/// Rejection is validation only: the reducer returns its inputs unchanged
/// with a diagnostic, never an error.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AdmissionConfig {
    /// Longest fact text admitted (default: 2000).
    #[serde(default = "default_max_fact_len")]
    pub max_fact_len: usize,

    /// Lower-case substrings that cause rejection.
    #[serde(default = "default_forbidden_substrings")]
    pub forbidden_substrings: Vec<String>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_fact_len: default_max_fact_len(),
            forbidden_substrings: default_forbidden_substrings(),
        }
    }
}

/// Per-store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Number of events retained in the debugging log (default: 1000).
    #[serde(default = "default_event_log_capacity")]
    pub event_log_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            event_log_capacity: default_event_log_capacity(),
        }
    }
}

const fn default_event_log_capacity() -> usize {
    DEFAULT_EVENT_LOG_CAPACITY
}

const fn default_max_fact_len() -> usize {
    DEFAULT_MAX_FACT_LEN
}

fn default_forbidden_substrings() -> Vec<String> {
    DEFAULT_FORBIDDEN_SUBSTRINGS
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
