//! Pure reducer, per-agent state store, and agent registry for the Rapport
//! conversational-state engine.
//!
//! This crate is the logic layer for agent state: it turns
//! [`StateEvent`](rapport_events::StateEvent)s into new
//! [`AgentState`](rapport_types::AgentState) values under a single writer
//! per agent, with buffered begin/commit/abort transactions. It performs no
//! I/O beyond `tracing` output.
//!
//! # Modules
//!
//! - [`config`] -- Admission policy and store settings ([`AdmissionConfig`], [`StoreConfig`])
//! - [`error`] -- Rejections, diagnostics, and registry errors
//! - [`reducer`] -- The pure transition function ([`Reducer`], [`replay`])
//! - [`registry`] -- Caller-owned agent id to store map ([`AgentRegistry`])
//! - [`store`] -- The per-agent sole writer ([`StateStore`])

pub mod config;
pub mod error;
pub mod reducer;
pub mod registry;
pub mod store;

// Re-export primary types at crate root for convenience.
pub use config::{AdmissionConfig, StoreConfig};
pub use error::{Diagnostic, DispatchRejection, ReducerFailure, RegistryError, Rejection};
pub use reducer::{Reduce, Reducer, Reduction, replay};
pub use registry::AgentRegistry;
pub use store::{
    DEFAULT_HISTORY_LIMIT, DispatchOutcome, StateStore, StateStoreBuilder, StateView,
    Subscription, panic_message,
};
