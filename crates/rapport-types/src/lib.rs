//! Shared type definitions for the Rapport conversational-state engine.
//!
//! This crate is the single source of truth for the value types that flow
//! between the reducer, the per-agent state store, and the streaming
//! transaction layer. Nothing here performs I/O or holds a lock.
//!
//! # Modules
//!
//! - [`ids`] -- String newtypes for agent and transaction identifiers
//! - [`enums`] -- Player interaction kinds and dialogue roles
//! - [`structs`] -- Agent state, facts, dialogue turns, and state diffs

pub mod enums;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{PlayerEventKind, TurnRole};
pub use ids::{AgentId, TransactionId};
pub use structs::{
    AFFINITY_MAX, AFFINITY_MIN, AgentState, DEFAULT_MOOD, DialogueTurn, Fact, FieldChange,
    StateDiff, clamp_affinity,
};
