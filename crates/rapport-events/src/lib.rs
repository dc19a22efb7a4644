//! State mutation events for the Rapport conversational-state engine.
//!
//! Every change to an agent's state is described by an immutable
//! [`StateEvent`]. Events are created by callers, sequenced by the agent's
//! store exactly once, applied (or buffered inside a transaction), and then
//! retired into the store's bounded event log. Replaying the same events
//! through the reducer reproduces the same state.
//!
//! # Modules
//!
//! - [`event`] -- [`StateEvent`] and the [`EventType`] tag
//! - [`payload`] -- The key/value [`Payload`] map and its typed accessors
//! - [`factory`] -- Constructors for every well-known event

pub mod event;
pub mod factory;
pub mod payload;

pub use event::{EventType, StateEvent};
pub use payload::{Payload, PayloadError};
