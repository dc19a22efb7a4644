//! Error types for the rapport-state crate.
//!
//! Nothing here is ever raised out of `StateStore::dispatch`. Validation
//! rejections travel as reducer diagnostics, reducer failures are caught at
//! the store boundary and logged, and only registry lifecycle misuse is
//! returned to the caller as an error.

use rapport_events::{EventType, PayloadError};
use rapport_types::{AgentId, TransactionId};

/// Why the reducer declined to apply an otherwise well-routed event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    /// A payload field had the wrong shape.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// A required payload field was absent.
    #[error("payload field `{0}` is required")]
    MissingField(&'static str),

    /// Fact text exceeds the admission length limit.
    #[error("fact rejected: {len} characters exceeds limit of {max}")]
    FactTooLong {
        /// Length of the offered text.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// Fact text contains a forbidden substring.
    #[error("fact rejected: contains forbidden content `{pattern}`")]
    ForbiddenContent {
        /// The matching forbidden substring.
        pattern: String,
    },

    /// The player interaction kind is not recognized.
    #[error("unknown player event type `{0}`")]
    UnknownPlayerEvent(String),
}

/// Non-fatal note attached to a reduction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Diagnostic {
    /// No handler exists for this event type; inputs returned unchanged.
    #[error("no reducer handler for event type `{0}`")]
    Unhandled(EventType),

    /// The handler rejected the event; inputs returned unchanged.
    #[error("{event_type} rejected: {rejection}")]
    Rejected {
        /// Type of the rejected event.
        event_type: EventType,
        /// Reason for rejection.
        rejection: Rejection,
    },
}

/// The reducer panicked while applying an event.
///
/// Caught and logged by the store; the event counts as not applied and the
/// state is left exactly as before.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("reducer failed on event #{sequence} ({event_type}): {message}")]
pub struct ReducerFailure {
    /// Sequence number of the event being reduced.
    pub sequence: u64,
    /// Type of the event being reduced.
    pub event_type: EventType,
    /// Panic message, if one could be recovered.
    pub message: String,
}

/// Why a dispatch neither applied, buffered, nor controlled anything.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchRejection {
    /// Commit or abort carried no transaction id.
    #[error("transaction control event without a transaction id")]
    MissingTransactionId,

    /// Commit or abort named a transaction that is not open.
    #[error("no open transaction `{0}`")]
    UnknownTransaction(TransactionId),

    /// The reducer panicked; nothing was applied.
    #[error(transparent)]
    ReducerFailed(#[from] ReducerFailure),
}

/// Errors returned by [`AgentRegistry`](crate::AgentRegistry) lifecycle
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A store already exists for this agent.
    #[error("agent already registered: {0}")]
    AgentExists(AgentId),

    /// No store exists for this agent.
    #[error("agent not found: {0}")]
    AgentNotFound(AgentId),
}
