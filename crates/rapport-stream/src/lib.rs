//! Transactional streaming protocol for the Rapport engine.
//!
//! A generation process streams text and audio for one interaction while
//! the agent's state must change only if the interaction completes. This
//! crate wraps each interaction in a [`StreamTransaction`] that records an
//! ordered list of [`Frame`]s and holds every state change back until
//! commit.
//!
//! # Modules
//!
//! - [`frames`] -- The [`Frame`] record, its [`FrameBody`] variants, and [`FrameSink`]
//! - [`transaction`] -- The [`StreamTransaction`] state machine
//!
//! # Guarantees
//!
//! - Store state after an abort equals store state before start, however
//!   many frames were emitted in between.
//! - Commit applies every queued change, and the assistant turn, in one
//!   store lock scope; readers see all of it or none of it.
//! - Once committed or aborted, every further operation returns a
//!   [`StreamError`]. The transaction never panics.
//!
//! # Usage
//!
//! ```
//! use rapport_state::StateStore;
//! use rapport_stream::StreamTransaction;
//! use rapport_types::{AgentId, AgentState};
//!
//! let store = StateStore::new(AgentId::from("lydia"), AgentState::new("Lydia", "Housecarl"));
//! let mut txn = StreamTransaction::new(store.clone());
//!
//! txn.start("I brought you a sword.").ok();
//! txn.add_text("Thank you, my friend.", true).ok();
//! txn.queue_affinity_change(0.2, "gift").ok();
//! txn.queue_mood_change("Grateful").ok();
//! assert_eq!(store.get_snapshot().mood, "Neutral");
//!
//! txn.commit().ok();
//! assert_eq!(store.get_snapshot().mood, "Grateful");
//! ```

pub mod frames;
pub mod transaction;

// Re-export primary types at crate root.
pub use frames::{CommitMetrics, DEFAULT_SAMPLE_RATE, Frame, FrameBody, FrameSink};
pub use transaction::{Phase, StreamTransaction};

use rapport_events::EventType;
use rapport_state::DispatchRejection;
use rapport_types::TransactionId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Misuse of a [`StreamTransaction`] or a store refusal during commit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// An operation other than `start` was called before `start`.
    #[error("stream transaction not started")]
    NotStarted,

    /// `start` was called on a transaction that is not idle.
    #[error("stream transaction already {0}")]
    AlreadyStarted(Phase),

    /// The transaction already committed or aborted.
    #[error("stream transaction already {0}")]
    Finished(Phase),

    /// The store already has a transaction open under this id.
    #[error("transaction `{0}` is already open in the store")]
    TransactionInUse(TransactionId),

    /// The store transaction was closed by someone else before commit.
    #[error("transaction `{0}` is no longer open in the store")]
    TransactionLost(TransactionId),

    /// Begin, commit, and abort are issued by the transaction itself and
    /// cannot be queued.
    #[error("cannot queue transaction control event `{}`", .0.as_str())]
    ControlEvent(EventType),

    /// The store refused the commit; nothing was applied.
    #[error("commit rejected: {0}")]
    CommitRejected(DispatchRejection),
}
