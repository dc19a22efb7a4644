//! The [`StateEvent`] record and its [`EventType`] tag.

use chrono::{DateTime, Utc};
use rapport_types::{AgentId, TransactionId};
use serde::{Deserialize, Serialize};

use crate::payload::Payload;

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Every kind of state mutation the reducer or the store understands.
///
/// Serialized as a `snake_case` string. Tags this build does not recognize
/// deserialize to [`EventType::Unknown`], which the reducer treats as a
/// diagnosed no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    // --- Relationship ---
    /// Add a signed delta to affinity.
    AffinityDelta,
    /// Replace the mood label.
    MoodSet,
    /// Apply a classified player interaction.
    PlayerEvent,
    /// Relationship bookkeeping emitted by external systems.
    RelationshipUpdate,

    // --- Facts ---
    /// Admit a new fact.
    FactAdd,
    /// Forget facts mentioning a fragment.
    FactRemove,
    /// Decay every fact's salience.
    FactDecay,
    /// Boost salience of facts mentioning a fragment.
    FactReinforce,

    // --- Dialogue ---
    /// Record a dialogue turn.
    TurnAdd,
    /// Mark the start of a fresh conversation.
    TurnClear,

    // --- State management ---
    /// Reset affinity, mood, and memory.
    StateReset,
    /// Overlay fields from a serialized state.
    StateLoad,
    /// Marker emitted when a snapshot is taken.
    StateSnapshot,

    // --- Transaction control ---
    /// Open a buffered transaction.
    TransactionBegin,
    /// Apply every buffered event of a transaction.
    TransactionCommit,
    /// Discard every buffered event of a transaction.
    TransactionAbort,

    /// A tag not known to this build.
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Whether this event type is handled by the store, not the reducer.
    pub const fn is_transaction_control(self) -> bool {
        matches!(
            self,
            Self::TransactionBegin | Self::TransactionCommit | Self::TransactionAbort
        )
    }

    /// Wire name of this event type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AffinityDelta => "affinity_delta",
            Self::MoodSet => "mood_set",
            Self::PlayerEvent => "player_event",
            Self::RelationshipUpdate => "relationship_update",
            Self::FactAdd => "fact_add",
            Self::FactRemove => "fact_remove",
            Self::FactDecay => "fact_decay",
            Self::FactReinforce => "fact_reinforce",
            Self::TurnAdd => "turn_add",
            Self::TurnClear => "turn_clear",
            Self::StateReset => "state_reset",
            Self::StateLoad => "state_load",
            Self::StateSnapshot => "state_snapshot",
            Self::TransactionBegin => "transaction_begin",
            Self::TransactionCommit => "transaction_commit",
            Self::TransactionAbort => "transaction_abort",
            Self::Unknown => "unknown",
        }
    }
}

impl core::fmt::Display for EventType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StateEvent
// ---------------------------------------------------------------------------

/// An immutable description of one intended mutation of an agent's state.
///
/// Fields are read-only. The owning store stamps the `sequence` number by
/// producing a new value with [`StateEvent::sequenced`]; callers leave it at
/// zero. Events carrying a `transaction_id` that names an open transaction
/// are buffered instead of applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    event_type: EventType,
    agent_id: AgentId,
    #[serde(default)]
    payload: Payload,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    sequence: u64,
    #[serde(default)]
    transaction_id: Option<TransactionId>,
    #[serde(default = "default_source")]
    source: String,
}

fn default_source() -> String {
    String::from("unknown")
}

impl StateEvent {
    /// Create an unsequenced, non-transactional event stamped with the
    /// current time.
    pub fn new(event_type: EventType, agent_id: AgentId, payload: Payload) -> Self {
        Self {
            event_type,
            agent_id,
            payload,
            timestamp: Utc::now(),
            sequence: 0,
            transaction_id: None,
            source: default_source(),
        }
    }

    /// Associate the event with a transaction.
    #[must_use]
    pub fn in_transaction(mut self, transaction_id: TransactionId) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    /// Tag the event with the component that produced it.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Override the creation timestamp (replay, tests).
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Return a copy of this event stamped with a store sequence number.
    #[must_use]
    pub fn sequenced(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// The event's type tag.
    pub const fn event_type(&self) -> EventType {
        self.event_type
    }

    /// The agent this event targets.
    pub const fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    /// Event-specific data.
    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    /// When the event was created.
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Store-assigned sequence number (zero before dispatch).
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// The transaction this event belongs to, if any.
    pub const fn transaction_id(&self) -> Option<&TransactionId> {
        self.transaction_id.as_ref()
    }

    /// Component that produced the event.
    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_events_are_unsequenced() {
        let event = StateEvent::new(EventType::MoodSet, AgentId::from("lydia"), Payload::new());
        assert_eq!(event.sequence(), 0);
        assert!(event.transaction_id().is_none());
        assert_eq!(event.source(), "unknown");
    }

    #[test]
    fn sequenced_copies_keep_every_other_field() {
        let event = StateEvent::new(EventType::MoodSet, AgentId::from("lydia"), Payload::new())
            .in_transaction(TransactionId::from("t1"))
            .with_source("test");
        let stamped = event.clone().sequenced(7);
        assert_eq!(stamped.sequence(), 7);
        assert_eq!(stamped.timestamp(), event.timestamp());
        assert_eq!(stamped.transaction_id(), event.transaction_id());
        assert_eq!(stamped.source(), "test");
    }

    #[test]
    fn serializes_as_tagged_record() {
        let event = StateEvent::new(
            EventType::AffinityDelta,
            AgentId::from("lydia"),
            Payload::new().with("delta", 0.2),
        );
        let json = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(json["event_type"], "affinity_delta");
        assert_eq!(json["agent_id"], "lydia");
        assert_eq!(json["payload"]["delta"], 0.2);
    }

    #[test]
    fn unrecognized_tags_deserialize_as_unknown() {
        let raw = r#"{
            "event_type": "emote",
            "agent_id": "lydia",
            "payload": {"gesture": "wave"},
            "timestamp": "2024-01-01T00:00:00Z"
        }"#;
        let parsed: Result<StateEvent, _> = serde_json::from_str(raw);
        assert!(parsed.is_ok());
        if let Ok(event) = parsed {
            assert_eq!(event.event_type(), EventType::Unknown);
            assert_eq!(event.source(), "unknown");
        }
    }

    #[test]
    fn only_transaction_types_are_control() {
        assert!(EventType::TransactionBegin.is_transaction_control());
        assert!(EventType::TransactionAbort.is_transaction_control());
        assert!(!EventType::AffinityDelta.is_transaction_control());
        assert!(!EventType::Unknown.is_transaction_control());
    }
}
