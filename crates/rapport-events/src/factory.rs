//! Constructors for the well-known event types.
//!
//! Each function returns an unsequenced, non-transactional event; chain
//! [`StateEvent::in_transaction`] to buffer it inside a transaction.

use rapport_types::{AgentId, AgentState, PlayerEventKind, TransactionId, TurnRole};
use serde_json::Value;

use crate::event::{EventType, StateEvent};
use crate::payload::Payload;

/// Change affinity by `delta`.
pub fn affinity_delta(agent_id: &AgentId, delta: f64, reason: &str) -> StateEvent {
    StateEvent::new(
        EventType::AffinityDelta,
        agent_id.clone(),
        Payload::new().with("delta", delta).with("reason", reason),
    )
    .with_source("affinity_delta")
}

/// Replace the agent's mood.
pub fn mood_set(agent_id: &AgentId, mood: &str) -> StateEvent {
    StateEvent::new(
        EventType::MoodSet,
        agent_id.clone(),
        Payload::new().with("mood", mood),
    )
    .with_source("mood_set")
}

/// Remember a new fact.
pub fn fact_add(agent_id: &AgentId, text: &str, tags: &[&str], salience: f64) -> StateEvent {
    StateEvent::new(
        EventType::FactAdd,
        agent_id.clone(),
        Payload::new()
            .with("text", text)
            .with("tags", tags.to_vec())
            .with("salience", salience),
    )
    .with_source("fact_add")
}

/// Forget every fact mentioning `fragment`.
pub fn fact_remove(agent_id: &AgentId, fragment: &str) -> StateEvent {
    StateEvent::new(
        EventType::FactRemove,
        agent_id.clone(),
        Payload::new().with("fragment", fragment),
    )
    .with_source("fact_remove")
}

/// Decay all facts by `decay_rate`, never below `min_salience`.
pub fn fact_decay(agent_id: &AgentId, decay_rate: f64, min_salience: f64) -> StateEvent {
    StateEvent::new(
        EventType::FactDecay,
        agent_id.clone(),
        Payload::new()
            .with("decay_rate", decay_rate)
            .with("min_salience", min_salience),
    )
    .with_source("fact_decay")
}

/// Boost salience of facts mentioning `fragment`.
pub fn fact_reinforce(agent_id: &AgentId, fragment: &str, boost: f64) -> StateEvent {
    StateEvent::new(
        EventType::FactReinforce,
        agent_id.clone(),
        Payload::new().with("fragment", fragment).with("boost", boost),
    )
    .with_source("fact_reinforce")
}

/// Record one dialogue turn.
pub fn turn_add(agent_id: &AgentId, role: TurnRole, content: &str) -> StateEvent {
    StateEvent::new(
        EventType::TurnAdd,
        agent_id.clone(),
        Payload::new()
            .with("role", role.as_str())
            .with("content", content),
    )
    .with_source("turn_add")
}

/// Apply a classified player interaction of the given strength.
pub fn player_event(
    agent_id: &AgentId,
    kind: PlayerEventKind,
    strength: f64,
    tags: &[&str],
) -> StateEvent {
    let kind_value = serde_json::to_value(kind).unwrap_or(Value::Null);
    StateEvent::new(
        EventType::PlayerEvent,
        agent_id.clone(),
        Payload::new()
            .with("player_event_type", kind_value)
            .with("strength", strength)
            .with("tags", tags.to_vec()),
    )
    .with_source("player_event")
}

/// Reset affinity and mood, clearing recent memory.
pub fn state_reset(agent_id: &AgentId, affinity: f64, mood: &str) -> StateEvent {
    StateEvent::new(
        EventType::StateReset,
        agent_id.clone(),
        Payload::new().with("affinity", affinity).with("mood", mood),
    )
    .with_source("state_reset")
}

/// Overlay affinity, mood, and recent memory from a saved state.
pub fn state_load(agent_id: &AgentId, saved: &AgentState) -> StateEvent {
    let state_dict = serde_json::json!({
        "affinity": saved.affinity,
        "mood": saved.mood,
        "recent_memory": saved.recent_memory,
    });
    StateEvent::new(
        EventType::StateLoad,
        agent_id.clone(),
        Payload::new().with("state_dict", state_dict),
    )
    .with_source("state_load")
}

/// Open a transaction; later events carrying `transaction_id` are buffered.
pub fn transaction_begin(agent_id: &AgentId, transaction_id: &TransactionId) -> StateEvent {
    StateEvent::new(EventType::TransactionBegin, agent_id.clone(), Payload::new())
        .in_transaction(transaction_id.clone())
        .with_source("transaction")
}

/// Apply every event buffered under `transaction_id`.
pub fn transaction_commit(agent_id: &AgentId, transaction_id: &TransactionId) -> StateEvent {
    StateEvent::new(EventType::TransactionCommit, agent_id.clone(), Payload::new())
        .in_transaction(transaction_id.clone())
        .with_source("transaction")
}

/// Discard every event buffered under `transaction_id`.
pub fn transaction_abort(
    agent_id: &AgentId,
    transaction_id: &TransactionId,
    reason: &str,
) -> StateEvent {
    StateEvent::new(
        EventType::TransactionAbort,
        agent_id.clone(),
        Payload::new().with("reason", reason),
    )
    .in_transaction(transaction_id.clone())
    .with_source("transaction")
}
