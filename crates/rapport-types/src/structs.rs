//! Core value structs: agent state, facts, dialogue turns, and state diffs.
//!
//! [`AgentState`] and [`Fact`] are plain values. The store wraps them in
//! `Arc` and replaces them wholesale on every successful reduction, so no
//! code outside the reducer ever observes a half-updated value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::TurnRole;

/// Lowest representable affinity (hostile).
pub const AFFINITY_MIN: f64 = -1.0;

/// Highest representable affinity (devoted).
pub const AFFINITY_MAX: f64 = 1.0;

/// Mood label used when none has been set.
pub const DEFAULT_MOOD: &str = "Neutral";

// ---------------------------------------------------------------------------
// AgentState
// ---------------------------------------------------------------------------

/// Conversational state of one agent.
///
/// `affinity` is the relationship score toward the player, always within
/// [`AFFINITY_MIN`]..=[`AFFINITY_MAX`]. The reducer re-clamps it after every
/// mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Display name of the agent (e.g. "Lydia").
    pub npc_name: String,
    /// Role or occupation (e.g. "Housecarl").
    pub role: String,
    /// Relationship score toward the player.
    pub affinity: f64,
    /// Current emotional label (e.g. "Neutral", "Angry").
    pub mood: String,
    /// The player character's name.
    pub player_name: String,
    /// Player archetype ("Combatant", "Thief", "Mage", "Explorer", ...).
    pub player_playstyle: String,
    /// Last significant thing this agent remembers.
    #[serde(default)]
    pub recent_memory: String,
}

impl AgentState {
    /// Create a neutral state for the named agent.
    pub fn new(npc_name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            npc_name: npc_name.into(),
            role: role.into(),
            affinity: 0.0,
            mood: String::from(DEFAULT_MOOD),
            player_name: String::from("Player"),
            player_playstyle: String::from("Adventurer"),
            recent_memory: String::new(),
        }
    }

    /// Set the starting affinity, clamped to the valid range.
    #[must_use]
    pub fn with_affinity(mut self, affinity: f64) -> Self {
        self.affinity = clamp_affinity(affinity);
        self
    }

    /// Set the starting mood.
    #[must_use]
    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = mood.into();
        self
    }

    /// Set the player's name and archetype.
    #[must_use]
    pub fn with_player(mut self, name: impl Into<String>, playstyle: impl Into<String>) -> Self {
        self.player_name = name.into();
        self.player_playstyle = playstyle.into();
        self
    }

    /// Describe the agent's attitude toward the player by affinity band.
    pub fn attitude(&self) -> &'static str {
        let a = self.affinity;
        if a >= 0.75 {
            "Devoted, warm, protective."
        } else if a >= 0.25 {
            "Friendly, cooperative."
        } else if a > -0.25 {
            "Neutral, professional."
        } else if a > -0.75 {
            "Cold, suspicious, dismissive."
        } else {
            "Hostile, contemptuous."
        }
    }
}

/// Clamp an affinity value into [`AFFINITY_MIN`]..=[`AFFINITY_MAX`].
pub fn clamp_affinity(value: f64) -> f64 {
    value.clamp(AFFINITY_MIN, AFFINITY_MAX)
}

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A remembered fact attached to an agent's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// The remembered statement.
    pub text: String,
    /// Free-form retrieval tags.
    pub tags: Vec<String>,
    /// Display time the fact was recorded (`YYYY-MM-DD HH:MM`).
    pub time: String,
    /// Retention importance (0.0 to 1.0).
    pub salience: f64,
}

impl Fact {
    /// Create a fact; `salience` is clamped to 0.0--1.0.
    pub fn new(text: String, tags: Vec<String>, time: String, salience: f64) -> Self {
        Self {
            text,
            tags,
            time,
            salience: salience.clamp(0.0, 1.0),
        }
    }

    /// Whether the fact text contains `fragment`, ignoring case.
    pub fn mentions(&self, fragment: &str) -> bool {
        self.text.to_lowercase().contains(&fragment.to_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Dialogue history
// ---------------------------------------------------------------------------

/// One turn of recorded dialogue, read back from the event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueTurn {
    /// Who spoke.
    pub role: TurnRole,
    /// What was said.
    pub content: String,
    /// When the turn event was created.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StateDiff
// ---------------------------------------------------------------------------

/// A single changed field between two states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// Field name.
    pub field: &'static str,
    /// Rendered value before.
    pub before: String,
    /// Rendered value after.
    pub after: String,
}

/// Field-by-field difference between two [`AgentState`] values.
///
/// Used for trace output and debugging; the store never relies on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StateDiff {
    /// Fields whose value changed, in declaration order.
    pub changes: Vec<FieldChange>,
}

impl StateDiff {
    /// Compare two states.
    pub fn compute(old: &AgentState, new: &AgentState) -> Self {
        let mut changes = Vec::new();
        let mut check = |field: &'static str, before: String, after: String| {
            if before != after {
                changes.push(FieldChange {
                    field,
                    before,
                    after,
                });
            }
        };

        check("npc_name", old.npc_name.clone(), new.npc_name.clone());
        check("role", old.role.clone(), new.role.clone());
        check(
            "affinity",
            format!("{:.3}", old.affinity),
            format!("{:.3}", new.affinity),
        );
        check("mood", old.mood.clone(), new.mood.clone());
        check("player_name", old.player_name.clone(), new.player_name.clone());
        check(
            "player_playstyle",
            old.player_playstyle.clone(),
            new.player_playstyle.clone(),
        );
        check(
            "recent_memory",
            old.recent_memory.clone(),
            new.recent_memory.clone(),
        );

        Self { changes }
    }

    /// Whether the two states were identical.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Human-readable multi-line summary.
    pub fn summary(&self) -> String {
        if self.changes.is_empty() {
            return String::from("No state changes.");
        }
        let mut out = String::from("State Changes:");
        for change in &self.changes {
            out.push_str("\n  ");
            out.push_str(change.field);
            out.push_str(": ");
            out.push_str(&change.before);
            out.push_str(" -> ");
            out.push_str(&change.after);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lydia() -> AgentState {
        AgentState::new("Lydia", "Housecarl").with_affinity(0.5)
    }

    #[test]
    fn with_affinity_clamps() {
        assert!((AgentState::new("A", "B").with_affinity(3.0).affinity - 1.0).abs() < 1e-9);
        assert!((AgentState::new("A", "B").with_affinity(-3.0).affinity + 1.0).abs() < 1e-9);
    }

    #[test]
    fn attitude_bands() {
        assert_eq!(lydia().with_affinity(0.9).attitude(), "Devoted, warm, protective.");
        assert_eq!(lydia().with_affinity(0.3).attitude(), "Friendly, cooperative.");
        assert_eq!(lydia().with_affinity(0.0).attitude(), "Neutral, professional.");
        assert_eq!(lydia().with_affinity(-0.5).attitude(), "Cold, suspicious, dismissive.");
        assert_eq!(lydia().with_affinity(-0.9).attitude(), "Hostile, contemptuous.");
    }

    #[test]
    fn fact_salience_is_clamped() {
        let fact = Fact::new(String::from("x"), Vec::new(), String::new(), 4.0);
        assert!((fact.salience - 1.0).abs() < 1e-9);
    }

    #[test]
    fn fact_mentions_is_case_insensitive() {
        let fact = Fact::new(String::from("Player gave me a Sword"), Vec::new(), String::new(), 0.5);
        assert!(fact.mentions("sword"));
        assert!(!fact.mentions("shield"));
    }

    #[test]
    fn diff_reports_changed_fields_only() {
        let old = lydia();
        let new = lydia().with_affinity(0.7).with_mood("Happy");
        let diff = StateDiff::compute(&old, &new);
        let fields: Vec<&str> = diff.changes.iter().map(|c| c.field).collect();
        assert_eq!(fields, vec!["affinity", "mood"]);
        assert!(diff.summary().contains("mood: Neutral -> Happy"));
    }

    #[test]
    fn diff_of_identical_states_is_empty() {
        let diff = StateDiff::compute(&lydia(), &lydia());
        assert!(diff.is_empty());
        assert_eq!(diff.summary(), "No state changes.");
    }
}
