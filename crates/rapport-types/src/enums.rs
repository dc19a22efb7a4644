//! Enumeration types shared across the workspace.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Player interactions
// ---------------------------------------------------------------------------

/// A classified player action directed at an agent.
///
/// Each kind carries a base affinity weight (scaled by event strength) and,
/// for most kinds, the mood the agent adopts in response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerEventKind {
    /// Neutral conversation.
    Talk,
    /// The player gave the agent an item.
    Gift,
    /// The player complimented the agent.
    Praise,
    /// The player assisted the agent.
    Help,
    /// The player finished a quest for the agent.
    QuestComplete,
    /// The player struck the agent.
    Punch,
    /// The player insulted the agent.
    Insult,
    /// The player threatened the agent.
    Threaten,
    /// The player stole from the agent.
    Theft,
}

impl PlayerEventKind {
    /// Base affinity change for this interaction at strength 1.0.
    pub const fn affinity_weight(self) -> f64 {
        match self {
            Self::Gift => 0.15,
            Self::Praise => 0.08,
            Self::Help => 0.06,
            Self::Punch => -0.35,
            Self::Insult => -0.20,
            Self::Threaten => -0.25,
            Self::Theft => -0.15,
            Self::Talk | Self::QuestComplete => 0.0,
        }
    }

    /// Mood the agent switches to, if this interaction sets one.
    pub const fn mood(self) -> Option<&'static str> {
        match self {
            Self::Gift => Some("Pleased"),
            Self::Praise => Some("Warm"),
            Self::Help => Some("Grateful"),
            Self::Punch => Some("Angry"),
            Self::Insult => Some("Offended"),
            Self::Threaten => Some("Hostile"),
            Self::Theft => Some("Suspicious"),
            Self::Talk | Self::QuestComplete => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Dialogue
// ---------------------------------------------------------------------------

/// Speaker of a recorded dialogue turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The player.
    User,
    /// The agent's generated reply.
    Assistant,
}

impl TurnRole {
    /// Wire name used in event payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    /// Parse a wire name back into a role.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}
