//! Conversation participant identities.
//!
//! Every message sender -- human user, registered bot, or the coordinator
//! itself -- is a `Participant`. Bots additionally carry a `BotDescriptor`
//! (see [`crate::bot`]); this type is only the identity half.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A participant in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// UUIDv7 participant ID.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Whether this participant is a human or a bot.
    pub kind: ParticipantKind,
    /// When the participant was first seen.
    pub created_at: DateTime<Utc>,
}

/// The kind of a conversation participant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantKind {
    /// A human user.
    Human,
    /// A registered bot.
    Bot,
}

impl Participant {
    /// Create a human participant with a fresh UUIDv7.
    pub fn human(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            kind: ParticipantKind::Human,
            created_at: Utc::now(),
        }
    }

    /// Create a bot participant with a given ID (the bot's descriptor ID).
    pub fn bot(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            kind: ParticipantKind::Bot,
            created_at: Utc::now(),
        }
    }

    /// Whether this participant is a human.
    pub fn is_human(&self) -> bool {
        self.kind == ParticipantKind::Human
    }
}
