//! # Domain Types
//!
//! Interaction events delivered by the chat transport and the masks sessions use
//! to subscribe to them.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Identifier of a live session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether `s` looks like a Matrix user id (`@localpart:server`).
pub fn is_user_id(s: &str) -> bool {
    static USER_ID: OnceLock<Regex> = OnceLock::new();
    USER_ID
        .get_or_init(|| Regex::new(r"^@[^\s:]+:\S+$").expect("user id pattern is valid"))
        .is_match(s)
}

/// A text message posted in a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub room_id: String,
    pub event_id: String,
    pub sender: String,
    pub body: String,
}

/// A reaction added to (or removed from) a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionEvent {
    pub room_id: String,
    /// The message the reaction annotates.
    pub target_id: String,
    pub sender: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractionEvent {
    Message(MessageEvent),
    ReactionAdded(ReactionEvent),
    ReactionRemoved(ReactionEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    ReactionAdded,
    ReactionRemoved,
}

impl InteractionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Message(_) => EventKind::Message,
            Self::ReactionAdded(_) => EventKind::ReactionAdded,
            Self::ReactionRemoved(_) => EventKind::ReactionRemoved,
        }
    }

    pub fn sender(&self) -> &str {
        match self {
            Self::Message(m) => &m.sender,
            Self::ReactionAdded(r) | Self::ReactionRemoved(r) => &r.sender,
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            Self::Message(m) => &m.room_id,
            Self::ReactionAdded(r) | Self::ReactionRemoved(r) => &r.room_id,
        }
    }

    /// Reaction payload for either reaction kind.
    pub fn reaction(&self) -> Option<&ReactionEvent> {
        match self {
            Self::ReactionAdded(r) | Self::ReactionRemoved(r) => Some(r),
            Self::Message(_) => None,
        }
    }
}

/// Set of event kinds a session subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMask(u8);

impl EventMask {
    pub const MESSAGES: Self = Self(0b001);
    pub const REACTION_ADDED: Self = Self(0b010);
    pub const REACTION_REMOVED: Self = Self(0b100);
    pub const ALL_REACTIONS: Self = Self(0b110);
    pub const ALL: Self = Self(0b111);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn matches(self, kind: EventKind) -> bool {
        let bit = match kind {
            EventKind::Message => Self::MESSAGES.0,
            EventKind::ReactionAdded => Self::REACTION_ADDED.0,
            EventKind::ReactionRemoved => Self::REACTION_REMOVED.0,
        };
        self.0 & bit != 0
    }
}
