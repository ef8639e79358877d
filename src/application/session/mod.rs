//! # Sessions
//!
//! Multi-step interactions carried through chat events. A session is registered with
//! the [`SessionRegistry`], receives every event of the kinds it subscribed to from
//! its audience, and is disposed exactly once when it finishes, expires, is cancelled
//! or the bot shuts down.

pub mod exchange;
pub mod lottery;
pub mod registry;

use crate::domain::types::{EventMask, InteractionEvent};
use async_trait::async_trait;
use std::time::Duration;

pub use registry::{SessionHandle, SessionRegistry};

/// What a session made of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Not addressed to this session, or not valid in its current state.
    Ignored,
    /// Addressed to the session but malformed. Reported inline, state unchanged.
    Rejected,
    /// A well-formed interaction was applied. Restarts the timeout.
    Accepted,
    /// The session reached its terminal state and must be disposed.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Expired,
    Cancelled,
    Shutdown,
}

/// Who may address a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Audience {
    /// Only the owner and the participants.
    #[default]
    Members,
    /// Anyone in the room, e.g. lottery entrants.
    Anyone,
}

/// Registration parameters shared by every session type.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Sessions of the same kind never share a member.
    pub kind: &'static str,
    pub owner: String,
    pub participants: Vec<String>,
    pub mask: EventMask,
    pub audience: Audience,
    pub timeout: Duration,
    /// Whether accepted interactions push the deadline back. A fixed deadline expires
    /// `timeout` after creation no matter what.
    pub sliding: bool,
}

impl SessionSpec {
    pub fn members(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.owner.as_str()).chain(self.participants.iter().map(String::as_str))
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.members().any(|m| m == user_id)
    }

    pub fn accepts(&self, user_id: &str) -> bool {
        self.audience == Audience::Anyone || self.is_member(user_id)
    }
}

#[async_trait]
pub trait Session: Send {
    /// Applies an event whose kind matches the mask and whose sender is in the audience.
    async fn handle_event(&mut self, event: &InteractionEvent) -> Step;

    /// Reverses transient UI state. Must tolerate the session's message being gone.
    async fn dispose(&mut self, reason: EndReason);
}
