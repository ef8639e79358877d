//! # Matrix Service Adapter
//!
//! Implements the `ChatProvider` trait for the Matrix protocol using the `matrix_sdk`.
//! This module acts as the bridge between the generic `ChatProvider` interface used by the bot's core logic
//! and the specific implementation details of the Matrix SDK.
//!
//! Matrix has no "remove all reactions" call and reports reaction removal as a bare
//! redaction, so reactions on messages the bot marked itself are kept in a
//! [`ReactionIndex`] until their target is cleaned up.

use crate::domain::traits::ChatProvider;
use crate::domain::types::ReactionEvent;
use anyhow::Result;
use async_trait::async_trait;
use matrix_sdk::room::Room;
use matrix_sdk::ruma::EventId;
use matrix_sdk::ruma::events::reaction::ReactionEventContent;
use matrix_sdk::ruma::events::relation::{Annotation, Replacement};
use matrix_sdk::ruma::events::room::message::{
    Relation, RoomMessageEventContent, RoomMessageEventContentWithoutRelation,
};
use std::collections::{HashMap, VecDeque};
use std::convert::TryFrom;
use std::sync::{Arc, Mutex};

/// Upper bound on remembered reactions; the oldest are forgotten first.
pub const REACTION_INDEX_CAPACITY: usize = 4096;

#[derive(Debug)]
struct Tracked {
    reaction: ReactionEvent,
    own: bool,
}

#[derive(Debug, Default)]
struct Entries {
    by_id: HashMap<String, Tracked>,
    /// Reaction ids in insertion order. May hold ids that were already taken.
    order: VecDeque<String>,
    /// Number of the bot's own reactions per target message.
    targets: HashMap<String, usize>,
}

impl Entries {
    fn insert(&mut self, reaction_id: &str, tracked: Tracked) {
        if tracked.own {
            *self.targets.entry(tracked.reaction.target_id.clone()).or_default() += 1;
        }
        if let Some(old) = self.by_id.insert(reaction_id.to_string(), tracked) {
            self.forget_target(&old);
        } else {
            self.order.push_back(reaction_id.to_string());
        }
    }

    fn remove(&mut self, reaction_id: &str) -> Option<Tracked> {
        let tracked = self.by_id.remove(reaction_id)?;
        self.forget_target(&tracked);
        Some(tracked)
    }

    fn forget_target(&mut self, tracked: &Tracked) {
        if !tracked.own {
            return;
        }
        if let Some(count) = self.targets.get_mut(&tracked.reaction.target_id) {
            *count -= 1;
            if *count == 0 {
                self.targets.remove(&tracked.reaction.target_id);
            }
        }
    }

    fn shrink_to(&mut self, capacity: usize) {
        while self.by_id.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.remove(&oldest);
        }
        if self.order.len() > capacity * 2 {
            let by_id = &self.by_id;
            self.order.retain(|id| by_id.contains_key(id));
        }
    }
}

/// Reactions on messages the bot reacted to, keyed by the reaction's own event id.
#[derive(Debug)]
pub struct ReactionIndex {
    entries: Mutex<Entries>,
    capacity: usize,
}

impl Default for ReactionIndex {
    fn default() -> Self {
        Self::with_capacity(REACTION_INDEX_CAPACITY)
    }
}

impl ReactionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            capacity: capacity.max(1),
        }
    }

    /// Remembers a reaction the bot sent. Its target becomes tracked.
    pub fn record_own(&self, reaction_id: &str, reaction: ReactionEvent) {
        let mut entries = self.lock();
        entries.insert(reaction_id, Tracked { reaction, own: true });
        entries.shrink_to(self.capacity);
    }

    /// Remembers someone else's reaction if it annotates a tracked message.
    /// Returns whether it was kept.
    pub fn record(&self, reaction_id: &str, reaction: ReactionEvent) -> bool {
        let mut entries = self.lock();
        if !entries.targets.contains_key(&reaction.target_id) {
            return false;
        }
        entries.insert(reaction_id, Tracked { reaction, own: false });
        entries.shrink_to(self.capacity);
        true
    }

    /// Resolves a redaction back to the reaction it removed.
    pub fn take(&self, reaction_id: &str) -> Option<ReactionEvent> {
        self.lock().remove(reaction_id).map(|t| t.reaction)
    }

    /// Forgets every reaction on `target_id`, returning the ids of the bot's own.
    pub fn drain_target(&self, target_id: &str) -> Vec<String> {
        let mut entries = self.lock();
        let ids: Vec<String> = entries
            .by_id
            .iter()
            .filter(|(_, t)| t.reaction.target_id == target_id)
            .map(|(id, _)| id.clone())
            .collect();
        let mut own = Vec::new();
        for id in ids {
            if entries.remove(&id).is_some_and(|t| t.own) {
                own.push(id);
            }
        }
        own
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone)]
pub struct MatrixService {
    room: Room,
    reactions: Arc<ReactionIndex>,
}

impl MatrixService {
    pub fn new(room: Room, reactions: Arc<ReactionIndex>) -> Self {
        Self { room, reactions }
    }

    fn own_user_id(&self) -> String {
        self.room.own_user_id().as_str().to_string()
    }

    /// Helper to send markdown edits
    async fn internal_edit(&self, event_id: &str, new_content: &str) -> Result<()> {
        let event_id = <&EventId>::try_from(event_id)?;
        let mut content = RoomMessageEventContent::text_markdown(new_content);
        let replacement_content = RoomMessageEventContentWithoutRelation::from(content.clone());

        content.relates_to = Some(Relation::Replacement(Replacement::new(
            event_id.to_owned(),
            replacement_content,
        )));

        self.room.send(content).await?;
        Ok(())
    }

    async fn internal_react(&self, event_id: &str, key: &str) -> Result<String> {
        let target = <&EventId>::try_from(event_id)?;
        let content = ReactionEventContent::new(Annotation::new(target.to_owned(), key.to_string()));
        let response = self.room.send(content).await?;
        Ok(response.event_id.to_string())
    }

    async fn internal_redact(&self, event_id: &str) -> Result<()> {
        let event_id = <&EventId>::try_from(event_id)?;
        self.room.redact(event_id, None, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ChatProvider for MatrixService {
    fn room_id(&self) -> String {
        self.room.room_id().as_str().to_string()
    }

    async fn send_message(&self, content: &str) -> Result<String, String> {
        tracing::info!("Bot sending message to {}: {}", self.room_id(), content);
        self.room
            .send(RoomMessageEventContent::text_markdown(content))
            .await
            .map(|resp| resp.event_id.to_string())
            .map_err(|e| e.to_string())
    }

    async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), String> {
        self.internal_edit(message_id, content)
            .await
            .map_err(|e| e.to_string())
    }

    async fn react(&self, message_id: &str, key: &str) -> Result<(), String> {
        let reaction_id = self
            .internal_react(message_id, key)
            .await
            .map_err(|e| e.to_string())?;
        self.reactions.record_own(
            &reaction_id,
            ReactionEvent {
                room_id: self.room_id(),
                target_id: message_id.to_string(),
                sender: self.own_user_id(),
                key: key.to_string(),
            },
        );
        Ok(())
    }

    async fn clear_reactions(&self, message_id: &str) -> Result<(), String> {
        let own = self.reactions.drain_target(message_id);
        let mut failed = 0;
        for reaction_id in &own {
            if let Err(e) = self.internal_redact(reaction_id).await {
                tracing::debug!("Failed to redact reaction {}: {}", reaction_id, e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(format!("{failed} of {} reactions could not be removed", own.len()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reaction(target: &str, sender: &str, key: &str) -> ReactionEvent {
        ReactionEvent {
            room_id: "!r:x".into(),
            target_id: target.into(),
            sender: sender.into(),
            key: key.into(),
        }
    }

    #[test]
    fn test_redaction_resolves_to_reaction() {
        let index = ReactionIndex::new();
        index.record_own("$bot", reaction("$msg", "@bot:x", "1️⃣"));
        assert!(index.record("$r1", reaction("$msg", "@a:x", "1️⃣")));
        assert_eq!(index.take("$r1").unwrap().key, "1️⃣");
        assert!(index.take("$r1").is_none());
    }

    #[test]
    fn test_reactions_on_unmarked_messages_are_not_kept() {
        let index = ReactionIndex::new();
        assert!(!index.record("$chat", reaction("$small-talk", "@a:x", "👍")));
        assert_eq!(index.len(), 0);
        assert!(index.take("$chat").is_none());

        // Once the bot's marker is gone the message stops being tracked.
        index.record_own("$bot", reaction("$msg", "@bot:x", "✅"));
        index.take("$bot");
        assert!(!index.record("$late", reaction("$msg", "@a:x", "✅")));
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_drain_target_returns_only_own_reactions() {
        let index = ReactionIndex::new();
        index.record_own("$bot1", reaction("$msg", "@bot:x", "1️⃣"));
        index.record_own("$bot2", reaction("$msg", "@bot:x", "2️⃣"));
        index.record("$user", reaction("$msg", "@a:x", "1️⃣"));
        index.record_own("$other", reaction("$elsewhere", "@bot:x", "✅"));

        let mut own = index.drain_target("$msg");
        own.sort();
        assert_eq!(own, vec!["$bot1".to_string(), "$bot2".to_string()]);
        assert!(index.take("$user").is_none());
        assert!(index.take("$other").is_some());
        assert!(!index.record("$again", reaction("$msg", "@a:x", "1️⃣")));
    }

    #[test]
    fn test_capacity_forgets_oldest() {
        let index = ReactionIndex::with_capacity(3);
        for i in 0..5 {
            index.record_own(&format!("$bot{i}"), reaction(&format!("$msg{i}"), "@bot:x", "✅"));
        }
        assert_eq!(index.len(), 3);
        assert!(index.take("$bot0").is_none());
        // Evicted markers no longer make their message tracked.
        assert!(!index.record("$u1", reaction("$msg1", "@a:x", "✅")));
        assert!(index.record("$u4", reaction("$msg4", "@a:x", "✅")));
        assert_eq!(index.len(), 3);
    }
}
