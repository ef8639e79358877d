//! # In-Memory Chat
//!
//! A `ChatProvider` that records every call instead of talking to a homeserver.
//! Used by tests of sessions and command handlers.

use crate::domain::traits::ChatProvider;
use async_trait::async_trait;
use std::sync::Mutex;

pub const ROOM_ID: &str = "!test:localhost";

#[derive(Debug, Default)]
struct Recorded {
    next_id: u64,
    /// (event id, latest content)
    messages: Vec<(String, String)>,
    reactions: Vec<(String, String)>,
    cleared: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryChat {
    recorded: Mutex<Recorded>,
    fail_clear: bool,
}

impl MemoryChat {
    pub fn new() -> Self {
        Self::default()
    }

    /// A chat whose reaction cleanup always fails, as if the message was deleted.
    pub fn with_failing_cleanup() -> Self {
        Self {
            fail_clear: true,
            ..Self::default()
        }
    }

    /// Current content of every message sent, oldest first.
    pub fn messages(&self) -> Vec<String> {
        let recorded = self.recorded.lock().unwrap();
        recorded.messages.iter().map(|(_, c)| c.clone()).collect()
    }

    pub fn content(&self, message_id: &str) -> Option<String> {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .messages
            .iter()
            .find(|(id, _)| id == message_id)
            .map(|(_, c)| c.clone())
    }

    pub fn last_message(&self) -> Option<String> {
        self.messages().pop()
    }

    /// Reactions currently on `message_id`, in the order they were added.
    pub fn reactions(&self, message_id: &str) -> Vec<String> {
        let recorded = self.recorded.lock().unwrap();
        recorded
            .reactions
            .iter()
            .filter(|(id, _)| id == message_id)
            .map(|(_, k)| k.clone())
            .collect()
    }

    pub fn clear_count(&self, message_id: &str) -> usize {
        let recorded = self.recorded.lock().unwrap();
        recorded.cleared.iter().filter(|id| *id == message_id).count()
    }
}

#[async_trait]
impl ChatProvider for MemoryChat {
    async fn send_message(&self, content: &str) -> Result<String, String> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded.next_id += 1;
        let id = format!("$sent{}", recorded.next_id);
        recorded.messages.push((id.clone(), content.to_string()));
        Ok(id)
    }

    async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), String> {
        let mut recorded = self.recorded.lock().unwrap();
        match recorded.messages.iter_mut().find(|(id, _)| id == message_id) {
            Some((_, c)) => {
                *c = content.to_string();
                Ok(())
            }
            None => Err(format!("Unknown message {message_id}")),
        }
    }

    async fn react(&self, message_id: &str, key: &str) -> Result<(), String> {
        let mut recorded = self.recorded.lock().unwrap();
        recorded
            .reactions
            .push((message_id.to_string(), key.to_string()));
        Ok(())
    }

    async fn clear_reactions(&self, message_id: &str) -> Result<(), String> {
        if self.fail_clear {
            return Err("M_NOT_FOUND: message is gone".to_string());
        }
        let mut recorded = self.recorded.lock().unwrap();
        recorded.reactions.retain(|(id, _)| id != message_id);
        recorded.cleared.push(message_id.to_string());
        Ok(())
    }

    fn room_id(&self) -> String {
        ROOM_ID.to_string()
    }
}
