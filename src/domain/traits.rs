//! # Domain Traits
//!
//! Abstract interface for the chat transport.
//! Allows for pluggable implementations in the Infrastructure layer.

use async_trait::async_trait;
use std::sync::Arc;

/// Abstract interface for a Chat Provider (e.g., Matrix, Console)
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Send a message to the room, returning its event id
    async fn send_message(&self, content: &str) -> Result<String, String>;

    /// Edit a message in the room
    async fn edit_message(&self, message_id: &str, content: &str) -> Result<(), String>;

    /// Add a reaction to a message
    async fn react(&self, message_id: &str, key: &str) -> Result<(), String>;

    /// Remove every reaction the provider knows of on a message
    async fn clear_reactions(&self, message_id: &str) -> Result<(), String>;

    /// Get the current room ID
    fn room_id(&self) -> String;
}

pub type SharedChat = Arc<dyn ChatProvider>;
