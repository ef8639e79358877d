//! # Inbound Events
//!
//! Entry point for everything the transport delivers. Each event is first offered to
//! the live sessions; text messages are then routed as commands.
//!
//! The transport awaits its handlers one after another, so every event is handled on
//! its own task and a slow session or command never holds up the sync loop.

use crate::application::router::CommandRouter;
use crate::application::session::SessionRegistry;
use crate::domain::traits::SharedChat;
use crate::domain::types::InteractionEvent;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub struct EventHandler {
    router: CommandRouter,
    sessions: Arc<SessionRegistry>,
}

impl EventHandler {
    pub fn new(router: CommandRouter, sessions: Arc<SessionRegistry>) -> Self {
        Self { router, sessions }
    }

    /// Handles `event` on a task of its own.
    pub fn spawn(self: &Arc<Self>, chat: SharedChat, event: InteractionEvent) -> JoinHandle<()> {
        let handler = self.clone();
        tokio::spawn(async move { handler.handle(chat, event).await })
    }

    pub async fn handle(&self, chat: SharedChat, event: InteractionEvent) {
        let taken = self.sessions.dispatch(&event).await;
        if taken > 0 {
            tracing::debug!("{:?} from {} taken by {} session(s)", event.kind(), event.sender(), taken);
        }

        if let InteractionEvent::Message(msg) = &event {
            if let Err(e) = self.router.route(&chat, &msg.body, &msg.sender).await {
                tracing::error!("Failed to route message: {}", e);
            }
        }
    }
}
