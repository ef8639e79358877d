//! # Exchange Command
//!
//! Handles `.exchange <user>`.
//! Opens an [`ExchangeSession`] between the sender and the named user.

use crate::application::executor::Executor;
use crate::application::session::exchange::{self, ExchangeSession};
use crate::application::session::SessionRegistry;
use crate::application::store::SharedStore;
use crate::domain::errors::SessionError;
use crate::domain::traits::SharedChat;
use crate::domain::types::is_user_id;
use crate::strings::messages;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub async fn handle_exchange(
    store: &SharedStore,
    executor: &Arc<Executor>,
    sessions: &SessionRegistry,
    timeout: Duration,
    chat: &SharedChat,
    sender: &str,
    args: &str,
) -> Result<()> {
    let partner = args.trim();
    if !is_user_id(partner) {
        chat.send_message(messages::EXCHANGE_USAGE).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    }
    if partner == sender {
        chat.send_message(messages::EXCHANGE_WITH_SELF).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    }
    for user in [sender, partner] {
        if sessions.is_busy(exchange::KIND, user).await {
            chat.send_message(&messages::exchange_busy(user)).await.map_err(|e| anyhow::anyhow!(e))?;
            return Ok(());
        }
    }

    let session = ExchangeSession::open(
        chat.clone(),
        store.clone(),
        executor.clone(),
        sender,
        partner,
        timeout,
    )
    .await?;
    let message_id = session.message_id().to_string();

    match sessions.create(session.spec(), Box::new(session)).await {
        Ok(handle) => {
            tracing::info!("Exchange {} opened: {} <-> {}", handle.id, sender, partner);
        }
        Err(SessionError::AlreadyActive(user)) => {
            // Lost a race with another `.exchange`; retract the view we just posted.
            let busy = messages::exchange_busy(&user);
            let _ = chat.clear_reactions(&message_id).await;
            chat.edit_message(&message_id, &busy).await.map_err(|e| anyhow::anyhow!(e))?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
