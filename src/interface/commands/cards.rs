//! # Collection Commands
//!
//! `.cards [user]` lists a collection, `.wish <character>` edits the sender's wishlist.

use crate::application::executor::{Executable, Priority};
use crate::application::store::SharedStore;
use crate::domain::cards::CharacterId;
use crate::domain::traits::{ChatProvider, SharedChat};
use crate::domain::types::is_user_id;
use crate::strings::messages;
use anyhow::Result;

const MAX_LISTED: usize = 50;

pub async fn handle_cards(
    store: &SharedStore,
    chat: &dyn ChatProvider,
    sender: &str,
    args: &str,
) -> Result<()> {
    let target = match args.trim() {
        "" => sender,
        other if is_user_id(other) => other,
        _ => {
            chat.send_message(messages::CARDS_USAGE).await.map_err(|e| anyhow::anyhow!(e))?;
            return Ok(());
        }
    };

    let msg = match store.user(target).await {
        Some(user) if !user.deck.cards.is_empty() => {
            let mut lines = vec![messages::collection_header(
                target,
                user.deck.cards.len(),
                user.deck.karma,
            )];
            lines.extend(user.deck.cards.iter().take(MAX_LISTED).map(|c| c.short_string()));
            if user.deck.cards.len() > MAX_LISTED {
                lines.push(format!("… and {} more", user.deck.cards.len() - MAX_LISTED));
            }
            lines.join("\n")
        }
        _ => messages::empty_collection(target),
    };
    chat.send_message(&msg).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// Builds the executable for `.wish`. Replies with usage and returns `None` on bad input.
pub async fn wish(
    store: &SharedStore,
    chat: &SharedChat,
    sender: &str,
    args: &str,
) -> Result<Option<Executable>> {
    let Ok(character) = args.trim().parse::<CharacterId>() else {
        chat.send_message(messages::WISH_USAGE).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(None);
    };

    let store = store.clone();
    let chat = chat.clone();
    let user_id = sender.to_string();
    let exe = Executable::new(format!("wish {user_id}"), Priority::Normal, async move {
        store
            .write()
            .await
            .user_mut(&user_id)
            .deck
            .wishlist
            .characters
            .insert(character);
        store.save().await?;
        chat.send_message(&messages::wish_added(character))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    });
    Ok(Some(exe))
}
