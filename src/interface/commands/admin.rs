//! # Admin Commands
//!
//! Handles `.grant` and `.transfer`.
//! Both run at high priority so moderation overtakes the routine backlog.

use crate::application::executor::{Executable, Priority};
use crate::application::store::SharedStore;
use crate::domain::cards::{Card, CardId, CharacterId, Rarity};
use crate::domain::traits::SharedChat;
use crate::domain::types::is_user_id;
use crate::strings::messages;
use anyhow::Result;

#[derive(Debug, Clone, PartialEq)]
struct GrantArgs {
    user: String,
    character: CharacterId,
    name: String,
    rarity: Rarity,
}

fn parse_grant(args: &str) -> Option<GrantArgs> {
    let mut tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.len() < 3 {
        return None;
    }
    let user = tokens.remove(0).to_string();
    if !is_user_id(&user) {
        return None;
    }
    let character = tokens.remove(0).parse().ok()?;
    let rarity = match tokens.last().map(|t| t.parse::<Rarity>()) {
        Some(Ok(rarity)) if tokens.len() > 1 => {
            tokens.pop();
            rarity
        }
        _ => Rarity::default(),
    };
    Some(GrantArgs {
        user,
        character,
        name: tokens.join(" "),
        rarity,
    })
}

fn parse_transfer(args: &str) -> Option<(String, Vec<CardId>)> {
    let mut tokens = args.split_whitespace();
    let user = tokens.next().filter(|u| is_user_id(u))?.to_string();
    let ids = tokens
        .map(|t| t.parse::<CardId>())
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    if ids.is_empty() {
        return None;
    }
    Some((user, ids))
}

/// `.grant <user> <character> <name> [rarity]` creates a fresh card.
pub async fn grant(store: &SharedStore, chat: &SharedChat, args: &str) -> Result<Option<Executable>> {
    let Some(grant) = parse_grant(args) else {
        chat.send_message(messages::GRANT_USAGE).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(None);
    };

    let store = store.clone();
    let chat = chat.clone();
    let exe = Executable::new(format!("grant {}", grant.user), Priority::High, async move {
        let card = {
            let mut data = store.write().await;
            let card = Card {
                id: data.allocate_card_id(),
                name: grant.name,
                character: grant.character,
                rarity: grant.rarity,
                ..Card::default()
            };
            data.user_mut(&grant.user).deck.cards.push(card.clone());
            card
        };
        store.save().await?;
        tracing::info!("Granted card {} to {}", card.id, grant.user);
        chat.send_message(&messages::card_granted(&grant.user, &card.short_string()))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    });
    Ok(Some(exe))
}

/// `.transfer <user> <ids...>` moves cards to `user` from whoever holds them,
/// without any trade effects.
pub async fn transfer(
    store: &SharedStore,
    chat: &SharedChat,
    args: &str,
) -> Result<Option<Executable>> {
    let Some((target, ids)) = parse_transfer(args) else {
        chat.send_message(messages::TRANSFER_USAGE).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(None);
    };

    let store = store.clone();
    let chat = chat.clone();
    let exe = Executable::new(format!("transfer to {target}"), Priority::High, async move {
        let moved = {
            let mut data = store.write().await;
            let mut taken = Vec::new();
            for user in data.users.values_mut().filter(|u| u.id != target) {
                for &id in &ids {
                    if let Some(mut card) = user.deck.take_card(id) {
                        card.active = false;
                        taken.push(card);
                    }
                }
            }
            let moved = taken.len();
            data.user_mut(&target).deck.cards.extend(taken);
            moved
        };
        if moved == 0 {
            anyhow::bail!("none of the cards were found");
        }
        store.save().await?;
        chat.send_message(&messages::cards_transferred(&target, moved, ids.len()))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    });
    Ok(Some(exe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grant() {
        let parsed = parse_grant("@a:x 7 Asuna Yuuki SS").unwrap();
        assert_eq!(parsed.user, "@a:x");
        assert_eq!(parsed.character, 7);
        assert_eq!(parsed.name, "Asuna Yuuki");
        assert_eq!(parsed.rarity, Rarity::SS);

        // A lone trailing token is the name, even if it looks like a rarity.
        let parsed = parse_grant("@a:x 7 A").unwrap();
        assert_eq!(parsed.name, "A");
        assert_eq!(parsed.rarity, Rarity::E);

        assert!(parse_grant("@a:x seven Asuna").is_none());
        assert!(parse_grant("@a:x 7").is_none());
        assert!(parse_grant("alice 7 Asuna").is_none());
    }

    #[test]
    fn test_parse_transfer() {
        assert_eq!(
            parse_transfer("@b:x 1 2"),
            Some(("@b:x".to_string(), vec![1, 2]))
        );
        assert!(parse_transfer("@b:x").is_none());
        assert!(parse_transfer("@b:x 1 two").is_none());
        assert!(parse_transfer("bob 1").is_none());
    }
}
