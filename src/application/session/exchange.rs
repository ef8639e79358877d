//! # Exchange Session
//!
//! A two-party card trade negotiated in the room.
//!
//! Both players stage offers with `add <ids...>`, `remove <id>` and `tag <label>`,
//! then signal readiness with their own marker on the session message. Once both are
//! ready the first player and then the second must accept. The trade is committed as
//! a single executable; nothing touches the store before that, and only the executable
//! reports whether the trade went through.

use super::{Audience, EndReason, Session, SessionSpec, Step};
use crate::application::executor::{Executable, Executor, Priority};
use crate::application::store::{SharedStore, StoreData};
use crate::domain::cards::{self, Card, CardId, TradeSide, User};
use crate::domain::traits::SharedChat;
use crate::domain::types::{EventMask, InteractionEvent, MessageEvent, ReactionEvent};
use crate::strings::messages;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

pub const KIND: &str = "exchange";

pub const READY_P1: &str = "1️⃣";
pub const READY_P2: &str = "2️⃣";
pub const ACCEPT: &str = "✅";
pub const DECLINE: &str = "❎";

pub const ADDED: &str = "📥";
pub const REMOVED: &str = "📤";
pub const INVALID: &str = "❌";
pub const TAG_SET: &str = "✅";

/// Offers longer than this are summarised by their size.
const MAX_LISTED_CARDS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Add,
    AcceptP1,
    AcceptP2,
    End,
}

/// One side of the negotiation.
#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub user_id: String,
    /// Snapshot of the offered cards, in the order they were added.
    pub cards: Vec<Card>,
    /// Label applied to the cards this player receives.
    pub tag: Option<String>,
    pub accepted: bool,
    pub rendered: String,
}

impl PlayerInfo {
    fn new(user_id: &str) -> Self {
        let mut player = Self {
            user_id: user_id.to_string(),
            cards: Vec::new(),
            tag: None,
            accepted: false,
            rendered: String::new(),
        };
        player.render();
        player
    }

    pub fn offers(&self, id: CardId) -> bool {
        self.cards.iter().any(|c| c.id == id)
    }

    fn render(&mut self) {
        self.rendered = if self.cards.len() > MAX_LISTED_CARDS {
            messages::exchange_offer_count(&self.user_id, self.cards.len())
        } else {
            let lines: Vec<String> = self.cards.iter().map(Card::short_string).collect();
            messages::exchange_offer(&self.user_id, &lines)
        };
    }

    fn to_offer(&self) -> TradeOffer {
        TradeOffer {
            user_id: self.user_id.clone(),
            card_ids: self.cards.iter().map(|c| c.id).collect(),
            tag: self.tag.clone(),
        }
    }
}

/// What one side hands over when the trade is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradeOffer {
    pub user_id: String,
    pub card_ids: Vec<CardId>,
    pub tag: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Add(Vec<CardId>),
    Remove(CardId),
    Tag(&'a str),
}

#[derive(Debug, PartialEq, Eq)]
enum Parsed<'a> {
    /// Not meant for the session.
    Chatter,
    Malformed,
    Command(Command<'a>),
}

fn parse_command(body: &str) -> Parsed<'_> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    let Some((head, args)) = tokens.split_first() else {
        return Parsed::Chatter;
    };
    let command = match head.to_lowercase().as_str() {
        "add" => args
            .iter()
            .map(|t| t.parse::<CardId>())
            .collect::<Result<Vec<_>, _>>()
            .ok()
            .filter(|ids| !ids.is_empty())
            .map(Command::Add),
        "remove" => match args {
            [id] => id.parse().ok().map(Command::Remove),
            _ => None,
        },
        "tag" => match args {
            [label] => Some(Command::Tag(*label)),
            _ => None,
        },
        _ => return Parsed::Chatter,
    };
    command.map_or(Parsed::Malformed, Parsed::Command)
}

pub struct ExchangeSession {
    chat: SharedChat,
    store: SharedStore,
    executor: Arc<Executor>,
    message_id: String,
    name: String,
    tips: String,
    p1: PlayerInfo,
    p2: PlayerInfo,
    state: ExchangeState,
    timeout: Duration,
}

impl ExchangeSession {
    /// Posts the exchange view with both readiness markers and returns the session,
    /// ready to be registered.
    pub async fn open(
        chat: SharedChat,
        store: SharedStore,
        executor: Arc<Executor>,
        owner: &str,
        partner: &str,
        timeout: Duration,
    ) -> Result<Self> {
        let mut session = Self {
            chat,
            store,
            executor,
            message_id: String::new(),
            name: messages::exchange_title(owner, partner),
            tips: messages::exchange_tips_add(READY_P1, READY_P2),
            p1: PlayerInfo::new(owner),
            p2: PlayerInfo::new(partner),
            state: ExchangeState::Add,
            timeout,
        };
        session.message_id = session
            .chat
            .send_message(&session.view())
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        for key in [READY_P1, READY_P2] {
            session.mark(&session.message_id, key).await;
        }
        Ok(session)
    }

    pub fn spec(&self) -> SessionSpec {
        SessionSpec {
            kind: KIND,
            owner: self.p1.user_id.clone(),
            participants: vec![self.p2.user_id.clone()],
            mask: EventMask::ALL,
            audience: Audience::Members,
            timeout: self.timeout,
            sliding: true,
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn players(&self) -> (&PlayerInfo, &PlayerInfo) {
        (&self.p1, &self.p2)
    }

    fn view(&self) -> String {
        self.frame().render(&self.tips)
    }

    fn frame(&self) -> ExchangeView {
        ExchangeView {
            chat: self.chat.clone(),
            message_id: self.message_id.clone(),
            name: self.name.clone(),
            p1: self.p1.rendered.clone(),
            p2: self.p2.rendered.clone(),
        }
    }

    async fn refresh(&self) {
        if let Err(e) = self.chat.edit_message(&self.message_id, &self.view()).await {
            tracing::warn!("Failed to update exchange view {}: {}", self.message_id, e);
        }
    }

    async fn mark(&self, event_id: &str, key: &str) {
        if let Err(e) = self.chat.react(event_id, key).await {
            tracing::warn!("Failed to react {} on {}: {}", key, event_id, e);
        }
    }

    async fn handle_message(&mut self, msg: &MessageEvent) -> Step {
        if self.state != ExchangeState::Add
            || msg.event_id == self.message_id
            || msg.room_id != self.chat.room_id()
        {
            return Step::Ignored;
        }
        let is_p1 = msg.sender == self.p1.user_id;
        if !is_p1 && msg.sender != self.p2.user_id {
            return Step::Ignored;
        }

        match parse_command(&msg.body) {
            Parsed::Chatter => Step::Ignored,
            Parsed::Malformed => {
                self.mark(&msg.event_id, INVALID).await;
                Step::Rejected
            }
            Parsed::Command(Command::Add(ids)) => self.add_cards(msg, is_p1, ids).await,
            Parsed::Command(Command::Remove(id)) => self.remove_card(msg, is_p1, id).await,
            Parsed::Command(Command::Tag(label)) => {
                self.player_mut(is_p1).tag = Some(label.to_string());
                self.mark(&msg.event_id, TAG_SET).await;
                Step::Accepted
            }
        }
    }

    fn player_mut(&mut self, is_p1: bool) -> &mut PlayerInfo {
        if is_p1 { &mut self.p1 } else { &mut self.p2 }
    }

    async fn add_cards(&mut self, msg: &MessageEvent, is_p1: bool, ids: Vec<CardId>) -> Step {
        let (owner, recipient) = {
            let data = self.store.read().await;
            let (owner_id, recipient_id) = if is_p1 {
                (&self.p1.user_id, &self.p2.user_id)
            } else {
                (&self.p2.user_id, &self.p1.user_id)
            };
            (lookup(&data, owner_id), lookup(&data, recipient_id))
        };

        let player = self.player_mut(is_p1);
        let mut added = false;
        let mut invalid = false;
        for id in ids {
            match cards::check_offer(&owner, &recipient, id) {
                Ok(_) if player.offers(id) => {}
                Ok(card) => {
                    player.cards.push(card.clone());
                    added = true;
                }
                Err(reason) => {
                    tracing::debug!("Card {} refused for {}: {:?}", id, owner.id, reason);
                    invalid = true;
                }
            }
        }
        if added {
            player.accepted = false;
            player.render();
        }

        if added {
            self.mark(&msg.event_id, ADDED).await;
            self.refresh().await;
        }
        if invalid {
            self.mark(&msg.event_id, INVALID).await;
        }
        Step::Accepted
    }

    async fn remove_card(&mut self, msg: &MessageEvent, is_p1: bool, id: CardId) -> Step {
        let player = self.player_mut(is_p1);
        let Some(idx) = player.cards.iter().position(|c| c.id == id) else {
            self.mark(&msg.event_id, INVALID).await;
            return Step::Accepted;
        };
        player.cards.remove(idx);
        player.accepted = false;
        player.render();

        self.mark(&msg.event_id, REMOVED).await;
        self.refresh().await;
        Step::Accepted
    }

    async fn handle_reaction(&mut self, reaction: &ReactionEvent, added: bool) -> Step {
        if reaction.target_id != self.message_id {
            return Step::Ignored;
        }
        match (self.state, added) {
            (ExchangeState::Add, true) => self.ready(reaction).await,
            (ExchangeState::Add, false) => self.unready(reaction),
            (ExchangeState::AcceptP1 | ExchangeState::AcceptP2, true) => {
                self.answer(reaction).await
            }
            _ => Step::Ignored,
        }
    }

    fn ready_marker_owner(&mut self, reaction: &ReactionEvent) -> Option<&mut PlayerInfo> {
        if reaction.key == READY_P1 && reaction.sender == self.p1.user_id {
            Some(&mut self.p1)
        } else if reaction.key == READY_P2 && reaction.sender == self.p2.user_id {
            Some(&mut self.p2)
        } else {
            None
        }
    }

    async fn ready(&mut self, reaction: &ReactionEvent) -> Step {
        let Some(player) = self.ready_marker_owner(reaction) else {
            return Step::Ignored;
        };
        if player.accepted {
            return Step::Ignored;
        }
        player.accepted = true;

        if self.p1.accepted && self.p2.accepted {
            self.state = ExchangeState::AcceptP1;
            self.tips = messages::exchange_tips_accept(&self.p1.user_id, ACCEPT, DECLINE);
            if let Err(e) = self.chat.clear_reactions(&self.message_id).await {
                tracing::warn!("Failed to clear markers on {}: {}", self.message_id, e);
            }
            self.refresh().await;
            for key in [ACCEPT, DECLINE] {
                self.mark(&self.message_id, key).await;
            }
        }
        Step::Accepted
    }

    /// Withdrawing the marker withdraws readiness.
    fn unready(&mut self, reaction: &ReactionEvent) -> Step {
        match self.ready_marker_owner(reaction) {
            Some(player) if player.accepted => {
                player.accepted = false;
                Step::Accepted
            }
            _ => Step::Ignored,
        }
    }

    async fn answer(&mut self, reaction: &ReactionEvent) -> Step {
        let player = if self.state == ExchangeState::AcceptP1 {
            &self.p1
        } else {
            &self.p2
        };
        if reaction.sender != player.user_id {
            return Step::Ignored;
        }

        if reaction.key == DECLINE {
            self.tips = messages::exchange_declined(&player.user_id);
            self.state = ExchangeState::End;
            self.refresh().await;
            return Step::Finished;
        }
        if reaction.key != ACCEPT {
            return Step::Ignored;
        }

        if self.state == ExchangeState::AcceptP1 {
            self.state = ExchangeState::AcceptP2;
            self.tips = messages::exchange_tips_accept(&self.p2.user_id, ACCEPT, DECLINE);
            self.refresh().await;
            return Step::Accepted;
        }

        self.state = ExchangeState::End;
        self.commit().await;
        Step::Finished
    }

    /// Hands the trade to the executor. Once admitted, the executable itself rewrites
    /// the view with the outcome; the session never waits for it.
    async fn commit(&mut self) {
        if self.p1.cards.is_empty() && self.p2.cards.is_empty() {
            tracing::info!(
                "Exchange {} <-> {} closed with empty offers",
                self.p1.user_id,
                self.p2.user_id
            );
            self.tips = messages::EXCHANGE_COMPLETED.to_string();
            self.refresh().await;
            return;
        }

        // Shown before submitting so it can never overwrite the executable's report.
        self.tips = messages::EXCHANGE_COMMITTING.to_string();
        self.refresh().await;

        let exe = commit_executable(
            self.store.clone(),
            self.p1.to_offer(),
            self.p2.to_offer(),
            Some(self.frame()),
        );
        if !self
            .executor
            .submit(&exe, self.executor.default_admit_timeout())
            .await
        {
            tracing::error!(
                "Exchange {} <-> {} was not admitted to the queue",
                self.p1.user_id,
                self.p2.user_id
            );
            self.tips = messages::exchange_failed(messages::COMMAND_REJECTED);
            self.refresh().await;
        }
    }
}

/// Everything needed to redraw the exchange message once the session is gone.
#[derive(Clone)]
pub struct ExchangeView {
    chat: SharedChat,
    message_id: String,
    name: String,
    p1: String,
    p2: String,
}

impl ExchangeView {
    fn render(&self, tips: &str) -> String {
        messages::exchange_view(&self.name, &self.p1, &self.p2, tips)
    }

    async fn show(&self, tips: &str) {
        if let Err(e) = self.chat.edit_message(&self.message_id, &self.render(tips)).await {
            tracing::warn!("Failed to update exchange view {}: {}", self.message_id, e);
        }
    }
}

#[async_trait]
impl Session for ExchangeSession {
    async fn handle_event(&mut self, event: &InteractionEvent) -> Step {
        match event {
            InteractionEvent::Message(msg) => self.handle_message(msg).await,
            InteractionEvent::ReactionAdded(r) => self.handle_reaction(r, true).await,
            InteractionEvent::ReactionRemoved(r) => self.handle_reaction(r, false).await,
        }
    }

    async fn dispose(&mut self, reason: EndReason) {
        if reason == EndReason::Expired && self.state != ExchangeState::End {
            self.tips = messages::EXCHANGE_EXPIRED.to_string();
            self.refresh().await;
        }
        self.state = ExchangeState::End;
        if let Err(e) = self.chat.clear_reactions(&self.message_id).await {
            tracing::debug!("Could not clear reactions on {}: {}", self.message_id, e);
        }
    }
}

fn lookup(data: &StoreData, user_id: &str) -> User {
    data.users
        .get(user_id)
        .cloned()
        .unwrap_or_else(|| User::new(user_id))
}

/// Wraps the durable half of a trade into one executable. When a view is given, the
/// executable reports the outcome on it.
pub fn commit_executable(
    store: SharedStore,
    first: TradeOffer,
    second: TradeOffer,
    view: Option<ExchangeView>,
) -> Executable {
    let name = format!("exchange {} <-> {}", first.user_id, second.user_id);
    Executable::new(name, Priority::Normal, async move {
        let outcome = async {
            apply_trade(&store, &first, &second).await?;
            store.save().await
        }
        .await;
        if let Some(view) = view {
            let tips = match &outcome {
                Ok(()) => messages::EXCHANGE_COMPLETED.to_string(),
                Err(e) => messages::exchange_failed(&format!("{e:#}")),
            };
            view.show(&tips).await;
        }
        outcome
    })
}

/// Moves both offers between the two decks. Cards that are no longer owned or
/// exchangeable are skipped. Returns how many cards changed hands.
pub async fn apply_trade(store: &SharedStore, first: &TradeOffer, second: &TradeOffer) -> Result<usize> {
    if first.user_id == second.user_id {
        anyhow::bail!("Cannot trade with oneself");
    }
    let mut data = store.write().await;
    let mut a = data
        .users
        .remove(&first.user_id)
        .unwrap_or_else(|| User::new(&first.user_id));
    let mut b = data
        .users
        .remove(&second.user_id)
        .unwrap_or_else(|| User::new(&second.user_id));

    let from_a = still_tradeable(&a, &b, &first.card_ids);
    let from_b = still_tradeable(&b, &a, &second.card_ids);

    let a_side = TradeSide {
        user_id: &first.user_id,
        offered: first.card_ids.len(),
        tag: first.tag.as_deref(),
    };
    let b_side = TradeSide {
        user_id: &second.user_id,
        offered: second.card_ids.len(),
        tag: second.tag.as_deref(),
    };

    let now = Utc::now();
    let mut activities = Vec::new();
    let mut moved = 0;
    for id in from_a {
        if let Some(card) = a.deck.take_card(id) {
            activities.extend(cards::exchange_card(card, &mut a, a_side, &mut b, b_side, now));
            moved += 1;
        }
    }
    for id in from_b {
        if let Some(card) = b.deck.take_card(id) {
            activities.extend(cards::exchange_card(card, &mut b, b_side, &mut a, a_side, now));
            moved += 1;
        }
    }

    data.users.insert(a.id.clone(), a);
    data.users.insert(b.id.clone(), b);
    data.activities.extend(activities);
    tracing::info!(
        "Exchange {} <-> {} moved {} card(s)",
        first.user_id,
        second.user_id,
        moved
    );
    Ok(moved)
}

fn still_tradeable(owner: &User, recipient: &User, ids: &[CardId]) -> Vec<CardId> {
    ids.iter()
        .copied()
        .filter(|&id| match cards::check_offer(owner, recipient, id) {
            Ok(_) => true,
            Err(reason) => {
                tracing::warn!("Skipping card {} of {}: {:?}", id, owner.id, reason);
                false
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::store::CardStore;
    use crate::domain::cards::{ActivityKind, Dere};
    use crate::infrastructure::memory::{MemoryChat, ROOM_ID};
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::oneshot;

    const A: &str = "@alice:x";
    const B: &str = "@bob:x";

    static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

    fn card(id: CardId) -> Card {
        Card {
            id,
            name: format!("Card {id}"),
            character: id * 10,
            ..Card::default()
        }
    }

    struct Table {
        chat: Arc<MemoryChat>,
        store: SharedStore,
        executor: Arc<Executor>,
        session: ExchangeSession,
    }

    async fn table_on(
        chat: MemoryChat,
        executor: Arc<Executor>,
        a_cards: Vec<Card>,
        b_cards: Vec<Card>,
    ) -> Table {
        let mut data = StoreData::default();
        data.user_mut(A).deck.cards = a_cards;
        data.user_mut(B).deck.cards = b_cards;
        let store: SharedStore = Arc::new(CardStore::in_memory(data));
        let chat = Arc::new(chat);
        let session = ExchangeSession::open(
            chat.clone(),
            store.clone(),
            executor.clone(),
            A,
            B,
            Duration::from_millis(100),
        )
        .await
        .unwrap();
        Table {
            chat,
            store,
            executor,
            session,
        }
    }

    async fn table_with(chat: MemoryChat, a_cards: Vec<Card>, b_cards: Vec<Card>) -> Table {
        let executor = Arc::new(Executor::with_limits(8, None));
        table_on(chat, executor, a_cards, b_cards).await
    }

    async fn table(a_cards: Vec<Card>, b_cards: Vec<Card>) -> Table {
        table_with(MemoryChat::new(), a_cards, b_cards).await
    }

    /// Submits an executable that blocks the worker until released.
    async fn occupy(executor: &Executor) -> oneshot::Sender<()> {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let blocker = Executable::new("blocker", Priority::High, async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(())
        });
        assert!(executor.submit(&blocker, Duration::from_secs(1)).await);
        started_rx.await.unwrap();
        release_tx
    }

    impl Table {
        async fn say(&mut self, sender: &str, body: &str) -> (Step, String) {
            let event_id = format!("$m{}", EVENT_SEQ.fetch_add(1, Ordering::SeqCst));
            let event = InteractionEvent::Message(MessageEvent {
                room_id: ROOM_ID.into(),
                event_id: event_id.clone(),
                sender: sender.into(),
                body: body.into(),
            });
            (self.session.handle_event(&event).await, event_id)
        }

        async fn react(&mut self, sender: &str, key: &str) -> Step {
            let event = InteractionEvent::ReactionAdded(self.reaction(sender, key));
            self.session.handle_event(&event).await
        }

        async fn unreact(&mut self, sender: &str, key: &str) -> Step {
            let event = InteractionEvent::ReactionRemoved(self.reaction(sender, key));
            self.session.handle_event(&event).await
        }

        fn reaction(&self, sender: &str, key: &str) -> ReactionEvent {
            ReactionEvent {
                room_id: ROOM_ID.into(),
                target_id: self.session.message_id().into(),
                sender: sender.into(),
                key: key.into(),
            }
        }

        fn view(&self) -> String {
            self.chat.content(self.session.message_id()).unwrap()
        }

        /// Waits until everything queued so far has run.
        async fn settle(&self) {
            let marker = Executable::new("settle", Priority::Normal, async { Ok(()) });
            assert!(self.executor.submit(&marker, Duration::from_secs(1)).await);
            self.executor.await_completion(&marker).await.unwrap();
        }

        fn owned_ids(&self, data: &StoreData, user: &str) -> Vec<CardId> {
            data.users[user].deck.cards.iter().map(|c| c.id).collect()
        }

        async fn both_ready(&mut self) {
            assert_eq!(self.react(A, READY_P1).await, Step::Accepted);
            assert_eq!(self.react(B, READY_P2).await, Step::Accepted);
            assert_eq!(self.session.state(), ExchangeState::AcceptP1);
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("add 1 2"), Parsed::Command(Command::Add(vec![1, 2])));
        assert_eq!(parse_command("ADD\n3"), Parsed::Command(Command::Add(vec![3])));
        assert_eq!(parse_command("remove 4"), Parsed::Command(Command::Remove(4)));
        assert_eq!(parse_command("tag gift"), Parsed::Command(Command::Tag("gift")));
        assert_eq!(parse_command("add 1 x"), Parsed::Malformed);
        assert_eq!(parse_command("add"), Parsed::Malformed);
        assert_eq!(parse_command("remove 1 2"), Parsed::Malformed);
        assert_eq!(parse_command("tag two words"), Parsed::Malformed);
        assert_eq!(parse_command("tag"), Parsed::Malformed);
        assert_eq!(parse_command("hello there"), Parsed::Chatter);
        assert_eq!(parse_command(""), Parsed::Chatter);
    }

    #[tokio::test]
    async fn test_open_posts_view_with_ready_markers() {
        let t = table(vec![], vec![]).await;
        assert_eq!(t.session.state(), ExchangeState::Add);
        assert_eq!(t.chat.reactions(t.session.message_id()), vec![READY_P1, READY_P2]);
        assert!(t.view().contains(A) && t.view().contains(B));

        let spec = t.session.spec();
        assert_eq!(spec.kind, KIND);
        assert!(spec.is_member(A) && spec.is_member(B));
    }

    #[tokio::test]
    async fn test_happy_path_swaps_cards() {
        let mut t = table(vec![card(1)], vec![card(2)]).await;

        let (step, added) = t.say(A, "add 1").await;
        assert_eq!(step, Step::Accepted);
        assert_eq!(t.chat.reactions(&added), vec![ADDED]);
        assert_eq!(t.say(B, "add 2").await.0, Step::Accepted);
        assert!(t.view().contains("Card 1") && t.view().contains("Card 2"));

        t.both_ready().await;
        assert_eq!(t.chat.clear_count(t.session.message_id()), 1);
        assert_eq!(t.chat.reactions(t.session.message_id()), vec![ACCEPT, DECLINE]);

        // Out of turn.
        assert_eq!(t.react(B, ACCEPT).await, Step::Ignored);
        assert_eq!(t.react(A, ACCEPT).await, Step::Accepted);
        assert_eq!(t.session.state(), ExchangeState::AcceptP2);
        assert_eq!(t.react(B, ACCEPT).await, Step::Finished);
        assert_eq!(t.session.state(), ExchangeState::End);

        t.settle().await;
        assert!(t.view().contains(messages::EXCHANGE_COMPLETED));
        let data = t.store.read().await;
        assert_eq!(t.owned_ids(&data, A), vec![2]);
        assert_eq!(t.owned_ids(&data, B), vec![1]);
        let moved = data.users[B].deck.card(1).unwrap();
        assert_eq!(moved.first_owner.as_deref(), Some(A));
        assert!((moved.affection + 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_decline_changes_nothing() {
        for decline_as_p2 in [false, true] {
            let mut t = table(vec![card(1)], vec![card(2)]).await;
            t.say(A, "add 1").await;
            t.say(B, "add 2").await;
            let before = t.store.read().await.clone();

            t.both_ready().await;
            if decline_as_p2 {
                t.react(A, ACCEPT).await;
                assert_eq!(t.react(B, DECLINE).await, Step::Finished);
            } else {
                assert_eq!(t.react(A, DECLINE).await, Step::Finished);
            }
            assert_eq!(t.session.state(), ExchangeState::End);
            assert!(t.view().contains("declined"));

            let after = t.store.read().await;
            assert_eq!(after.users, before.users);
            assert!(after.activities.is_empty());
        }
    }

    #[tokio::test]
    async fn test_unexchangeable_cards_never_rendered() {
        let caged = Card {
            in_cage: true,
            ..card(1)
        };
        let away = Card {
            expedition: cards::Expedition::DarkExp,
            ..card(4)
        };
        let yami = Card {
            dere: Dere::Yami,
            ..card(5)
        };
        let mut t = table(vec![caged, card(3), away, yami], vec![]).await;
        t.store.write().await.user_mut(B).deck.karma = cards::GOOD_KARMA;

        let (step, event_id) = t.say(A, "add 1 3 4 5 99").await;
        assert_eq!(step, Step::Accepted);
        assert_eq!(t.chat.reactions(&event_id), vec![ADDED, INVALID]);

        let (p1, _) = t.session.players();
        assert_eq!(p1.cards.iter().map(|c| c.id).collect::<Vec<_>>(), vec![3]);
        let view = t.view();
        assert!(view.contains("Card 3"));
        for hidden in ["Card 1", "Card 4", "Card 5", "Card 99"] {
            assert!(!view.contains(hidden), "{hidden} must not be offered");
        }
    }

    #[tokio::test]
    async fn test_duplicate_figure_is_refused() {
        let figure = Card {
            from_figure: true,
            ..card(1)
        };
        let held = Card {
            from_figure: true,
            ..card(2)
        };
        let held = Card {
            character: figure.character,
            ..held
        };
        let mut t = table(vec![figure], vec![held]).await;
        let (_, event_id) = t.say(A, "add 1").await;
        assert_eq!(t.chat.reactions(&event_id), vec![INVALID]);
        assert!(t.session.players().0.cards.is_empty());
    }

    #[tokio::test]
    async fn test_offer_mutation_resets_readiness() {
        let mut t = table(vec![card(1), card(3)], vec![card(2)]).await;
        t.say(A, "add 1").await;
        assert_eq!(t.react(A, READY_P1).await, Step::Accepted);
        assert!(t.session.players().0.accepted);

        // The other side changing its offer leaves this side ready.
        t.say(B, "add 2").await;
        assert!(t.session.players().0.accepted);

        t.say(A, "add 3").await;
        assert!(!t.session.players().0.accepted);

        assert_eq!(t.unreact(A, READY_P1).await, Step::Ignored);
        assert_eq!(t.react(A, READY_P1).await, Step::Accepted);
        let (_, removed) = t.say(A, "remove 3").await;
        assert_eq!(t.chat.reactions(&removed), vec![REMOVED]);
        assert!(!t.session.players().0.accepted);
        assert!(!t.view().contains("Card 3"));

        // Re-adding a card already offered is a no-op.
        t.react(A, READY_P1).await;
        t.say(A, "add 1").await;
        assert!(t.session.players().0.accepted);
        assert_eq!(t.session.players().0.cards.len(), 1);
    }

    #[tokio::test]
    async fn test_withdrawing_marker_withdraws_readiness() {
        let mut t = table(vec![], vec![]).await;
        t.react(A, READY_P1).await;
        assert_eq!(t.unreact(A, READY_P1).await, Step::Accepted);
        assert!(!t.session.players().0.accepted);
        assert_eq!(t.react(B, READY_P2).await, Step::Accepted);
        assert_eq!(t.session.state(), ExchangeState::Add);
    }

    #[tokio::test]
    async fn test_markers_are_party_specific() {
        let mut t = table(vec![], vec![]).await;
        assert_eq!(t.react(A, READY_P2).await, Step::Ignored);
        assert_eq!(t.react(B, READY_P1).await, Step::Ignored);
        assert_eq!(t.react("@eve:x", READY_P1).await, Step::Ignored);
        assert!(!t.session.players().0.accepted && !t.session.players().1.accepted);
    }

    #[tokio::test]
    async fn test_non_participant_is_ignored() {
        let mut t = table(vec![card(1)], vec![]).await;
        assert_eq!(t.say("@eve:x", "add 1").await.0, Step::Ignored);
        assert!(t.session.players().0.cards.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_input_is_marked_without_state_change() {
        let mut t = table(vec![card(1)], vec![]).await;
        t.say(A, "add 1").await;
        t.react(A, READY_P1).await;

        for body in ["add 1 x", "remove one", "tag two words", "tag"] {
            let (step, event_id) = t.say(A, body).await;
            assert_eq!(step, Step::Rejected, "{body}");
            assert_eq!(t.chat.reactions(&event_id), vec![INVALID]);
        }
        let (p1, _) = t.session.players();
        assert_eq!(p1.cards.len(), 1);
        assert!(p1.accepted);
        assert!(p1.tag.is_none());

        assert_eq!(t.say(A, "nice cards").await.0, Step::Ignored);

        let (step, event_id) = t.say(A, "remove 7").await;
        assert_eq!(step, Step::Accepted);
        assert_eq!(t.chat.reactions(&event_id), vec![INVALID]);
    }

    #[tokio::test]
    async fn test_tag_labels_received_cards() {
        let mut t = table(vec![card(1)], vec![]).await;
        t.say(A, "add 1").await;
        let (step, event_id) = t.say(B, "tag gift").await;
        assert_eq!(step, Step::Accepted);
        assert_eq!(t.chat.reactions(&event_id), vec![TAG_SET]);

        t.both_ready().await;
        t.react(A, ACCEPT).await;
        t.react(B, ACCEPT).await;
        t.settle().await;

        let data = t.store.read().await;
        assert_eq!(data.users[B].deck.card(1).unwrap().tags, vec!["gift".to_string()]);
    }

    #[tokio::test]
    async fn test_commit_behind_backlog_reports_real_outcome() {
        let executor = Arc::new(Executor::with_limits(8, None));
        let release = occupy(&executor).await;
        let mut t = table_on(MemoryChat::new(), executor, vec![card(1)], vec![card(2)]).await;
        t.say(A, "add 1").await;
        t.say(B, "add 2").await;
        t.both_ready().await;
        t.react(A, ACCEPT).await;

        // Finishing does not wait for the queue.
        let step = tokio::time::timeout(Duration::from_millis(50), t.react(B, ACCEPT)).await;
        assert_eq!(step.unwrap(), Step::Finished);
        assert!(t.view().contains(messages::EXCHANGE_COMMITTING));

        // Well past the session timeout the trade is still pending, never reported failed.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!t.view().contains("failed"));
        assert_eq!(t.owned_ids(&*t.store.read().await, A), vec![1]);

        release.send(()).unwrap();
        t.settle().await;
        assert!(t.view().contains(messages::EXCHANGE_COMPLETED));
        let data = t.store.read().await;
        assert_eq!(t.owned_ids(&data, A), vec![2]);
        assert_eq!(t.owned_ids(&data, B), vec![1]);
    }

    #[tokio::test]
    async fn test_commit_refused_by_full_queue_changes_nothing() {
        let executor = Arc::new(Executor::with_limits(1, None));
        let release = occupy(&executor).await;
        let filler = Executable::new("filler", Priority::Normal, async { Ok(()) });
        assert!(executor.submit(&filler, Duration::from_secs(1)).await);

        let mut t = table_on(MemoryChat::new(), executor, vec![card(1)], vec![card(2)]).await;
        t.say(A, "add 1").await;
        t.say(B, "add 2").await;
        t.both_ready().await;
        t.react(A, ACCEPT).await;
        assert_eq!(t.react(B, ACCEPT).await, Step::Finished);
        assert!(t.view().contains(&messages::exchange_failed(messages::COMMAND_REJECTED)));

        release.send(()).unwrap();
        t.settle().await;
        let data = t.store.read().await;
        assert_eq!(t.owned_ids(&data, A), vec![1]);
        assert!(t.view().contains("failed"));
    }

    #[tokio::test]
    async fn test_commands_ignored_outside_add_state() {
        let mut t = table(vec![card(1)], vec![]).await;
        t.both_ready().await;
        assert_eq!(t.say(A, "add 1").await.0, Step::Ignored);
        assert!(t.session.players().0.cards.is_empty());
    }

    #[tokio::test]
    async fn test_empty_offers_commit_as_noop() {
        let mut t = table(vec![card(1)], vec![]).await;
        t.both_ready().await;
        t.react(A, ACCEPT).await;
        assert_eq!(t.react(B, ACCEPT).await, Step::Finished);
        assert!(t.view().contains(messages::EXCHANGE_COMPLETED));
        let data = t.store.read().await;
        assert_eq!(data.users[A].deck.cards.len(), 1);
        assert!(data.activities.is_empty());
    }

    #[tokio::test]
    async fn test_large_offer_is_summarised() {
        let mut t = table((1..=13).map(card).collect(), vec![]).await;
        let ids: Vec<String> = (1..=13).map(|i| i.to_string()).collect();
        t.say(A, &format!("add {}", ids.join(" "))).await;
        assert!(t.view().contains("**[13]** cards"));
        assert!(!t.view().contains("Card 13"));
    }

    #[tokio::test]
    async fn test_expiry_notice_and_cleanup_tolerate_missing_message() {
        let mut t = table_with(MemoryChat::with_failing_cleanup(), vec![], vec![]).await;
        t.session.dispose(EndReason::Expired).await;
        assert_eq!(t.session.state(), ExchangeState::End);
        assert!(t.view().contains(messages::EXCHANGE_EXPIRED));
    }

    #[tokio::test]
    async fn test_commit_skips_cards_that_changed_hands() {
        let mut data = StoreData::default();
        data.user_mut(A).deck.cards = vec![card(1), card(2)];
        data.user_mut(B).deck.cards = vec![card(3)];
        let store: SharedStore = Arc::new(CardStore::in_memory(data));

        // Card 2 was caged after it was offered.
        store.write().await.user_mut(A).deck.cards[1].in_cage = true;
        let first = TradeOffer {
            user_id: A.into(),
            card_ids: vec![1, 2],
            tag: None,
        };
        let second = TradeOffer {
            user_id: B.into(),
            card_ids: vec![3],
            tag: None,
        };
        assert_eq!(apply_trade(&store, &first, &second).await.unwrap(), 2);

        let data = store.read().await;
        let alice: Vec<_> = data.users[A].deck.cards.iter().map(|c| c.id).collect();
        assert_eq!(alice, vec![2, 3]);
        assert!(data.users[B].deck.card(1).is_some());
        assert!(apply_trade(&store, &first, &first).await.is_err());
    }

    #[tokio::test]
    async fn test_wishlist_fulfilment_is_logged() {
        let mut data = StoreData::default();
        data.user_mut(A).deck.cards = vec![card(1)];
        data.user_mut(B).deck.wishlist.characters.insert(10);
        let store: SharedStore = Arc::new(CardStore::in_memory(data));
        let executor = Executor::with_limits(4, None);

        let exe = commit_executable(
            store.clone(),
            TradeOffer {
                user_id: A.into(),
                card_ids: vec![1],
                tag: None,
            },
            TradeOffer {
                user_id: B.into(),
                card_ids: vec![],
                tag: None,
            },
            None,
        );
        assert!(executor.submit(&exe, Duration::from_secs(1)).await);
        executor.await_completion(&exe).await.unwrap();

        let data = store.read().await;
        assert!(data.users[B].deck.wishlist.characters.is_empty());
        assert_eq!(data.activities.len(), 1);
        assert_eq!(data.activities[0].kind, ActivityKind::AcquiredCardWishlist);
    }
}
