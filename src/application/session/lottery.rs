//! # Lottery Session
//!
//! A timed card giveaway. Anyone in the room enters by reacting on the announcement.
//! When the deadline passes one entrant is drawn at random and a handful of the
//! donor's cards move to them in a single executable, which also reports the result.

use super::{Audience, EndReason, Session, SessionSpec, Step};
use crate::application::executor::{Executable, Executor, Priority};
use crate::application::store::SharedStore;
use crate::domain::cards::{self, ActivityKind, CardId, Prize, User, UserActivity};
use crate::domain::traits::SharedChat;
use crate::domain::types::{EventMask, InteractionEvent, ReactionEvent};
use crate::strings::messages;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

pub const KIND: &str = "lottery";
pub const ENTER: &str = "🎟️";
const WISHED: &str = "💗 ";

/// What a lottery gives away and for how long each round stays open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LotteryPlan {
    pub donor: String,
    pub count: usize,
    pub duration: Duration,
    pub rounds: u32,
}

/// The outcome of a round, settled by the award executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    pub donor: String,
    pub winner: String,
    pub count: usize,
    /// Seeds the card pick so the executable owns no shared state.
    pub seed: u64,
}

pub struct LotterySession {
    chat: SharedChat,
    store: SharedStore,
    executor: Arc<Executor>,
    host: String,
    plan: LotteryPlan,
    view: LotteryView,
    entrants: Vec<String>,
    rng: StdRng,
    ended: Option<oneshot::Sender<EndReason>>,
}

impl LotterySession {
    /// Posts the announcement for round `round` (counted from 1) with the entry marker.
    /// The receiver resolves with the reason the round ended.
    pub async fn open(
        chat: SharedChat,
        store: SharedStore,
        executor: Arc<Executor>,
        host: &str,
        plan: LotteryPlan,
        round: u32,
    ) -> Result<(Self, oneshot::Receiver<EndReason>)> {
        let ends_at = Utc::now() + chrono::Duration::from_std(plan.duration)?;
        let footer = (plan.rounds > 1).then(|| messages::lottery_round(round, plan.rounds));
        let mut view = LotteryView {
            chat: chat.clone(),
            message_id: String::new(),
            footer,
        };
        let announcement = messages::lottery_open(ENTER, &ends_at.format("%H:%M:%S UTC").to_string());
        view.message_id = chat
            .send_message(&view.render(&announcement))
            .await
            .map_err(|e| anyhow::anyhow!(e))?;
        if let Err(e) = chat.react(&view.message_id, ENTER).await {
            tracing::warn!("Failed to react {} on {}: {}", ENTER, view.message_id, e);
        }

        let (tx, rx) = oneshot::channel();
        let session = Self {
            chat,
            store,
            executor,
            host: host.to_string(),
            plan,
            view,
            entrants: Vec::new(),
            rng: StdRng::from_entropy(),
            ended: Some(tx),
        };
        Ok((session, rx))
    }

    /// Entries only close when the round expires, so the deadline is fixed.
    pub fn spec(&self) -> SessionSpec {
        SessionSpec {
            kind: KIND,
            owner: self.host.clone(),
            participants: Vec::new(),
            mask: EventMask::ALL_REACTIONS,
            audience: Audience::Anyone,
            timeout: self.plan.duration,
            sliding: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.view.message_id
    }

    pub fn entrants(&self) -> &[String] {
        &self.entrants
    }

    fn handle_reaction(&mut self, reaction: &ReactionEvent, added: bool) -> Step {
        if reaction.target_id != self.view.message_id || reaction.key != ENTER {
            return Step::Ignored;
        }
        let known = self.entrants.iter().position(|e| *e == reaction.sender);
        match (added, known) {
            (true, None) => self.entrants.push(reaction.sender.clone()),
            (false, Some(idx)) => {
                self.entrants.remove(idx);
            }
            _ => return Step::Ignored,
        }
        Step::Accepted
    }

    /// Picks the winner and hands the prize to the executor without waiting for it.
    async fn draw(&mut self) {
        let pool: Vec<&String> = self
            .entrants
            .iter()
            .filter(|e| **e != self.plan.donor)
            .collect();
        let Some(winner) = pool.choose(&mut self.rng).map(|w| w.to_string()) else {
            tracing::info!("Lottery {} ended without entrants", self.view.message_id);
            self.view.show(messages::LOTTERY_NO_ENTRANTS).await;
            return;
        };
        tracing::info!(
            "Lottery {} drew {} out of {} entrant(s)",
            self.view.message_id,
            winner,
            pool.len()
        );

        let draw = Draw {
            donor: self.plan.donor.clone(),
            winner,
            count: self.plan.count,
            seed: self.rng.next_u64(),
        };
        let exe = award_executable(self.store.clone(), draw, Some(self.view.clone()));
        if !self
            .executor
            .submit(&exe, self.executor.default_admit_timeout())
            .await
        {
            tracing::error!("Lottery {} was not admitted to the queue", self.view.message_id);
            self.view
                .show(&messages::lottery_failed(messages::COMMAND_REJECTED))
                .await;
        }
    }
}

#[async_trait]
impl Session for LotterySession {
    async fn handle_event(&mut self, event: &InteractionEvent) -> Step {
        match event {
            InteractionEvent::ReactionAdded(r) => self.handle_reaction(r, true),
            InteractionEvent::ReactionRemoved(r) => self.handle_reaction(r, false),
            InteractionEvent::Message(_) => Step::Ignored,
        }
    }

    async fn dispose(&mut self, reason: EndReason) {
        if let Err(e) = self.chat.clear_reactions(&self.view.message_id).await {
            tracing::debug!("Could not clear reactions on {}: {}", self.view.message_id, e);
        }
        match reason {
            EndReason::Expired => self.draw().await,
            EndReason::Cancelled | EndReason::Shutdown => {
                self.view.show(messages::LOTTERY_CANCELLED).await;
            }
            EndReason::Finished => {}
        }
        if let Some(ended) = self.ended.take() {
            let _ = ended.send(reason);
        }
    }
}

/// The announcement message, rewritten with the result once the round is over.
#[derive(Clone)]
pub struct LotteryView {
    chat: SharedChat,
    message_id: String,
    footer: Option<String>,
}

impl LotteryView {
    fn render(&self, body: &str) -> String {
        match &self.footer {
            Some(footer) => format!("{body}\n\n{footer}"),
            None => body.to_string(),
        }
    }

    async fn show(&self, body: &str) {
        if let Err(e) = self.chat.edit_message(&self.message_id, &self.render(body)).await {
            tracing::warn!("Failed to update lottery {}: {}", self.message_id, e);
        }
    }
}

/// Moves the prize and saves. When a view is given, the executable reports the
/// outcome on it.
pub fn award_executable(store: SharedStore, draw: Draw, view: Option<LotteryView>) -> Executable {
    let name = format!("lottery {} -> {}", draw.donor, draw.winner);
    Executable::new(name, Priority::Normal, async move {
        let outcome = async {
            let prizes = award(&store, &draw).await?;
            store.save().await?;
            Ok::<_, anyhow::Error>(prizes)
        }
        .await;
        if let Some(view) = view {
            let body = match &outcome {
                Ok(prizes) => {
                    let lines: Vec<String> = prizes
                        .iter()
                        .map(|p| {
                            let marker = if p.wished { WISHED } else { "" };
                            format!("{marker}{}", p.card.short_string())
                        })
                        .collect();
                    messages::lottery_won(&draw.winner, &lines)
                }
                Err(e) => messages::lottery_failed(&format!("{e:#}")),
            };
            view.show(&body).await;
        }
        outcome.map(|_| ())
    })
}

/// Gives up to `draw.count` random cards of the donor to the winner.
pub async fn award(store: &SharedStore, draw: &Draw) -> Result<Vec<Prize>> {
    if draw.donor == draw.winner {
        anyhow::bail!("The donor cannot win their own lottery");
    }
    let mut data = store.write().await;
    let ids: Vec<CardId> = data
        .users
        .get(&draw.donor)
        .map(|u| u.deck.cards.iter().map(|c| c.id).collect())
        .unwrap_or_default();
    if ids.is_empty() {
        anyhow::bail!("{} has no cards to give away", draw.donor);
    }

    let mut rng = StdRng::seed_from_u64(draw.seed);
    let picked: Vec<CardId> = ids.choose_multiple(&mut rng, draw.count).copied().collect();

    let mut donor = data
        .users
        .remove(&draw.donor)
        .unwrap_or_else(|| User::new(&draw.donor));
    let mut winner = data
        .users
        .remove(&draw.winner)
        .unwrap_or_else(|| User::new(&draw.winner));

    let now = Utc::now();
    let mut prizes = Vec::new();
    for id in picked {
        let Some(card) = donor.deck.take_card(id) else {
            continue;
        };
        donor.deck.release_favourite_if_gone(card.character);
        let (prize, activity) = cards::award_card(card, &mut winner, now);
        data.activities.extend(activity);
        prizes.push(prize);
    }
    data.activities.push(UserActivity::new(
        ActivityKind::WonLottery,
        &winner.id,
        None,
        now,
    ));

    data.users.insert(donor.id.clone(), donor);
    data.users.insert(winner.id.clone(), winner);
    tracing::info!(
        "Lottery moved {} card(s) from {} to {}",
        prizes.len(),
        draw.donor,
        draw.winner
    );
    Ok(prizes)
}
