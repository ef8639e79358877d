//! # Cards
//!
//! The collectible card model, the per-user deck and the rules deciding which cards
//! may change hands. The exchange effect itself lives here as well so the commit
//! executable and the tests share one definition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Karma at or above which a deck counts as good.
pub const GOOD_KARMA: f64 = 2000.0;
/// Karma at or below which a deck counts as evil.
pub const EVIL_KARMA: f64 = -2000.0;
/// Cards at or below this affection are broken and cannot be traded.
pub const BROKEN_AFFECTION: f64 = -50.0;
/// Popularity from which an acquisition is logged as a high-demand card.
pub const HIGH_DEMAND: u32 = 30;

const AFFECTION_LOSS_ON_EXCHANGE: f64 = 1.5;
const EXP_KEPT_ON_EXCHANGE: f64 = 0.3;
const MIN_MARKET_VALUE: f64 = 0.001;
const MAX_MARKET_VALUE: f64 = 10.0;

pub type CardId = u64;
pub type CharacterId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Rarity {
    SSS,
    SS,
    S,
    A,
    B,
    C,
    D,
    #[default]
    E,
}

impl fmt::Display for Rarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::str::FromStr for Rarity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SSS" => Ok(Self::SSS),
            "SS" => Ok(Self::SS),
            "S" => Ok(Self::S),
            "A" => Ok(Self::A),
            "B" => Ok(Self::B),
            "C" => Ok(Self::C),
            "D" => Ok(Self::D),
            "E" => Ok(Self::E),
            other => Err(format!("unknown rarity `{other}`")),
        }
    }
}

/// Card temperament. `Yami` and `Raito` are tied to karma, `Yato` is bound to its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Dere {
    #[default]
    Tsundere,
    Kamidere,
    Deredere,
    Yandere,
    Dandere,
    Kuudere,
    Mayadere,
    Bodere,
    Yami,
    Raito,
    Yato,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Expedition {
    #[default]
    None,
    NormalItemWithExp,
    ExtremeItemWithExp,
    DarkExp,
    LightExp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Card {
    pub id: CardId,
    pub name: String,
    pub character: CharacterId,
    pub rarity: Rarity,
    pub dere: Dere,
    pub affection: f64,
    pub exp: f64,
    pub market_value: f64,
    pub active: bool,
    pub in_cage: bool,
    pub tradable: bool,
    pub expedition: Expedition,
    pub from_figure: bool,
    /// Figure built from a pre-assembled kit.
    pub pre_assembled: bool,
    pub tags: Vec<String>,
    /// First owner id, recorded on the first trade.
    pub first_owner: Option<String>,
    /// How many users have this character on their wishlist.
    pub who_wants: u32,
}

impl Default for Card {
    fn default() -> Self {
        Self {
            id: 0,
            name: String::new(),
            character: 0,
            rarity: Rarity::default(),
            dere: Dere::default(),
            affection: 0.0,
            exp: 0.0,
            market_value: 1.0,
            active: false,
            in_cage: false,
            tradable: true,
            expedition: Expedition::None,
            from_figure: false,
            pre_assembled: false,
            tags: Vec::new(),
            first_owner: None,
            who_wants: 0,
        }
    }
}

impl Card {
    pub fn is_broken(&self) -> bool {
        self.affection <= BROKEN_AFFECTION
    }

    pub fn is_disallowed_to_exchange(&self) -> bool {
        self.in_cage
            || !self.tradable
            || self.dere == Dere::Yato
            || self.expedition != Expedition::None
            || (self.from_figure && self.pre_assembled)
            || self.is_broken()
    }

    /// One-line description used in offers and listings.
    pub fn short_string(&self) -> String {
        format!("**{}** {} **{}**", self.id, self.name, self.rarity)
    }

    fn recalculate_market_value(&mut self, source_count: usize, target_count: usize) {
        self.market_value *= target_count as f64 / source_count as f64;
        if !self.market_value.is_finite() {
            self.market_value = MIN_MARKET_VALUE;
        }
        self.market_value = self.market_value.clamp(MIN_MARKET_VALUE, MAX_MARKET_VALUE);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Wishlist {
    pub cards: HashSet<CardId>,
    pub characters: HashSet<CharacterId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameDeck {
    pub karma: f64,
    pub cards: Vec<Card>,
    pub wishlist: Wishlist,
    /// Favourite character, if any.
    pub favourite: Option<CharacterId>,
}

impl GameDeck {
    pub fn is_good(&self) -> bool {
        self.karma >= GOOD_KARMA
    }

    pub fn is_evil(&self) -> bool {
        self.karma <= EVIL_KARMA
    }

    pub fn card(&self, id: CardId) -> Option<&Card> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn take_card(&mut self, id: CardId) -> Option<Card> {
        let idx = self.cards.iter().position(|c| c.id == id)?;
        Some(self.cards.remove(idx))
    }

    pub fn has_figure_of(&self, character: CharacterId) -> bool {
        self.cards
            .iter()
            .any(|c| c.from_figure && c.character == character)
    }

    pub fn remove_card_from_wishlist(&mut self, id: CardId) -> bool {
        self.wishlist.cards.remove(&id)
    }

    pub fn remove_character_from_wishlist(&mut self, character: CharacterId) -> bool {
        self.wishlist.characters.remove(&character)
    }

    /// Drops the favourite when no card of that character is left in the deck.
    pub fn release_favourite_if_gone(&mut self, character: CharacterId) {
        if self.favourite == Some(character) && !self.cards.iter().any(|c| c.character == character)
        {
            self.favourite = None;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: String,
    pub deck: GameDeck,
}

impl User {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            deck: GameDeck::default(),
        }
    }
}

/// Why a card cannot be placed in an offer towards a given recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferRejection {
    NotOwned,
    NotExchangeable,
    AlignmentConflict,
    DuplicateFigure,
}

/// Checks whether `card_id` owned by `owner` may be offered to `recipient`.
pub fn check_offer<'a>(
    owner: &'a User,
    recipient: &User,
    card_id: CardId,
) -> Result<&'a Card, OfferRejection> {
    let card = owner.deck.card(card_id).ok_or(OfferRejection::NotOwned)?;
    if card.is_disallowed_to_exchange() {
        return Err(OfferRejection::NotExchangeable);
    }
    if (card.dere == Dere::Yami && recipient.deck.is_good())
        || (card.dere == Dere::Raito && recipient.deck.is_evil())
    {
        return Err(OfferRejection::AlignmentConflict);
    }
    if card.from_figure && recipient.deck.has_figure_of(card.character) {
        return Err(OfferRejection::DuplicateFigure);
    }
    Ok(card)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityKind {
    AcquiredCardUltimate,
    AcquiredCardSSS,
    AcquiredCardWishlist,
    AcquiredCardKC,
    AcquiredCardHighKC,
    LotteryStarted,
    WonLottery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivity {
    pub kind: ActivityKind,
    /// Empty for activities not tied to a user.
    pub user_id: String,
    #[serde(default)]
    pub card_id: Option<CardId>,
    pub created_at: DateTime<Utc>,
}

impl UserActivity {
    pub fn new(kind: ActivityKind, user_id: &str, card_id: Option<CardId>, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            user_id: user_id.to_string(),
            card_id,
            created_at: now,
        }
    }
}

fn demand_kind(who_wants: u32) -> Option<ActivityKind> {
    match who_wants {
        n if n >= HIGH_DEMAND => Some(ActivityKind::AcquiredCardHighKC),
        n if n > 1 => Some(ActivityKind::AcquiredCardKC),
        _ => None,
    }
}

/// One side of a trade as seen by the exchange effect.
#[derive(Debug, Clone, Copy)]
pub struct TradeSide<'a> {
    pub user_id: &'a str,
    /// Number of cards this side put on the table, never less than one.
    pub offered: usize,
    pub tag: Option<&'a str>,
}

/// Moves `card` (already taken out of `source`) into `target`, applying every
/// post-trade effect. Returns the activities the move produced.
pub fn exchange_card(
    mut card: Card,
    source: &mut User,
    source_side: TradeSide<'_>,
    target: &mut User,
    target_side: TradeSide<'_>,
    now: DateTime<Utc>,
) -> Vec<UserActivity> {
    let target_id = target.id.clone();
    let mut activities = Vec::new();
    let mut log = |kind: ActivityKind, card_id: CardId| {
        activities.push(UserActivity::new(kind, &target_id, Some(card_id), now));
    };

    card.active = false;
    card.tags.clear();
    card.affection -= AFFECTION_LOSS_ON_EXCHANGE;
    if card.exp > 1.0 {
        card.exp *= EXP_KEPT_ON_EXCHANGE;
    }
    card.recalculate_market_value(source_side.offered.max(1), target_side.offered.max(1));
    if card.first_owner.is_none() {
        card.first_owner = Some(source_side.user_id.to_string());
    }

    if card.from_figure {
        card.tradable = false;
        log(ActivityKind::AcquiredCardUltimate, card.id);
    } else if card.rarity == Rarity::SSS {
        log(ActivityKind::AcquiredCardSSS, card.id);
    }

    source.deck.release_favourite_if_gone(card.character);

    if let Some(tag) = target_side.tag.filter(|t| !t.is_empty()) {
        card.tags.push(tag.to_string());
    }

    let on_wishlist = target.deck.remove_card_from_wishlist(card.id)
        || target.deck.remove_character_from_wishlist(card.character);
    if on_wishlist {
        log(ActivityKind::AcquiredCardWishlist, card.id);
    } else if let Some(kind) = demand_kind(card.who_wants) {
        log(kind, card.id);
    }

    target.deck.cards.push(card);
    activities
}

/// A card handed out as a prize.
#[derive(Debug, Clone)]
pub struct Prize {
    pub card: Card,
    /// The winner had the character on their wishlist.
    pub wished: bool,
}

/// Gives `card` (already taken out of the donor's deck) to `winner`. The card
/// leaves any cage, expedition and tags behind and satisfies the winner's wishlist.
pub fn award_card(
    mut card: Card,
    winner: &mut User,
    now: DateTime<Utc>,
) -> (Prize, Option<UserActivity>) {
    card.active = false;
    card.in_cage = false;
    card.tags.clear();
    card.expedition = Expedition::None;

    let wished = winner.deck.remove_character_from_wishlist(card.character);
    winner.deck.remove_card_from_wishlist(card.id);

    let kind = if wished {
        Some(ActivityKind::AcquiredCardWishlist)
    } else {
        demand_kind(card.who_wants)
    };
    let activity = kind.map(|k| UserActivity::new(k, &winner.id, Some(card.id), now));

    winner.deck.cards.push(card.clone());
    (Prize { card, wished }, activity)
}
