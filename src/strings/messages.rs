//! # Messages
//!
//! Contains constant strings and format functions for user-facing messages.
//! Includes error messages, usage hints, the exchange view and lottery announcements.

pub const AUTH_DENIED: &str = "🚫 **Authorization Denied**.";
pub const UNKNOWN_COMMAND: &str = "❓ Unknown command.";
pub const COMMAND_REJECTED: &str = "Command rejected!";

pub fn task_failed(err: &str) -> String {
    format!("❌ **Task Failed**: {err}")
}

pub fn running_status(name: &str, pending: usize, sessions: usize) -> String {
    format!("**Running**: `{name}`\n**Queued**: {pending}\n**Sessions**: {sessions}")
}

// Usage
pub const CARDS_USAGE: &str = "Usage: `.cards [user]`";
pub const EXCHANGE_USAGE: &str = "Usage: `.exchange <user>`";
pub const WISH_USAGE: &str = "Usage: `.wish <character id>`";
pub const GRANT_USAGE: &str = "Usage: `.grant <user> <character id> <name> [rarity]`";
pub const TRANSFER_USAGE: &str = "Usage: `.transfer <user> <card ids...>`";
pub const LOTTERY_USAGE: &str = "Usage: `.lottery <donor> <count> [minutes] [rounds]`";

// Cards
pub fn empty_collection(user: &str) -> String {
    format!("{user} has no cards.")
}

pub fn collection_header(user: &str, count: usize, karma: f64) -> String {
    format!("**{user}** owns {count} card(s), karma {karma:.0}:")
}

pub fn wish_added(character: u64) -> String {
    format!("⭐ Character **{character}** added to your wishlist.")
}

pub fn card_granted(user: &str, card: &str) -> String {
    format!("🎁 {user} received {card}.")
}

pub fn cards_transferred(user: &str, moved: usize, requested: usize) -> String {
    format!("📦 Moved {moved}/{requested} card(s) to {user}.")
}

// Exchange
pub const EXCHANGE_WITH_SELF: &str = "You cannot exchange cards with yourself.";

pub fn exchange_busy(user: &str) -> String {
    format!("⏳ {user} is already in an exchange.")
}

pub fn exchange_title(p1: &str, p2: &str) -> String {
    format!("🔄 **Exchange** {p1} ⇄ {p2}")
}

pub fn exchange_tips_add(ready_p1: &str, ready_p2: &str) -> String {
    format!(
        "Type `add <ids...>`, `remove <id>` or `tag <label>`. \
         React {ready_p1} (first player) or {ready_p2} (second player) when ready."
    )
}

pub fn exchange_tips_accept(player: &str, accept: &str, decline: &str) -> String {
    format!("{player} react {accept} to accept, or {decline} to decline.")
}

pub fn exchange_offer(player: &str, cards: &[String]) -> String {
    format!("{player} offers:\n{}", cards.join("\n"))
}

pub fn exchange_offer_count(player: &str, count: usize) -> String {
    format!("{player} offers:\n\n**[{count}]** cards")
}

pub fn exchange_declined(player: &str) -> String {
    format!("{player} declined the exchange!")
}

pub const EXCHANGE_COMPLETED: &str = "Exchange completed!";
pub const EXCHANGE_COMMITTING: &str = "⏳ Both sides accepted, completing the exchange...";
pub const EXCHANGE_EXPIRED: &str = "⌛ Exchange expired.";

pub fn exchange_failed(err: &str) -> String {
    format!("❌ Exchange failed: {err}")
}

pub fn exchange_view(name: &str, p1: &str, p2: &str, tips: &str) -> String {
    format!("{name}\n\n{p1}\n\n{p2}\n\n{tips}")
}

// Lottery
pub const LOTTERY_NO_ENTRANTS: &str = "Nobody entered the lottery!";
pub const LOTTERY_CANCELLED: &str = "🛑 Lottery cancelled.";
pub const LOTTERY_NONE_RUNNING: &str = "No lotteries running.";
pub const LOTTERY_STOPPED: &str = "Lottery stopped.";

pub fn lottery_busy(user: &str) -> String {
    format!("⏳ {user} is already running a lottery.")
}

pub fn lottery_open(enter: &str, ends_at: &str) -> String {
    format!("🎰 **Card lottery**! React {enter} to enter.\n\nEnds at `{ends_at}`")
}

pub fn lottery_round(round: u32, rounds: u32) -> String {
    format!("{round}/{rounds}")
}

pub fn lottery_won(winner: &str, prizes: &[String]) -> String {
    format!("🎉 {winner} wins the lottery and receives:\n\n{}", prizes.join("\n"))
}

pub fn lottery_failed(err: &str) -> String {
    format!("❌ Lottery failed: {err}")
}

pub fn lottery_list(lotteries: &[(String, String)]) -> String {
    let lines: Vec<String> = lotteries
        .iter()
        .map(|(id, host)| format!("`{id}` by {host}"))
        .collect();
    format!("**Running lotteries**:\n{}", lines.join("\n"))
}

pub fn lottery_not_found(id: &str) -> String {
    format!("❓ No lottery `{id}`.")
}
