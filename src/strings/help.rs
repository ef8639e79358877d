//! # Help Text
//!
//! Help message for bot commands, displayed via the `.help` command.

pub const MAIN: &str = concat!(
    "**🃏 Deckhand Help**\n",
    "Use: .command _args_\n",
    "\n",
    "**🎴 Cards**\n",
    "* cards [user]: List a collection\n",
    "* wish [character]: Add a character to your wishlist\n",
    "* exchange [user]: Open a trade\n",
    "\n",
    "**🔄 In a trade**\n",
    "* add [ids...]: Offer cards\n",
    "* remove [id]: Withdraw a card\n",
    "* tag [label]: Tag the cards you receive\n",
    "\n",
    "**⚡ Misc**\n",
    "* running: Show the command queue\n",
    "* help\n",
    "\n",
    "**🛠️ Dev**\n",
    "* grant [user] [character] [name] [rarity]\n",
    "* transfer [user] [ids...]\n",
    "* lottery [donor] [count] [minutes] [rounds]: Give cards away to a random entrant\n",
    "* lotteries [id]: List running lotteries, or stop one\n"
);
