//! # Application Layer
//!
//! Contains the core business logic and orchestration of the bot.
//! This includes the command executor, the card store, command routing and sessions.

pub mod executor;
pub mod router;
pub mod session;
pub mod store;
