//! # Command Handlers
//!
//! Contains specific handler functions for each supported command (e.g., .cards, .exchange, .lottery).
//! These handlers are invoked by the Router.

pub mod admin;
pub mod cards;
pub mod exchange;
pub mod help;
pub mod lottery;
pub mod misc;
