//! # Interface Layer
//!
//! Turns inbound chat events into session dispatch and command handling.

pub mod commands;
pub mod events;
