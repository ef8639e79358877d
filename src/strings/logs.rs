//! # Log Messages
//!
//! Start-up and shutdown lines written to the console and `session.log`.

pub const STARTING: &str = "Starting Deckhand...";

pub fn config_loaded(path: &str) -> String {
    format!("Loaded configuration from {path}")
}

pub fn store_loaded(users: usize) -> String {
    format!("Card store loaded with {users} user(s)")
}

pub fn logged_in(user: &str) -> String {
    format!("Logged in as {user}")
}

pub const SYNC_LOOP_START: &str = "Starting sync loop...";

pub fn sync_loop_fail(err: &str) -> String {
    format!("Sync loop failed: {err}")
}

pub const SHUTDOWN: &str = "Shutting down...";

pub fn shutdown_fail(err: &str) -> String {
    format!("Unable to listen for shutdown signal: {err}")
}
