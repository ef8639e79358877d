//! # Miscellaneous Commands
//!
//! Handles `.running`.

use crate::application::executor::Executor;
use crate::application::session::SessionRegistry;
use crate::domain::traits::ChatProvider;
use anyhow::Result;

/// Reports what the executor is doing and how busy the bot is.
pub async fn handle_running(
    executor: &Executor,
    sessions: &SessionRegistry,
    chat: &dyn ChatProvider,
) -> Result<()> {
    let msg = crate::strings::messages::running_status(
        &executor.currently_running(),
        executor.pending(),
        sessions.active_count().await,
    );
    chat.send_message(&msg).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
