//! # Command Router
//!
//! Routes incoming messages to the appropriate command handler (in `interface/commands`).
//! It parses the command string (e.g., `.cards`) and dispatches it according to the
//! command's run mode: async commands run inline, sync commands are handed to the
//! [`Executor`] so that every store mutation goes through its queue.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use crate::application::executor::{Executable, Executor};
use crate::application::session::SessionRegistry;
use crate::application::store::SharedStore;
use crate::domain::config::AppConfig;
use crate::domain::errors::ExecutorError;
use crate::domain::traits::SharedChat;
use crate::interface::commands;
use crate::strings::messages;

/// How long a blocking command waits for its executable to finish.
const BLOCKING_WAIT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Runs inline in the event handler.
    Async,
    /// Submitted to the executor; the reply comes from the executable.
    Sync,
    /// Submitted to the executor; the router waits for the outcome and reports failures.
    Blocking,
}

#[derive(Debug, Clone, Copy)]
pub struct CommandInfo {
    pub name: &'static str,
    pub mode: RunMode,
    pub dev_only: bool,
}

pub const COMMANDS: &[CommandInfo] = &[
    CommandInfo { name: "help", mode: RunMode::Async, dev_only: false },
    CommandInfo { name: "running", mode: RunMode::Async, dev_only: false },
    CommandInfo { name: "cards", mode: RunMode::Async, dev_only: false },
    CommandInfo { name: "exchange", mode: RunMode::Async, dev_only: false },
    CommandInfo { name: "wish", mode: RunMode::Sync, dev_only: false },
    CommandInfo { name: "grant", mode: RunMode::Blocking, dev_only: true },
    CommandInfo { name: "transfer", mode: RunMode::Blocking, dev_only: true },
    CommandInfo { name: "lottery", mode: RunMode::Async, dev_only: true },
    CommandInfo { name: "lotteries", mode: RunMode::Async, dev_only: true },
];

pub fn lookup(name: &str) -> Option<&'static CommandInfo> {
    COMMANDS.iter().find(|c| c.name == name)
}

pub struct CommandRouter {
    config: AppConfig,
    store: SharedStore,
    executor: Arc<Executor>,
    sessions: Arc<SessionRegistry>,
}

impl CommandRouter {
    pub fn new(
        config: AppConfig,
        store: SharedStore,
        executor: Arc<Executor>,
        sessions: Arc<SessionRegistry>,
    ) -> Self {
        Self {
            config,
            store,
            executor,
            sessions,
        }
    }

    pub async fn route(&self, chat: &SharedChat, message: &str, sender: &str) -> Result<()> {
        let msg = message.trim();
        let Some(body) = msg.strip_prefix(self.config.commands.prefix.as_str()) else {
            return Ok(());
        };
        let (cmd, args) = match body.split_once(char::is_whitespace) {
            Some((cmd, args)) => (cmd, args.trim()),
            None => (body, ""),
        };
        if cmd.is_empty() {
            return Ok(());
        }
        tracing::info!(
            "Router dispatching cmd='{}' args='{}' sender='{}'",
            cmd,
            args,
            sender
        );

        let Some(info) = lookup(&cmd.to_lowercase()) else {
            chat.send_message(messages::UNKNOWN_COMMAND).await.map_err(|e| anyhow::anyhow!(e))?;
            return Ok(());
        };
        if info.dev_only && !self.config.is_dev(sender) {
            tracing::warn!("{} denied `{}`", sender, info.name);
            chat.send_message(messages::AUTH_DENIED).await.map_err(|e| anyhow::anyhow!(e))?;
            return Ok(());
        }

        let exe = match info.name {
            "help" => return commands::help::handle_help(chat.as_ref()).await,
            "running" => {
                return commands::misc::handle_running(&self.executor, &self.sessions, chat.as_ref())
                    .await;
            }
            "cards" => {
                return commands::cards::handle_cards(&self.store, chat.as_ref(), sender, args).await;
            }
            "exchange" => {
                return commands::exchange::handle_exchange(
                    &self.store,
                    &self.executor,
                    &self.sessions,
                    self.config.sessions.exchange_timeout(),
                    chat,
                    sender,
                    args,
                )
                .await;
            }
            "lottery" => {
                return commands::lottery::handle_lottery(
                    &self.store,
                    &self.executor,
                    &self.sessions,
                    chat,
                    sender,
                    args,
                )
                .await;
            }
            "lotteries" => {
                return commands::lottery::handle_lotteries(&self.sessions, chat.as_ref(), args).await;
            }
            "wish" => commands::cards::wish(&self.store, chat, sender, args).await?,
            "grant" => commands::admin::grant(&self.store, chat, args).await?,
            "transfer" => commands::admin::transfer(&self.store, chat, args).await?,
            other => {
                tracing::error!("Command `{}` has no handler", other);
                return Ok(());
            }
        };

        match exe {
            Some(exe) => self.submit(chat, info.mode, exe).await,
            None => Ok(()),
        }
    }

    async fn submit(&self, chat: &SharedChat, mode: RunMode, exe: Executable) -> Result<()> {
        let admit = self.executor.default_admit_timeout();
        let outcome = if mode == RunMode::Blocking {
            self.executor.run_and_wait(&exe, admit, BLOCKING_WAIT).await
        } else if self.executor.submit(&exe, admit).await {
            Ok(())
        } else {
            Err(ExecutorError::AdmissionRejected)
        };

        let reply = match outcome {
            Ok(()) => return Ok(()),
            Err(ExecutorError::AdmissionRejected) => messages::COMMAND_REJECTED.to_string(),
            Err(e) => messages::task_failed(&e.to_string()),
        };
        chat.send_message(&reply).await.map_err(|e| anyhow::anyhow!(e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::executor::Priority;
    use crate::application::store::{CardStore, StoreData};
    use crate::domain::cards::Card;
    use crate::infrastructure::memory::MemoryChat;
    use tokio::sync::oneshot;

    const DEV: &str = "@dev:x";

    struct Harness {
        chat: Arc<MemoryChat>,
        shared: SharedChat,
        store: SharedStore,
        executor: Arc<Executor>,
        sessions: Arc<SessionRegistry>,
        router: CommandRouter,
    }

    fn harness_with(executor: Executor) -> Harness {
        let mut config = AppConfig::parse(
            "services:\n  matrix:\n    username: bot\n    password: secret\n    homeserver: https://localhost\n",
        )
        .unwrap();
        config.commands.dev.push(DEV.to_string());
        let chat = Arc::new(MemoryChat::new());
        let shared: SharedChat = chat.clone();
        let store: SharedStore = Arc::new(CardStore::in_memory(StoreData::default()));
        let executor = Arc::new(executor);
        let sessions = Arc::new(SessionRegistry::new());
        let router = CommandRouter::new(config, store.clone(), executor.clone(), sessions.clone());
        Harness {
            chat,
            shared,
            store,
            executor,
            sessions,
            router,
        }
    }

    fn harness() -> Harness {
        harness_with(Executor::with_limits(16, None))
    }

    impl Harness {
        async fn send(&self, sender: &str, msg: &str) {
            self.router.route(&self.shared, msg, sender).await.unwrap();
        }

        fn last(&self) -> String {
            self.chat.last_message().unwrap_or_default()
        }
    }

    #[test]
    fn test_every_command_is_registered_once() {
        for info in COMMANDS {
            assert_eq!(COMMANDS.iter().filter(|c| c.name == info.name).count(), 1);
        }
        assert_eq!(lookup("wish").unwrap().mode, RunMode::Sync);
        assert!(lookup("grant").unwrap().dev_only);
        assert!(lookup("lottery").unwrap().dev_only);
        assert!(lookup("lotteries").unwrap().dev_only);
        assert!(lookup("nope").is_none());
    }

    #[tokio::test]
    async fn test_plain_text_and_unknown_commands() {
        let h = harness();
        h.send("@a:x", "hello").await;
        assert!(h.chat.messages().is_empty());

        h.send("@a:x", ".frobnicate").await;
        assert_eq!(h.last(), messages::UNKNOWN_COMMAND);

        h.send("@a:x", ".help").await;
        assert!(h.last().contains("Deckhand Help"));
    }

    #[tokio::test]
    async fn test_dev_commands_require_dev() {
        let h = harness();
        h.send("@a:x", ".grant @a:x 1 Asuna").await;
        assert_eq!(h.last(), messages::AUTH_DENIED);
        h.send("@a:x", ".lottery @a:x 1").await;
        assert_eq!(h.last(), messages::AUTH_DENIED);
        assert_eq!(h.sessions.active_count().await, 0);
        assert!(h.store.user("@a:x").await.is_none());
    }

    #[tokio::test]
    async fn test_grant_and_transfer_block_until_done() {
        let h = harness();
        h.send(DEV, ".grant @a:x 1 Asuna S").await;
        let alice = h.store.user("@a:x").await.unwrap();
        assert_eq!(alice.deck.cards.len(), 1);
        assert!(h.last().contains("Asuna"));

        let id = alice.deck.cards[0].id;
        h.send(DEV, &format!(".transfer @b:x {id}")).await;
        assert!(h.store.user("@a:x").await.unwrap().deck.cards.is_empty());
        assert_eq!(h.store.user("@b:x").await.unwrap().deck.cards[0].id, id);

        h.send(DEV, ".transfer @b:x 999").await;
        assert!(h.last().contains("Task Failed"));

        h.send(DEV, ".transfer @b:x").await;
        assert_eq!(h.last(), messages::TRANSFER_USAGE);
    }

    #[tokio::test]
    async fn test_wish_runs_through_executor() {
        let h = harness();
        h.send("@a:x", ".wish 42").await;

        let done = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(user) = h.store.user("@a:x").await {
                    if user.deck.wishlist.characters.contains(&42) {
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(done.is_ok());

        h.send("@a:x", ".wish someone").await;
        assert_eq!(h.last(), messages::WISH_USAGE);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_sync_command() {
        let h = harness_with(Executor::with_limits(1, None));

        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let blocker = Executable::new("blocker", Priority::Normal, async move {
            let _ = started_tx.send(());
            let _ = release_rx.await;
            Ok(())
        });
        assert!(h.executor.submit(&blocker, Duration::from_secs(1)).await);
        started_rx.await.unwrap();
        let filler = Executable::new("filler", Priority::Normal, async { Ok(()) });
        assert!(h.executor.submit(&filler, Duration::from_secs(1)).await);

        h.send("@a:x", ".wish 1").await;
        assert_eq!(h.last(), messages::COMMAND_REJECTED);

        h.send("@a:x", ".running").await;
        assert!(h.last().contains("blocker"));

        let _ = release_tx.send(());
        h.executor.await_completion(&filler).await.unwrap();
    }

    #[tokio::test]
    async fn test_exchange_opens_one_session_per_pair() {
        let h = harness();
        h.store.write().await.user_mut("@a:x").deck.cards.push(Card {
            id: 1,
            name: "Asuna".into(),
            ..Card::default()
        });

        h.send("@a:x", ".exchange @a:x").await;
        assert_eq!(h.last(), messages::EXCHANGE_WITH_SELF);

        h.send("@a:x", ".exchange @b:x").await;
        assert_eq!(h.sessions.active_count().await, 1);
        assert!(h.last().contains("Exchange"));

        h.send("@c:x", ".exchange @b:x").await;
        assert_eq!(h.last(), messages::exchange_busy("@b:x"));
        assert_eq!(h.sessions.active_count().await, 1);
    }
}
