#![recursion_limit = "256"]
//! # Main Entry Point
//!
//! Initializes the bot:
//! - Domain: Configuration, Cards and Event Types
//! - Infrastructure: Matrix
//! - Application: Executor, Card Store, Router, Sessions
//! - Interface: Inbound Events and Command Handlers
//!

mod application;
mod domain;
mod infrastructure;
mod interface;
mod strings;

use anyhow::{Context, Result};
use clap::Parser;
use matrix_sdk::{
    Client,
    config::SyncSettings,
    room::Room,
    ruma::MilliSecondsSinceUnixEpoch,
    ruma::events::reaction::SyncReactionEvent,
    ruma::events::room::{
        member::{MembershipState, StrippedRoomMemberEvent},
        message::{MessageType, SyncRoomMessageEvent},
        redaction::SyncRoomRedactionEvent,
    },
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::application::executor::Executor;
use crate::application::router::CommandRouter;
use crate::application::session::SessionRegistry;
use crate::application::store::CardStore;
use crate::domain::config::AppConfig;
use crate::domain::paths;
use crate::domain::traits::SharedChat;
use crate::domain::types::{InteractionEvent, MessageEvent, ReactionEvent};
use crate::infrastructure::matrix::{MatrixService, ReactionIndex};
use crate::interface::events::EventHandler;
use crate::strings::logs;

#[derive(Parser, Debug)]
#[command(name = "deckhand", about = "Card collection and trading bot for Matrix")]
struct Cli {
    /// Path to config.yaml (defaults to data/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn is_before(ts: MilliSecondsSinceUnixEpoch, start: SystemTime) -> bool {
    UNIX_EPOCH + Duration::from_millis(ts.get().into()) < start
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Configuration
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(paths::default_config_path);
    let config = AppConfig::load(&config_path)?;

    // 2. Logging Setup
    let data_dir = Path::new(&config.system.data_dir);
    if !data_dir.exists() {
        fs::create_dir_all(data_dir).context("Failed to create data directory")?;
    }

    // Clear previous session log
    let log_path = data_dir.join(paths::LOG_FILE);
    if log_path.exists() {
        let _ = fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(data_dir, paths::LOG_FILE);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("info,matrix_sdk=warn,matrix_sdk_base=warn,matrix_sdk_crypto=error,ruma=warn,hyper=warn")
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .init();

    tracing::info!("{}", logs::STARTING);
    tracing::info!("{}", logs::config_loaded(&config_path.display().to_string()));

    // 3. Application Components
    let store = Arc::new(CardStore::load(paths::store_path(&config.system.data_dir))?);
    tracing::info!("{}", logs::store_loaded(store.read().await.users.len()));

    let executor = Arc::new(Executor::new(&config.executor));
    let sessions = Arc::new(SessionRegistry::new());
    let sweeper = sessions.clone().spawn_sweeper(config.sessions.sweep_interval());

    let router = CommandRouter::new(
        config.clone(),
        store.clone(),
        executor.clone(),
        sessions.clone(),
    );
    let handler = Arc::new(EventHandler::new(router, sessions.clone()));
    let reactions = Arc::new(ReactionIndex::new());

    // 4. Matrix Setup
    let client = Client::builder()
        .homeserver_url(&config.services.matrix.homeserver)
        .build()
        .await?;

    client
        .matrix_auth()
        .login_username(
            &config.services.matrix.username,
            &config.services.matrix.password,
        )
        .send()
        .await?;

    tracing::info!("{}", logs::logged_in(&config.services.matrix.username));

    // 5. Event Handlers
    let start_time = SystemTime::now();

    let msg_handler = handler.clone();
    let msg_reactions = reactions.clone();
    client.add_event_handler(move |ev: SyncRoomMessageEvent, room: Room| {
        let handler = msg_handler.clone();
        let reactions = msg_reactions.clone();
        async move {
            let Some(original) = ev.as_original() else {
                return;
            };
            if is_before(original.origin_server_ts, start_time) {
                return;
            }
            let MessageType::Text(text) = &original.content.msgtype else {
                return;
            };
            if original.sender == room.own_user_id() {
                return;
            }
            tracing::info!("Received message from {}: \n{}", original.sender, text.body);

            let event = InteractionEvent::Message(MessageEvent {
                room_id: room.room_id().to_string(),
                event_id: original.event_id.to_string(),
                sender: original.sender.to_string(),
                body: text.body.clone(),
            });
            let chat: SharedChat = Arc::new(MatrixService::new(room, reactions));
            handler.spawn(chat, event);
        }
    });

    let reaction_handler = handler.clone();
    let reaction_index = reactions.clone();
    client.add_event_handler(move |ev: SyncReactionEvent, room: Room| {
        let handler = reaction_handler.clone();
        let reactions = reaction_index.clone();
        async move {
            let Some(original) = ev.as_original() else {
                return;
            };
            if is_before(original.origin_server_ts, start_time) {
                return;
            }
            let reaction = ReactionEvent {
                room_id: room.room_id().to_string(),
                target_id: original.content.relates_to.event_id.to_string(),
                sender: original.sender.to_string(),
                key: original.content.relates_to.key.clone(),
            };
            // The bot's own reactions were indexed when they were sent.
            if original.sender == room.own_user_id() {
                return;
            }
            // Only reactions on messages the bot marked can be removed later.
            reactions.record(original.event_id.as_str(), reaction.clone());

            let chat: SharedChat = Arc::new(MatrixService::new(room, reactions));
            handler.spawn(chat, InteractionEvent::ReactionAdded(reaction));
        }
    });

    // Removing a reaction arrives as a redaction of the reaction event.
    let redaction_handler = handler.clone();
    let redaction_index = reactions.clone();
    client.add_event_handler(move |ev: SyncRoomRedactionEvent, room: Room| {
        let handler = redaction_handler.clone();
        let reactions = redaction_index.clone();
        async move {
            let Some(original) = ev.as_original() else {
                return;
            };
            if is_before(original.origin_server_ts, start_time) {
                return;
            }
            let Some(redacts) = original.content.redacts.as_ref().or(original.redacts.as_ref()) else {
                return;
            };
            let Some(reaction) = reactions.take(redacts.as_str()) else {
                return;
            };
            if reaction.sender == room.own_user_id().as_str() {
                return;
            }

            let chat: SharedChat = Arc::new(MatrixService::new(room, reactions));
            handler.spawn(chat, InteractionEvent::ReactionRemoved(reaction));
        }
    });

    // Handle Invites
    client.add_event_handler(|ev: StrippedRoomMemberEvent, room: Room| async move {
        if ev.content.membership == MembershipState::Invite {
            if let Err(e) = room.join().await {
                tracing::warn!("Failed to join {}: {}", room.room_id(), e);
            }
        }
    });

    // 6. Sync until the sync loop dies or we are asked to stop
    tracing::info!("{}", logs::SYNC_LOOP_START);
    let sync_client = client.clone();
    let sync_handle = tokio::spawn(async move { sync_client.sync(SyncSettings::default()).await });

    tokio::select! {
        res = sync_handle => match res {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("{}", logs::sync_loop_fail(&e.to_string())),
            Err(e) => tracing::error!("Matrix Sync Panic: {}", e),
        },
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                tracing::error!("{}", logs::shutdown_fail(&e.to_string()));
            }
        }
    }

    // 7. Shutdown
    tracing::info!("{}", logs::SHUTDOWN);
    sweeper.abort();
    sessions.dispose_all().await;
    executor.shutdown().await;
    store.save().await?;

    Ok(())
}
