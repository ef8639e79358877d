//! # Lottery Commands
//!
//! Handles `.lottery <donor> <count> [minutes] [rounds]` and `.lotteries [id]`.
//! Rounds run one after another in a background task, each as its own
//! [`LotterySession`]. Cancelling the live round stops the rest.

use crate::application::executor::{Executable, Executor, Priority};
use crate::application::session::lottery::{self, LotteryPlan, LotterySession};
use crate::application::session::{EndReason, SessionRegistry};
use crate::application::store::SharedStore;
use crate::domain::cards::{ActivityKind, UserActivity};
use crate::domain::traits::{ChatProvider, SharedChat};
use crate::domain::types::{SessionId, is_user_id};
use crate::strings::messages;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const DEFAULT_MINUTES: u64 = 5;
/// Pause between two rounds of the same lottery.
const ROUND_GAP: Duration = Duration::from_secs(10);

fn parse_lottery(args: &str) -> Option<LotteryPlan> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    let (donor, count, rest) = match tokens.as_slice() {
        [donor, count, rest @ ..] if rest.len() <= 2 => (*donor, *count, rest),
        _ => return None,
    };
    if !is_user_id(donor) {
        return None;
    }
    let count: usize = count.parse().ok().filter(|&c| c > 0)?;
    let minutes: u64 = match rest.first() {
        Some(m) => m.parse().ok().filter(|&m| m > 0)?,
        None => DEFAULT_MINUTES,
    };
    let rounds: u32 = match rest.get(1) {
        Some(r) => r.parse().ok().filter(|&r| r > 0)?,
        None => 1,
    };
    Some(LotteryPlan {
        donor: donor.to_string(),
        count,
        duration: Duration::from_secs(minutes * 60),
        rounds,
    })
}

/// Everything a running lottery needs between rounds.
#[derive(Clone)]
struct Host {
    chat: SharedChat,
    store: SharedStore,
    executor: Arc<Executor>,
    sessions: Arc<SessionRegistry>,
    user_id: String,
}

/// `.lottery` logs the start and leaves the rounds to a background task.
pub async fn handle_lottery(
    store: &SharedStore,
    executor: &Arc<Executor>,
    sessions: &Arc<SessionRegistry>,
    chat: &SharedChat,
    sender: &str,
    args: &str,
) -> Result<()> {
    let Some(plan) = parse_lottery(args) else {
        chat.send_message(messages::LOTTERY_USAGE).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    };
    if sessions.is_busy(lottery::KIND, sender).await {
        chat.send_message(&messages::lottery_busy(sender)).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    }

    let started = started_executable(store.clone(), sender.to_string());
    if !executor.submit(&started, executor.default_admit_timeout()).await {
        chat.send_message(messages::COMMAND_REJECTED).await.map_err(|e| anyhow::anyhow!(e))?;
        return Ok(());
    }

    let host = Host {
        chat: chat.clone(),
        store: store.clone(),
        executor: executor.clone(),
        sessions: sessions.clone(),
        user_id: sender.to_string(),
    };
    tracing::info!(
        "{} started a lottery of {} card(s) from {} over {} round(s)",
        sender,
        plan.count,
        plan.donor,
        plan.rounds
    );
    run_rounds(host, plan, ROUND_GAP);
    Ok(())
}

fn started_executable(store: SharedStore, host: String) -> Executable {
    Executable::new("lottery-start", Priority::High, async move {
        store.write().await.activities.push(UserActivity::new(
            ActivityKind::LotteryStarted,
            &host,
            None,
            Utc::now(),
        ));
        store.save().await
    })
}

fn run_rounds(host: Host, plan: LotteryPlan, gap: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        for round in 1..=plan.rounds {
            let opened = LotterySession::open(
                host.chat.clone(),
                host.store.clone(),
                host.executor.clone(),
                &host.user_id,
                plan.clone(),
                round,
            )
            .await;
            let (session, ended) = match opened {
                Ok(opened) => opened,
                Err(e) => {
                    tracing::error!("Failed to announce lottery round {}: {:#}", round, e);
                    return;
                }
            };
            let message_id = session.message_id().to_string();
            if let Err(e) = host.sessions.create(session.spec(), Box::new(session)).await {
                tracing::warn!("Lottery by {} could not start: {}", host.user_id, e);
                let _ = host.chat.clear_reactions(&message_id).await;
                let _ = host
                    .chat
                    .edit_message(&message_id, &messages::lottery_busy(&host.user_id))
                    .await;
                return;
            }

            match ended.await {
                Ok(EndReason::Expired) if round < plan.rounds => tokio::time::sleep(gap).await,
                Ok(EndReason::Expired) => {}
                outcome => {
                    tracing::info!(
                        "Lottery by {} stopped in round {}/{}: {:?}",
                        host.user_id,
                        round,
                        plan.rounds,
                        outcome
                    );
                    return;
                }
            }
        }
        tracing::info!("Lottery by {} finished", host.user_id);
    })
}

/// `.lotteries` lists running rounds; `.lotteries <id>` stops one.
pub async fn handle_lotteries(
    sessions: &SessionRegistry,
    chat: &dyn ChatProvider,
    args: &str,
) -> Result<()> {
    let running = sessions.list(lottery::KIND).await;
    let id = args.trim();
    let reply = if id.is_empty() {
        if running.is_empty() {
            messages::LOTTERY_NONE_RUNNING.to_string()
        } else {
            let rows: Vec<(String, String)> = running
                .into_iter()
                .map(|(id, host)| (id.to_string(), host))
                .collect();
            messages::lottery_list(&rows)
        }
    } else if !running.iter().any(|(live, _)| live.0 == id) {
        messages::lottery_not_found(id)
    } else {
        match sessions.cancel(&SessionId(id.to_string())).await {
            Ok(()) => messages::LOTTERY_STOPPED.to_string(),
            Err(e) => {
                tracing::debug!("Lottery {} ended before it could be stopped: {}", id, e);
                messages::lottery_not_found(id)
            }
        }
    };
    chat.send_message(&reply).await.map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}
