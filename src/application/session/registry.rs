//! # Session Registry
//!
//! Owns every live session. Inbound events are offered to all matching sessions
//! concurrently, while each session handles its own events strictly one at a time.
//! An independent sweep disposes sessions whose deadline passed.

use super::{EndReason, Session, SessionSpec, Step};
use crate::domain::errors::SessionError;
use crate::domain::types::{InteractionEvent, SessionId};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Returned by [`SessionRegistry::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHandle {
    pub id: SessionId,
    pub kind: &'static str,
}

struct Slot {
    id: SessionId,
    spec: SessionSpec,
    deadline: StdMutex<Instant>,
    disposed: AtomicBool,
    session: Mutex<Option<Box<dyn Session>>>,
}

impl Slot {
    fn deadline(&self) -> Instant {
        *self.deadline.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, now: Instant) -> bool {
        now >= self.deadline()
    }

    /// Pushes the deadline to `now + timeout`. Never moves it backwards.
    fn restart_timer(&self) {
        let next = Instant::now() + self.spec.timeout;
        let mut deadline = self.deadline.lock().unwrap_or_else(|e| e.into_inner());
        if next > *deadline {
            *deadline = next;
        }
    }

    async fn dispose(&self, reason: EndReason) -> bool {
        let mut guard = self.session.lock().await;
        self.dispose_in(&mut guard, reason).await
    }

    /// Disposes the session as expired, unless an interaction accepted while we waited
    /// for the lock pushed the deadline back.
    async fn expire(&self) -> bool {
        let mut guard = self.session.lock().await;
        if !self.is_expired(Instant::now()) {
            return false;
        }
        self.dispose_in(&mut guard, EndReason::Expired).await
    }

    /// Takes the session out and disposes it. Only the first caller gets to dispose.
    async fn dispose_in(&self, held: &mut Option<Box<dyn Session>>, reason: EndReason) -> bool {
        let Some(mut session) = held.take() else {
            return false;
        };
        self.disposed.store(true, Ordering::SeqCst);
        session.dispose(reason).await;
        tracing::info!(
            "Session {} ({}) disposed: {:?}",
            self.id,
            self.spec.kind,
            reason
        );
        true
    }
}

#[derive(Default)]
pub struct SessionRegistry {
    slots: RwLock<HashMap<SessionId, Arc<Slot>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new active session.
    ///
    /// Fails with [`SessionError::AlreadyActive`] when a member already takes part in
    /// a live session of the same kind.
    pub async fn create(
        &self,
        spec: SessionSpec,
        session: Box<dyn Session>,
    ) -> Result<SessionHandle, SessionError> {
        let mut slots = self.slots.write().await;
        for slot in slots.values() {
            if slot.spec.kind != spec.kind || slot.disposed.load(Ordering::SeqCst) {
                continue;
            }
            if let Some(busy) = spec.members().find(|m| slot.spec.is_member(m)) {
                return Err(SessionError::AlreadyActive(busy.to_string()));
            }
        }

        let id = SessionId::new();
        let handle = SessionHandle {
            id: id.clone(),
            kind: spec.kind,
        };
        tracing::info!(
            "Session {} ({}) created by {} with {:?}",
            id,
            spec.kind,
            spec.owner,
            spec.participants
        );
        let slot = Slot {
            id: id.clone(),
            deadline: StdMutex::new(Instant::now() + spec.timeout),
            spec,
            disposed: AtomicBool::new(false),
            session: Mutex::new(Some(session)),
        };
        slots.insert(id, Arc::new(slot));
        Ok(handle)
    }

    /// Offers `event` to every live session subscribed to its kind whose audience
    /// includes the sender. Returns how many sessions accepted or finished on it.
    pub async fn dispatch(&self, event: &InteractionEvent) -> usize {
        let kind = event.kind();
        let sender = event.sender();
        let candidates: Vec<Arc<Slot>> = {
            let slots = self.slots.read().await;
            slots
                .values()
                .filter(|s| s.spec.mask.matches(kind) && s.spec.accepts(sender))
                .cloned()
                .collect()
        };
        if candidates.is_empty() {
            return 0;
        }

        let steps = join_all(candidates.into_iter().map(|slot| self.offer(slot, event))).await;
        steps
            .into_iter()
            .filter(|s| matches!(s, Step::Accepted | Step::Finished))
            .count()
    }

    async fn offer(&self, slot: Arc<Slot>, event: &InteractionEvent) -> Step {
        let mut guard = slot.session.lock().await;
        if slot.is_expired(Instant::now()) {
            let disposed = slot.dispose_in(&mut guard, EndReason::Expired).await;
            drop(guard);
            if disposed {
                self.remove(&slot.id).await;
            }
            return Step::Ignored;
        }

        let Some(session) = guard.as_mut() else {
            return Step::Ignored;
        };
        let step = session.handle_event(event).await;
        match step {
            Step::Accepted if slot.spec.sliding => slot.restart_timer(),
            Step::Finished => {
                let disposed = slot.dispose_in(&mut guard, EndReason::Finished).await;
                drop(guard);
                if disposed {
                    self.remove(&slot.id).await;
                }
            }
            Step::Accepted | Step::Ignored | Step::Rejected => {}
        }
        step
    }

    /// Disposes every session whose deadline has passed. Returns how many were torn down.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<Slot>> = {
            let slots = self.slots.read().await;
            slots.values().filter(|s| s.is_expired(now)).cloned().collect()
        };
        if expired.is_empty() {
            return 0;
        }

        let disposed = join_all(expired.iter().map(|slot| slot.expire())).await;
        let gone: Vec<&SessionId> = expired
            .iter()
            .zip(disposed)
            .filter(|(_, disposed)| *disposed)
            .map(|(slot, _)| &slot.id)
            .collect();
        if gone.is_empty() {
            return 0;
        }

        let mut slots = self.slots.write().await;
        for id in &gone {
            slots.remove(*id);
        }
        tracing::info!("Swept {} expired session(s)", gone.len());
        gone.len()
    }

    /// Runs [`SessionRegistry::sweep`] every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep().await;
            }
        })
    }

    /// Disposes every live session, e.g. on shutdown.
    pub async fn dispose_all(&self) {
        let all: Vec<Arc<Slot>> = self.slots.write().await.drain().map(|(_, s)| s).collect();
        join_all(all.iter().map(|slot| slot.dispose(EndReason::Shutdown))).await;
    }

    /// Ends a live session early.
    pub async fn cancel(&self, id: &SessionId) -> Result<(), SessionError> {
        let slot = self
            .slots
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.clone()))?;
        if !slot.dispose(EndReason::Cancelled).await {
            return Err(SessionError::NotFound(id.clone()));
        }
        self.remove(id).await;
        Ok(())
    }

    /// Live sessions of `kind` as `(id, owner)`.
    pub async fn list(&self, kind: &str) -> Vec<(SessionId, String)> {
        self.slots
            .read()
            .await
            .values()
            .filter(|s| s.spec.kind == kind && !s.disposed.load(Ordering::SeqCst))
            .map(|s| (s.id.clone(), s.spec.owner.clone()))
            .collect()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.slots.read().await.contains_key(id)
    }

    pub async fn active_count(&self) -> usize {
        self.slots.read().await.len()
    }

    /// Current deadline of a live session.
    pub async fn deadline(&self, id: &SessionId) -> Result<Instant, SessionError> {
        self.slots
            .read()
            .await
            .get(id)
            .map(|s| s.deadline())
            .ok_or_else(|| SessionError::NotFound(id.clone()))
    }

    /// Whether `user_id` takes part in a live session of `kind`.
    pub async fn is_busy(&self, kind: &str, user_id: &str) -> bool {
        self.slots
            .read()
            .await
            .values()
            .any(|s| s.spec.kind == kind && !s.disposed.load(Ordering::SeqCst) && s.spec.is_member(user_id))
    }

    async fn remove(&self, id: &SessionId) {
        self.slots.write().await.remove(id);
    }
}
