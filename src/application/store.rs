//! # Card Store
//!
//! In-memory view of every user's deck plus the activity log, snapshotted to
//! `store.json`. Readers take the read lock freely; writes happen only inside
//! executables run by the [`Executor`](crate::application::executor::Executor).

use crate::domain::cards::{CardId, User, UserActivity};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreData {
    pub users: HashMap<String, User>,
    pub activities: Vec<UserActivity>,
    pub next_card_id: CardId,
}

impl StoreData {
    /// Gets or creates the record for a user.
    pub fn user_mut(&mut self, user_id: &str) -> &mut User {
        self.users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id))
    }

    pub fn allocate_card_id(&mut self) -> CardId {
        self.next_card_id += 1;
        self.next_card_id
    }
}

pub struct CardStore {
    data: RwLock<StoreData>,
    path: Option<PathBuf>,
}

pub type SharedStore = Arc<CardStore>;

impl CardStore {
    /// A store that is never written to disk.
    pub fn in_memory(data: StoreData) -> Self {
        Self {
            data: RwLock::new(data),
            path: None,
        }
    }

    /// Loads the snapshot at `path`, or starts empty when there is none.
    pub fn load(path: PathBuf) -> Result<Self> {
        let data = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, StoreData> {
        self.data.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, StoreData> {
        self.data.write().await
    }

    /// Clone of a user's record, if the user exists.
    pub async fn user(&self, user_id: &str) -> Option<User> {
        self.read().await.users.get(user_id).cloned()
    }

    /// Persists the current state. No-op for in-memory stores.
    pub async fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let guard = self.read().await;
            serde_json::to_string_pretty(&*guard).context("Failed to serialize store")?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}
