//! In-memory storage backend.
//!
//! Useful for tests and throwaway development vaults. Nothing survives a
//! restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::backend::StorageBackend;
use crate::error::StorageError;
use crate::models::{CredentialPatch, StoredBot, StoredBotLog, StoredCredential};

/// Storage backend holding rows in process memory.
///
/// Locks are always taken in the order credentials, bots, logs.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    credentials: RwLock<HashMap<String, StoredCredential>>,
    bots: RwLock<HashMap<String, StoredBot>>,
    logs: RwLock<Vec<StoredBotLog>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_credentials<'a>(rows: impl Iterator<Item = &'a StoredCredential>) -> Vec<StoredCredential> {
    let mut out: Vec<StoredCredential> = rows.cloned().collect();
    out.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    out
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_credential(&self, credential: &StoredCredential) -> Result<(), StorageError> {
        let mut rows = self.credentials.write().await;
        if rows.contains_key(&credential.id) {
            return Err(StorageError::AlreadyExists(credential.id.clone()));
        }
        rows.insert(credential.id.clone(), credential.clone());
        Ok(())
    }

    async fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>, StorageError> {
        Ok(self.credentials.read().await.get(id).cloned())
    }

    async fn patch_credential(
        &self,
        expected: &StoredCredential,
        patch: &CredentialPatch,
    ) -> Result<(), StorageError> {
        let mut rows = self.credentials.write().await;
        let row = rows
            .get_mut(&expected.id)
            .ok_or_else(|| StorageError::NotFound(expected.id.clone()))?;

        if !patch.matches(row, expected) {
            return Err(StorageError::Conflict(expected.id.clone()));
        }
        patch.apply_to(row);
        Ok(())
    }

    async fn delete_unreferenced_credential(&self, id: &str) -> Result<bool, StorageError> {
        let mut rows = self.credentials.write().await;
        let bots = self.bots.read().await;
        if bots.values().any(|b| b.credential_id == id) {
            return Ok(false);
        }
        Ok(rows.remove(id).is_some())
    }

    async fn list_credentials(&self, owner_id: &str) -> Result<Vec<StoredCredential>, StorageError> {
        let rows = self.credentials.read().await;
        Ok(sorted_credentials(
            rows.values().filter(|c| c.owner_id == owner_id),
        ))
    }

    async fn list_all_credentials(&self) -> Result<Vec<StoredCredential>, StorageError> {
        let rows = self.credentials.read().await;
        Ok(sorted_credentials(rows.values()))
    }

    async fn delete_credentials_for_owner(&self, owner_id: &str) -> Result<u64, StorageError> {
        let mut rows = self.credentials.write().await;
        let before = rows.len();
        rows.retain(|_, c| c.owner_id != owner_id);
        Ok((before - rows.len()) as u64)
    }

    async fn count_bots_referencing(&self, credential_id: &str) -> Result<u64, StorageError> {
        let bots = self.bots.read().await;
        Ok(bots
            .values()
            .filter(|b| b.credential_id == credential_id)
            .count() as u64)
    }

    async fn insert_bot(&self, bot: &StoredBot) -> Result<(), StorageError> {
        let credentials = self.credentials.read().await;
        let mut rows = self.bots.write().await;
        if !credentials.contains_key(&bot.credential_id) {
            return Err(StorageError::NotFound(bot.credential_id.clone()));
        }
        if rows.contains_key(&bot.id) {
            return Err(StorageError::AlreadyExists(bot.id.clone()));
        }
        rows.insert(bot.id.clone(), bot.clone());
        Ok(())
    }

    async fn get_bot(&self, id: &str) -> Result<Option<StoredBot>, StorageError> {
        Ok(self.bots.read().await.get(id).cloned())
    }

    async fn update_bot(&self, bot: &StoredBot) -> Result<(), StorageError> {
        let mut rows = self.bots.write().await;
        match rows.get_mut(&bot.id) {
            Some(row) => {
                *row = bot.clone();
                Ok(())
            },
            None => Err(StorageError::NotFound(bot.id.clone())),
        }
    }

    async fn delete_bot(&self, id: &str) -> Result<(), StorageError> {
        let mut rows = self.bots.write().await;
        let mut logs = self.logs.write().await;
        rows.remove(id);
        logs.retain(|l| l.bot_id != id);
        Ok(())
    }

    async fn list_bots(&self, owner_id: &str) -> Result<Vec<StoredBot>, StorageError> {
        let rows = self.bots.read().await;
        let mut out: Vec<StoredBot> = rows
            .values()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(out)
    }

    async fn delete_bots_for_owner(&self, owner_id: &str) -> Result<u64, StorageError> {
        let mut rows = self.bots.write().await;
        let mut logs = self.logs.write().await;

        let removed: Vec<String> = rows
            .values()
            .filter(|b| b.owner_id == owner_id)
            .map(|b| b.id.clone())
            .collect();
        for id in &removed {
            rows.remove(id);
        }
        logs.retain(|l| !removed.contains(&l.bot_id));

        Ok(removed.len() as u64)
    }

    async fn insert_bot_log(&self, entry: &StoredBotLog) -> Result<(), StorageError> {
        let bots = self.bots.read().await;
        let mut logs = self.logs.write().await;
        if !bots.contains_key(&entry.bot_id) {
            return Err(StorageError::NotFound(entry.bot_id.clone()));
        }
        logs.push(entry.clone());
        Ok(())
    }

    async fn list_bot_logs(&self, bot_id: &str) -> Result<Vec<StoredBotLog>, StorageError> {
        let logs = self.logs.read().await;
        // Insertion order reversed, then a stable sort keeps the latest write
        // first among entries sharing a timestamp.
        let mut out: Vec<StoredBotLog> = logs
            .iter()
            .rev()
            .filter(|l| l.bot_id == bot_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }
}
