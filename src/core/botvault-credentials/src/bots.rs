//! Bot configuration registry.
//!
//! Bots are inert records: starting one only flips its status flag. Every
//! lifecycle change leaves an entry in the bot's activity log.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use botvault_storage::{
    BotLogKind, BotPerformance, BotStatus, StorageBackend, StorageError, StoredBot, StoredBotLog,
};

use crate::error::CredentialsError;
use crate::{now, required};

/// A bot configuration submitted by a user.
#[derive(Debug, Clone)]
pub struct NewBot {
    /// Display name.
    pub name: String,
    /// Exchange label.
    pub exchange: String,
    /// Credential the bot trades with. Must belong to the same owner.
    pub credential_id: String,
    /// Free-form strategy configuration.
    pub strategy: serde_json::Value,
}

/// Requested changes to a bot. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct BotUpdate {
    /// New display name.
    pub name: Option<String>,
    /// New strategy configuration.
    pub strategy: Option<serde_json::Value>,
}

/// CRUD front for bot records.
#[derive(Clone)]
pub struct BotRegistry {
    storage: Arc<dyn StorageBackend>,
}

impl BotRegistry {
    /// Creates a registry over a storage backend.
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Creates a stopped bot for `owner_id`.
    pub async fn create(&self, owner_id: &str, bot: NewBot) -> Result<StoredBot, CredentialsError> {
        let owner_id = required("owner_id", owner_id)?;
        let name = required("name", &bot.name)?;
        let exchange = required("exchange", &bot.exchange)?;
        if bot.strategy.is_null() {
            return Err(CredentialsError::Validation("strategy is required".to_string()));
        }

        let credential = self.storage.get_credential(&bot.credential_id).await?;
        match credential {
            Some(c) if c.owner_id == owner_id => {},
            _ => {
                return Err(CredentialsError::InvalidCredentialReference(
                    bot.credential_id,
                ))
            },
        }

        let timestamp = now();
        let record = StoredBot {
            id: Uuid::new_v4().to_string(),
            owner_id,
            name,
            exchange,
            credential_id: bot.credential_id,
            strategy: bot.strategy,
            status: BotStatus::Stopped,
            performance: BotPerformance::default(),
            created_at: timestamp,
            updated_at: timestamp,
        };

        match self.storage.insert_bot(&record).await {
            Ok(()) => {},
            // Credential removed between the ownership check and the insert.
            Err(StorageError::NotFound(_)) => {
                return Err(CredentialsError::InvalidCredentialReference(
                    record.credential_id,
                ))
            },
            Err(e) => return Err(e.into()),
        }
        info!(id = %record.id, owner = %record.owner_id, name = %record.name, "Bot created");

        self.record(
            &record.id,
            BotLogKind::Info,
            format!("Bot \"{}\" created", record.name),
            Some(json!({ "exchange": record.exchange, "strategy": record.strategy })),
        )
        .await;
        Ok(record)
    }

    /// Lists the bots of `owner_id`, oldest first.
    pub async fn list(&self, owner_id: &str) -> Result<Vec<StoredBot>, CredentialsError> {
        Ok(self.storage.list_bots(owner_id).await?)
    }

    /// Fetches one bot owned by `owner_id`.
    pub async fn get(&self, owner_id: &str, id: &str) -> Result<StoredBot, CredentialsError> {
        match self.storage.get_bot(id).await? {
            Some(bot) if bot.owner_id == owner_id => Ok(bot),
            _ => Err(CredentialsError::NotFound(id.to_string())),
        }
    }

    /// Renames a bot or replaces its strategy.
    pub async fn update(
        &self,
        owner_id: &str,
        id: &str,
        update: BotUpdate,
    ) -> Result<StoredBot, CredentialsError> {
        let mut bot = self.get(owner_id, id).await?;
        let mut fields = Vec::new();

        if let Some(name) = update.name {
            bot.name = required("name", &name)?;
            fields.push("name");
        }
        if let Some(strategy) = update.strategy {
            if strategy.is_null() {
                return Err(CredentialsError::Validation("strategy is required".to_string()));
            }
            bot.strategy = strategy;
            fields.push("strategy");
        }
        bot.updated_at = now();

        self.storage.update_bot(&bot).await?;
        debug!(id = id, "Bot updated");

        self.record(
            id,
            BotLogKind::Config,
            "Bot configuration updated".to_string(),
            Some(json!({ "fields": fields })),
        )
        .await;
        Ok(bot)
    }

    /// Deletes a bot.
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<(), CredentialsError> {
        self.get(owner_id, id).await?;
        self.storage.delete_bot(id).await?;
        info!(id = id, "Bot deleted");
        Ok(())
    }

    /// Marks a bot as running.
    pub async fn start(&self, owner_id: &str, id: &str) -> Result<StoredBot, CredentialsError> {
        self.set_status(owner_id, id, BotStatus::Running).await
    }

    /// Marks a bot as stopped.
    pub async fn stop(&self, owner_id: &str, id: &str) -> Result<StoredBot, CredentialsError> {
        self.set_status(owner_id, id, BotStatus::Stopped).await
    }

    /// Sets the status flag of a bot.
    pub async fn set_status(
        &self,
        owner_id: &str,
        id: &str,
        status: BotStatus,
    ) -> Result<StoredBot, CredentialsError> {
        let mut bot = self.get(owner_id, id).await?;
        if bot.status == status {
            return Ok(bot);
        }

        let previous = bot.status;
        bot.status = status;
        bot.updated_at = now();
        self.storage.update_bot(&bot).await?;
        info!(id = id, status = %status, "Bot status changed");

        let message = match status {
            BotStatus::Running => "Bot started",
            BotStatus::Stopped => "Bot stopped",
            BotStatus::Error => "Bot marked as failed",
        };
        self.record(
            id,
            BotLogKind::Status,
            message.to_string(),
            Some(json!({ "from": previous, "to": status })),
        )
        .await;
        Ok(bot)
    }

    /// Returns the activity log of a bot, newest first.
    pub async fn logs(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<Vec<StoredBotLog>, CredentialsError> {
        self.get(owner_id, id).await?;
        Ok(self.storage.list_bot_logs(id).await?)
    }

    /// Appends an activity log entry. A failed write is logged, never
    /// surfaced: the change it describes has already been stored.
    async fn record(
        &self,
        bot_id: &str,
        kind: BotLogKind,
        message: String,
        data: Option<serde_json::Value>,
    ) {
        let entry = StoredBotLog {
            id: Uuid::new_v4().to_string(),
            bot_id: bot_id.to_string(),
            timestamp: now(),
            kind,
            message,
            data,
        };

        if let Err(e) = self.storage.insert_bot_log(&entry).await {
            warn!(bot = bot_id, kind = %kind, error = %e, "Failed to record bot log");
        }
    }

    /// Returns the recorded performance counters of a bot.
    pub async fn performance(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<BotPerformance, CredentialsError> {
        Ok(self.get(owner_id, id).await?.performance)
    }
}
