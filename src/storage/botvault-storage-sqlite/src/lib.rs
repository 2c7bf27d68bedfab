//! # Botvault Storage - SQLite Backend
//!
//! SQLite implementation of the storage backend with tenant isolation.
//! Each tenant gets its own database file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use botvault_crypto::Ciphertext;
use botvault_storage::{
    BotLogKind, BotStatus, CredentialPatch, StorageBackend, StorageError, StoredBot, StoredBotLog,
    StoredCredential,
};

/// SQL schema for credential and bot tables.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS credentials (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    exchange    TEXT NOT NULL,
    api_key     TEXT NOT NULL,
    api_secret  TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_credentials_owner ON credentials (owner_id);

CREATE TABLE IF NOT EXISTS bots (
    id             TEXT PRIMARY KEY,
    owner_id       TEXT NOT NULL,
    name           TEXT NOT NULL,
    exchange       TEXT NOT NULL,
    credential_id  TEXT NOT NULL,
    strategy       TEXT NOT NULL,
    status         TEXT NOT NULL DEFAULT 'stopped',
    performance    TEXT NOT NULL,
    created_at     INTEGER NOT NULL,
    updated_at     INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_bots_owner ON bots (owner_id);
CREATE INDEX IF NOT EXISTS idx_bots_credential ON bots (credential_id);

CREATE TABLE IF NOT EXISTS bot_logs (
    seq        INTEGER PRIMARY KEY AUTOINCREMENT,
    id         TEXT NOT NULL UNIQUE,
    bot_id     TEXT NOT NULL,
    timestamp  INTEGER NOT NULL,
    kind       TEXT NOT NULL,
    message    TEXT NOT NULL,
    data       TEXT
);

CREATE INDEX IF NOT EXISTS idx_bot_logs_bot ON bot_logs (bot_id, timestamp)
"#;

type CredentialRow = (String, String, String, String, String, i64);

type BotRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    i64,
    i64,
);

type BotLogRow = (String, String, i64, String, String, Option<String>);

const CREDENTIAL_COLUMNS: &str = "id, owner_id, exchange, api_key, api_secret, created_at";

const BOT_COLUMNS: &str =
    "id, owner_id, name, exchange, credential_id, strategy, status, performance, created_at, updated_at";

const BOT_LOG_COLUMNS: &str = "id, bot_id, timestamp, kind, message, data";

/// SQLite storage backend with tenant isolation.
///
/// Each tenant gets its own database file at `{base_path}/{tenant}.db`.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
}

impl SqliteBackend {
    /// Opens or creates a SQLite database for a tenant.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory where tenant databases are stored
    /// * `tenant` - Tenant identifier (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Tenant name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, tenant: &str) -> Result<Self, StorageError> {
        Self::validate_tenant(tenant)?;

        let base = base_path.as_ref();
        std::fs::create_dir_all(base).map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{tenant}.db"));
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        debug!(tenant = %tenant, path = %db_path.display(), "Opening SQLite database");

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self {
            pool,
            db_path: Some(db_path),
        };

        backend.migrate().await?;

        info!(tenant = %tenant, "SQLite backend ready");

        Ok(backend)
    }

    /// Opens a private in-memory database.
    ///
    /// The pool is limited to one connection so every query sees the same
    /// database.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self {
            pool,
            db_path: None,
        };
        backend.migrate().await?;

        Ok(backend)
    }

    /// Closes every pooled connection, flushing pending writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Returns the database file path, if file-backed.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Validates that a tenant name is safe.
    ///
    /// Only allows: lowercase letters, digits, underscore, hyphen.
    fn validate_tenant(tenant: &str) -> Result<(), StorageError> {
        if tenant.is_empty() {
            return Err(StorageError::InvalidInput("tenant cannot be empty".into()));
        }

        if tenant.len() > 64 {
            return Err(StorageError::InvalidInput("tenant name too long".into()));
        }

        let valid = tenant
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "tenant must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    /// Runs database migrations.
    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("Running database migrations");

        for statement in SCHEMA.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement.trim())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;
        }

        debug!("Migrations complete");

        Ok(())
    }

    fn credential_from_row(row: CredentialRow) -> StoredCredential {
        let (id, owner_id, exchange, api_key, api_secret, created_at) = row;
        StoredCredential {
            id,
            owner_id,
            exchange,
            api_key: Ciphertext::from_stored(api_key),
            api_secret: Ciphertext::from_stored(api_secret),
            created_at: created_at as u64,
        }
    }

    fn bot_from_row(row: BotRow) -> Result<StoredBot, StorageError> {
        let (
            id,
            owner_id,
            name,
            exchange,
            credential_id,
            strategy,
            status,
            performance,
            created_at,
            updated_at,
        ) = row;

        Ok(StoredBot {
            id,
            owner_id,
            name,
            exchange,
            credential_id,
            strategy: serde_json::from_str(&strategy)
                .map_err(|e| StorageError::Serialization(format!("invalid strategy: {e}")))?,
            status: status.parse::<BotStatus>()?,
            performance: serde_json::from_str(&performance)
                .map_err(|e| StorageError::Serialization(format!("invalid performance: {e}")))?,
            created_at: created_at as u64,
            updated_at: updated_at as u64,
        })
    }

    fn encode_bot(bot: &StoredBot) -> Result<(String, String), StorageError> {
        let strategy = serde_json::to_string(&bot.strategy)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        let performance = serde_json::to_string(&bot.performance)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok((strategy, performance))
    }

    fn bot_log_from_row(row: BotLogRow) -> Result<StoredBotLog, StorageError> {
        let (id, bot_id, timestamp, kind, message, data) = row;
        let data = data
            .map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|e| StorageError::Serialization(format!("invalid log data: {e}")))?;

        Ok(StoredBotLog {
            id,
            bot_id,
            timestamp: timestamp as u64,
            kind: kind.parse::<BotLogKind>()?,
            message,
            data,
        })
    }
}

fn query_failed(e: sqlx::Error) -> StorageError {
    match e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StorageError::AlreadyExists(db.message().to_string())
        },
        other => StorageError::QueryFailed(other.to_string()),
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn insert_credential(&self, credential: &StoredCredential) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO credentials (id, owner_id, exchange, api_key, api_secret, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&credential.id)
        .bind(&credential.owner_id)
        .bind(&credential.exchange)
        .bind(credential.api_key.as_str())
        .bind(credential.api_secret.as_str())
        .bind(credential.created_at as i64)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(())
    }

    async fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>, StorageError> {
        let row: Option<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(row.map(Self::credential_from_row))
    }

    async fn patch_credential(
        &self,
        expected: &StoredCredential,
        patch: &CredentialPatch,
    ) -> Result<(), StorageError> {
        // (column, new value, value the patch was computed from)
        let mut columns: Vec<(&str, &str, &str)> = Vec::new();
        if let Some(exchange) = &patch.exchange {
            columns.push(("exchange", exchange.as_str(), expected.exchange.as_str()));
        }
        if let Some(api_key) = &patch.api_key {
            columns.push(("api_key", api_key.as_str(), expected.api_key.as_str()));
        }
        if let Some(api_secret) = &patch.api_secret {
            columns.push(("api_secret", api_secret.as_str(), expected.api_secret.as_str()));
        }

        if columns.is_empty() {
            return Ok(());
        }

        let assignments = columns
            .iter()
            .map(|(column, _, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let guards: String = columns
            .iter()
            .map(|(column, _, _)| format!(" AND {column} = ?"))
            .collect();
        let sql = format!("UPDATE credentials SET {assignments} WHERE id = ?{guards}");

        let mut query = sqlx::query(&sql);
        for (_, new_value, _) in &columns {
            query = query.bind(*new_value);
        }
        query = query.bind(&expected.id);
        for (_, _, old_value) in &columns {
            query = query.bind(*old_value);
        }

        let result = query.execute(&self.pool).await.map_err(query_failed)?;

        if result.rows_affected() == 0 {
            if self.credential_exists(&expected.id).await? {
                return Err(StorageError::Conflict(expected.id.clone()));
            }
            return Err(StorageError::NotFound(expected.id.clone()));
        }

        Ok(())
    }

    async fn delete_unreferenced_credential(&self, id: &str) -> Result<bool, StorageError> {
        let result = sqlx::query(
            "DELETE FROM credentials WHERE id = ? AND NOT EXISTS (SELECT 1 FROM bots WHERE credential_id = ?)",
        )
        .bind(id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_credentials(&self, owner_id: &str) -> Result<Vec<StoredCredential>, StorageError> {
        let rows: Vec<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials WHERE owner_id = ? ORDER BY created_at, id"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows.into_iter().map(Self::credential_from_row).collect())
    }

    async fn list_all_credentials(&self) -> Result<Vec<StoredCredential>, StorageError> {
        let rows: Vec<CredentialRow> = sqlx::query_as(&format!(
            "SELECT {CREDENTIAL_COLUMNS} FROM credentials ORDER BY created_at, id"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        Ok(rows.into_iter().map(Self::credential_from_row).collect())
    }

    async fn delete_credentials_for_owner(&self, owner_id: &str) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM credentials WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(query_failed)?;

        Ok(result.rows_affected())
    }

    async fn count_bots_referencing(&self, credential_id: &str) -> Result<u64, StorageError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM bots WHERE credential_id = ?")
            .bind(credential_id)
            .fetch_one(&self.pool)
            .await
            .map_err(query_failed)?;

        Ok(row.0 as u64)
    }

    async fn insert_bot(&self, bot: &StoredBot) -> Result<(), StorageError> {
        let (strategy, performance) = Self::encode_bot(bot)?;

        let result = sqlx::query(&format!(
            "INSERT INTO bots ({BOT_COLUMNS}) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ? \
             WHERE EXISTS (SELECT 1 FROM credentials WHERE id = ?)"
        ))
        .bind(&bot.id)
        .bind(&bot.owner_id)
        .bind(&bot.name)
        .bind(&bot.exchange)
        .bind(&bot.credential_id)
        .bind(strategy)
        .bind(bot.status.as_str())
        .bind(performance)
        .bind(bot.created_at as i64)
        .bind(bot.updated_at as i64)
        .bind(&bot.credential_id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(bot.credential_id.clone()));
        }

        Ok(())
    }

    async fn get_bot(&self, id: &str) -> Result<Option<StoredBot>, StorageError> {
        let row: Option<BotRow> =
            sqlx::query_as(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(query_failed)?;

        row.map(Self::bot_from_row).transpose()
    }

    async fn update_bot(&self, bot: &StoredBot) -> Result<(), StorageError> {
        let (strategy, performance) = Self::encode_bot(bot)?;

        let result = sqlx::query(
            "UPDATE bots SET name = ?, exchange = ?, credential_id = ?, strategy = ?, status = ?, performance = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&bot.name)
        .bind(&bot.exchange)
        .bind(&bot.credential_id)
        .bind(strategy)
        .bind(bot.status.as_str())
        .bind(performance)
        .bind(bot.updated_at as i64)
        .bind(&bot.id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(bot.id.clone()));
        }

        Ok(())
    }

    async fn delete_bot(&self, id: &str) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        sqlx::query("DELETE FROM bot_logs WHERE bot_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;

        sqlx::query("DELETE FROM bots WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;

        tx.commit().await.map_err(query_failed)?;
        Ok(())
    }

    async fn list_bots(&self, owner_id: &str) -> Result<Vec<StoredBot>, StorageError> {
        let rows: Vec<BotRow> = sqlx::query_as(&format!(
            "SELECT {BOT_COLUMNS} FROM bots WHERE owner_id = ? ORDER BY created_at, id"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter().map(Self::bot_from_row).collect()
    }

    async fn delete_bots_for_owner(&self, owner_id: &str) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(query_failed)?;

        sqlx::query("DELETE FROM bot_logs WHERE bot_id IN (SELECT id FROM bots WHERE owner_id = ?)")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;

        let result = sqlx::query("DELETE FROM bots WHERE owner_id = ?")
            .bind(owner_id)
            .execute(&mut *tx)
            .await
            .map_err(query_failed)?;

        tx.commit().await.map_err(query_failed)?;
        Ok(result.rows_affected())
    }

    async fn insert_bot_log(&self, entry: &StoredBotLog) -> Result<(), StorageError> {
        let data = entry
            .data
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let result = sqlx::query(&format!(
            "INSERT INTO bot_logs ({BOT_LOG_COLUMNS}) \
             SELECT ?, ?, ?, ?, ?, ? \
             WHERE EXISTS (SELECT 1 FROM bots WHERE id = ?)"
        ))
        .bind(&entry.id)
        .bind(&entry.bot_id)
        .bind(entry.timestamp as i64)
        .bind(entry.kind.as_str())
        .bind(&entry.message)
        .bind(data)
        .bind(&entry.bot_id)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(entry.bot_id.clone()));
        }

        Ok(())
    }

    async fn list_bot_logs(&self, bot_id: &str) -> Result<Vec<StoredBotLog>, StorageError> {
        let rows: Vec<BotLogRow> = sqlx::query_as(&format!(
            "SELECT {BOT_LOG_COLUMNS} FROM bot_logs WHERE bot_id = ? ORDER BY timestamp DESC, seq DESC"
        ))
        .bind(bot_id)
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.into_iter().map(Self::bot_log_from_row).collect()
    }
}
