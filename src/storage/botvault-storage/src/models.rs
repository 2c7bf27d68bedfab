//! Row types persisted by storage backends.

use std::fmt;
use std::str::FromStr;

use botvault_crypto::Ciphertext;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// An exchange credential as it sits at rest.
///
/// `api_key` and `api_secret` are ciphertext; there is no way to build this
/// row from plaintext strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    /// Record identifier.
    pub id: String,
    /// Owning user. Immutable after creation.
    pub owner_id: String,
    /// Exchange label, e.g. "Binance".
    pub exchange: String,
    /// Encrypted API key.
    pub api_key: Ciphertext,
    /// Encrypted API secret.
    pub api_secret: Ciphertext,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

/// Column-level change to a credential row.
///
/// Backends write only the columns set here, and only while each of them
/// still holds the value the change was computed from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPatch {
    /// New exchange label.
    pub exchange: Option<String>,
    /// New encrypted API key.
    pub api_key: Option<Ciphertext>,
    /// New encrypted API secret.
    pub api_secret: Option<Ciphertext>,
}

impl CredentialPatch {
    /// Returns true if no column is touched.
    pub fn is_empty(&self) -> bool {
        self.exchange.is_none() && self.api_key.is_none() && self.api_secret.is_none()
    }

    /// Returns true if every patched column of `row` still matches `expected`.
    pub fn matches(&self, row: &StoredCredential, expected: &StoredCredential) -> bool {
        (self.exchange.is_none() || row.exchange == expected.exchange)
            && (self.api_key.is_none() || row.api_key == expected.api_key)
            && (self.api_secret.is_none() || row.api_secret == expected.api_secret)
    }

    /// Writes the patched columns into `row`.
    pub fn apply_to(&self, row: &mut StoredCredential) {
        if let Some(exchange) = &self.exchange {
            row.exchange = exchange.clone();
        }
        if let Some(api_key) = &self.api_key {
            row.api_key = api_key.clone();
        }
        if let Some(api_secret) = &self.api_secret {
            row.api_secret = api_secret.clone();
        }
    }
}

/// Lifecycle flag of a bot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotStatus {
    /// Not running.
    #[default]
    Stopped,
    /// Marked as running.
    Running,
    /// Marked as failed.
    Error,
}

impl BotStatus {
    /// Returns the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            BotStatus::Stopped => "stopped",
            BotStatus::Running => "running",
            BotStatus::Error => "error",
        }
    }
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stopped" => Ok(BotStatus::Stopped),
            "running" => Ok(BotStatus::Running),
            "error" => Ok(BotStatus::Error),
            other => Err(StorageError::Serialization(format!(
                "unknown bot status: {other}"
            ))),
        }
    }
}

/// Recorded performance counters of a bot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotPerformance {
    /// Realised profit and loss.
    pub pnl: f64,
    /// Fraction of winning trades.
    pub win_rate: f64,
    /// Number of trades.
    pub trade_count: u64,
    /// Timestamp of the last trade (Unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_trade_at: Option<u64>,
}

/// A bot configuration record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBot {
    /// Record identifier.
    pub id: String,
    /// Owning user.
    pub owner_id: String,
    /// Display name.
    pub name: String,
    /// Exchange label.
    pub exchange: String,
    /// Non-owning reference to a credential record.
    pub credential_id: String,
    /// Free-form strategy configuration.
    pub strategy: serde_json::Value,
    /// Current status flag.
    pub status: BotStatus,
    /// Performance counters.
    pub performance: BotPerformance,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// Last update timestamp (Unix seconds).
    pub updated_at: u64,
}

/// Category of a bot log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotLogKind {
    /// General information.
    Info,
    /// Status flag changed.
    Status,
    /// Configuration changed.
    Config,
    /// Something went wrong.
    Error,
}

impl BotLogKind {
    /// Returns the persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            BotLogKind::Info => "info",
            BotLogKind::Status => "status",
            BotLogKind::Config => "config",
            BotLogKind::Error => "error",
        }
    }
}

impl fmt::Display for BotLogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotLogKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(BotLogKind::Info),
            "status" => Ok(BotLogKind::Status),
            "config" => Ok(BotLogKind::Config),
            "error" => Ok(BotLogKind::Error),
            other => Err(StorageError::Serialization(format!(
                "unknown bot log kind: {other}"
            ))),
        }
    }
}

/// An entry in a bot's activity log.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredBotLog {
    /// Record identifier.
    pub id: String,
    /// Bot the entry belongs to.
    pub bot_id: String,
    /// When the entry was written (Unix seconds).
    pub timestamp: u64,
    /// Entry category.
    pub kind: BotLogKind,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload.
    pub data: Option<serde_json::Value>,
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_status_roundtrip() {
        for status in [BotStatus::Stopped, BotStatus::Running, BotStatus::Error] {
            assert_eq!(status.as_str().parse::<BotStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_bot_status_unknown() {
        let result = "paused".parse::<BotStatus>();
        assert!(matches!(result, Err(StorageError::Serialization(_))));
    }

    #[test]
    fn test_bot_status_serde_lowercase() {
        let json = serde_json::to_string(&BotStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn test_bot_log_kind_roundtrip() {
        for kind in [
            BotLogKind::Info,
            BotLogKind::Status,
            BotLogKind::Config,
            BotLogKind::Error,
        ] {
            assert_eq!(kind.as_str().parse::<BotLogKind>().unwrap(), kind);
        }
        assert!(matches!(
            "debug".parse::<BotLogKind>(),
            Err(StorageError::Serialization(_))
        ));
    }

    fn credential() -> StoredCredential {
        StoredCredential {
            id: "c1".to_string(),
            owner_id: "alice".to_string(),
            exchange: "Binance".to_string(),
            api_key: Ciphertext::from_stored("00ff"),
            api_secret: Ciphertext::from_stored("ff00"),
            created_at: 1,
        }
    }

    #[test]
    fn test_patch_guards_only_patched_columns() {
        let loaded = credential();
        let mut current = loaded.clone();
        current.exchange = "Kraken".to_string();

        let secret_only = CredentialPatch {
            api_secret: Some(Ciphertext::from_stored("abcd")),
            ..Default::default()
        };
        assert!(secret_only.matches(&current, &loaded));

        let exchange_too = CredentialPatch {
            exchange: Some("Bitget".to_string()),
            ..Default::default()
        };
        assert!(!exchange_too.matches(&current, &loaded));

        secret_only.apply_to(&mut current);
        assert_eq!(current.api_secret.as_str(), "abcd");
        assert_eq!(current.exchange, "Kraken");
        assert_eq!(current.api_key, loaded.api_key);
    }

    #[test]
    fn test_performance_defaults() {
        let perf = BotPerformance::default();
        let json = serde_json::to_value(&perf).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "pnl": 0.0, "winRate": 0.0, "tradeCount": 0 })
        );
    }
}
