//! Integration tests for Botvault.
//!
//! These tests drive the credential vault and bot registry against a real
//! SQLite database on disk.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tempfile::TempDir;

use botvault_credentials::{BotRegistry, CredentialVault};
use botvault_crypto::{CipherCodec, FallbackPolicy, KeyMaterial, KeyMaterialConfig};
use botvault_storage::StorageBackend;
use botvault_storage_sqlite::SqliteBackend;

/// Key used by the fixtures.
pub const TEST_KEY_HEX: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// IV used by the fixtures.
pub const TEST_IV_HEX: &str = "f0f1f2f3f4f5f6f7f8f9fafbfcfdfeff";

// ============================================================================
// Test Vault
// ============================================================================

/// A vault over a tenant database in its own temporary directory.
pub struct TestVault {
    pub dir: TempDir,
    pub backend: Arc<SqliteBackend>,
    pub vault: CredentialVault,
    pub bots: BotRegistry,
}

impl TestVault {
    /// Opens a fresh vault using the fixture key material.
    pub async fn start() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create temp dir")?;
        let codec = codec(TEST_KEY_HEX, TEST_IV_HEX)?;
        Self::open_in(dir, codec).await
    }

    /// Opens a vault over an existing directory.
    pub async fn open_in(dir: TempDir, codec: CipherCodec) -> Result<Self> {
        let backend = Arc::new(SqliteBackend::open(dir.path(), "test").await?);
        let storage: Arc<dyn StorageBackend> = backend.clone();

        Ok(Self {
            vault: CredentialVault::new(storage.clone(), Arc::new(codec)),
            bots: BotRegistry::new(storage),
            backend,
            dir,
        })
    }

    /// Closes the database and opens it again with `codec`.
    pub async fn reopen(self, codec: CipherCodec) -> Result<Self> {
        self.backend.close().await;
        Self::open_in(self.dir, codec).await
    }
}

/// Builds a codec from explicit hex key material.
pub fn codec(key_hex: &str, iv_hex: &str) -> Result<CipherCodec> {
    let material = KeyMaterial::resolve(
        &KeyMaterialConfig::new(key_hex, iv_hex),
        FallbackPolicy::Deny,
    )?;
    Ok(CipherCodec::new(material))
}

/// Reads every file in `dir` and reports whether any contains `needle`.
pub fn any_file_contains(dir: &Path, needle: &str) -> Result<bool> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let bytes = std::fs::read(&path)?;
        if bytes
            .windows(needle.len())
            .any(|window| window == needle.as_bytes())
        {
            return Ok(true);
        }
    }
    Ok(false)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use botvault_credentials::{CredentialUpdate, CredentialsError, NewBot, NewCredential};
    use botvault_crypto::Ciphertext;
    use botvault_storage::{BotLogKind, BotStatus, StoredCredential};

    fn binance() -> NewCredential {
        NewCredential::new("Binance", "AKIA1234", "s3cr3t-value")
    }

    #[tokio::test]
    async fn test_store_and_read_back() {
        let t = TestVault::start().await.unwrap();

        let created = t.vault.create("alice", binance()).await.unwrap();

        let listed = t.vault.list("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        let view = listed[0].as_ref().unwrap();
        assert_eq!(view.id, created.id);
        assert_eq!(view.exchange, "Binance");
        assert_eq!(view.api_key.as_str(), "AKIA1234");
        assert_eq!(view.api_secret.as_str(), "s3cr3t-value");
        assert_eq!(view.masked_secret(), "****alue");
    }

    #[tokio::test]
    async fn test_rows_hold_lowercase_hex_ciphertext() {
        let t = TestVault::start().await.unwrap();
        let created = t.vault.create("alice", binance()).await.unwrap();

        let row = t.backend.get_credential(&created.id).await.unwrap().unwrap();
        for stored in [&row.api_key, &row.api_secret] {
            let hex = stored.as_str();
            assert!(!hex.is_empty());
            assert_eq!(hex.len() % 32, 0);
            assert!(hex.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
        }

        // Same key material, same plaintext: same ciphertext.
        let fixture = codec(TEST_KEY_HEX, TEST_IV_HEX).unwrap();
        assert_eq!(fixture.encrypt("AKIA1234"), row.api_key);
    }

    #[tokio::test]
    async fn test_plaintext_never_reaches_disk() {
        let t = TestVault::start().await.unwrap();
        t.vault.create("alice", binance()).await.unwrap();
        t.backend.close().await;

        assert!(!any_file_contains(t.dir.path(), "s3cr3t-value").unwrap());
        assert!(!any_file_contains(t.dir.path(), "AKIA1234").unwrap());
        assert!(any_file_contains(t.dir.path(), "Binance").unwrap());
    }

    #[tokio::test]
    async fn test_survives_reopen_with_same_material() {
        let t = TestVault::start().await.unwrap();
        let created = t.vault.create("alice", binance()).await.unwrap();

        let t = t
            .reopen(codec(TEST_KEY_HEX, TEST_IV_HEX).unwrap())
            .await
            .unwrap();
        let view = t.vault.get("alice", &created.id).await.unwrap();
        assert_eq!(view.api_secret.as_str(), "s3cr3t-value");
    }

    #[tokio::test]
    async fn test_changed_material_reports_unreadable() {
        let t = TestVault::start().await.unwrap();
        let created = t.vault.create("alice", binance()).await.unwrap();

        let other = CipherCodec::new(KeyMaterial::generate());
        let t = t.reopen(other).await.unwrap();

        let listed = t.vault.list("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        match &listed[0] {
            Err(CredentialsError::Unreadable { id }) => assert_eq!(id, &created.id),
            other => panic!("expected unreadable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_one_bad_row_does_not_hide_the_rest() {
        let t = TestVault::start().await.unwrap();
        let good = t.vault.create("alice", binance()).await.unwrap();

        t.backend
            .insert_credential(&StoredCredential {
                id: "corrupt".to_string(),
                owner_id: "alice".to_string(),
                exchange: "Kraken".to_string(),
                api_key: Ciphertext::from_stored("0011"),
                api_secret: Ciphertext::from_stored("not hex at all"),
                created_at: good.created_at + 10,
            })
            .await
            .unwrap();

        let listed = t.vault.list("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].as_ref().unwrap().api_key.as_str(), "AKIA1234");
        assert!(matches!(
            listed[1],
            Err(CredentialsError::Unreadable { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_unchanged_keeps_row_identical() {
        let t = TestVault::start().await.unwrap();
        let created = t.vault.create("alice", binance()).await.unwrap();
        let before = t.backend.get_credential(&created.id).await.unwrap().unwrap();

        let update = CredentialUpdate::default()
            .exchange("Binance")
            .api_key("AKIA1234")
            .api_secret("s3cr3t-value");
        let outcome = t.vault.update("alice", &created.id, &update).await.unwrap();
        assert!(outcome.changed.is_empty());

        let after = t.backend.get_credential(&created.id).await.unwrap().unwrap();
        assert_eq!(before, after);

        let view = t.vault.get("alice", &created.id).await.unwrap();
        assert_eq!(view.api_key.as_str(), "AKIA1234");
    }

    #[tokio::test]
    async fn test_rekey_rotation() {
        let t = TestVault::start().await.unwrap();
        let created = t.vault.create("alice", binance()).await.unwrap();

        let old = codec(TEST_KEY_HEX, TEST_IV_HEX).unwrap();
        let (new_key, new_iv) = KeyMaterial::generate().to_hex();
        let new = codec(&new_key, &new_iv).unwrap();

        let report = botvault_credentials::rekey(t.backend.as_ref(), &old, &new)
            .await
            .unwrap();
        assert_eq!(report.rewritten, 1);
        assert_eq!(report.skipped, 0);

        let t = t.reopen(codec(&new_key, &new_iv).unwrap()).await.unwrap();
        let view = t.vault.get("alice", &created.id).await.unwrap();
        assert_eq!(view.api_key.as_str(), "AKIA1234");
        assert_eq!(view.api_secret.as_str(), "s3cr3t-value");
    }

    #[tokio::test]
    async fn test_bot_lifecycle() {
        let t = TestVault::start().await.unwrap();
        let credential = t.vault.create("alice", binance()).await.unwrap();

        let bot = t
            .bots
            .create(
                "alice",
                NewBot {
                    name: "grid".to_string(),
                    exchange: "Binance".to_string(),
                    credential_id: credential.id.clone(),
                    strategy: serde_json::json!({ "type": "grid", "levels": 10 }),
                },
            )
            .await
            .unwrap();
        assert_eq!(bot.status, BotStatus::Stopped);

        let running = t.bots.start("alice", &bot.id).await.unwrap();
        assert_eq!(running.status, BotStatus::Running);

        let entries = t.bots.logs("alice", &bot.id).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, BotLogKind::Status);
        assert_eq!(entries[1].kind, BotLogKind::Info);
        assert!(matches!(
            t.bots.logs("bob", &bot.id).await,
            Err(CredentialsError::NotFound(_))
        ));

        let result = t.vault.delete("alice", &credential.id).await;
        assert!(matches!(result, Err(CredentialsError::InUse { bots: 1, .. })));

        t.bots.delete("alice", &bot.id).await.unwrap();
        assert!(t.backend.list_bot_logs(&bot.id).await.unwrap().is_empty());
        t.vault.delete("alice", &credential.id).await.unwrap();
        assert!(t.vault.list("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_field_updates_both_land() {
        let t = TestVault::start().await.unwrap();
        let created = t.vault.create("alice", binance()).await.unwrap();

        let rotate = CredentialUpdate::default().api_secret("rotated-secret");
        let relabel = CredentialUpdate::default().exchange("Binance US");
        let (a, b) = tokio::join!(
            t.vault.update("alice", &created.id, &rotate),
            t.vault.update("alice", &created.id, &relabel),
        );
        a.unwrap();
        b.unwrap();

        let view = t.vault.get("alice", &created.id).await.unwrap();
        assert_eq!(view.exchange, "Binance US");
        assert_eq!(view.api_secret.as_str(), "rotated-secret");
        assert_eq!(view.api_key.as_str(), "AKIA1234");
    }

    #[tokio::test]
    async fn test_purge_owner_spares_others() {
        let t = TestVault::start().await.unwrap();
        let credential = t.vault.create("alice", binance()).await.unwrap();
        t.vault.create("bob", binance()).await.unwrap();
        t.bots
            .create(
                "alice",
                NewBot {
                    name: "dca".to_string(),
                    exchange: "Binance".to_string(),
                    credential_id: credential.id.clone(),
                    strategy: serde_json::json!({ "type": "dca" }),
                },
            )
            .await
            .unwrap();

        let report = t.vault.purge_owner("alice").await.unwrap();
        assert_eq!(report.credentials, 1);
        assert_eq!(report.bots, 1);

        assert!(t.vault.list("alice").await.unwrap().is_empty());
        assert_eq!(t.vault.list("bob").await.unwrap().len(), 1);
    }
}
