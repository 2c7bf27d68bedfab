//! Re-keying of stored credentials.
//!
//! Rotating `ENCRYPTION_KEY` or `ENCRYPTION_IV` makes every existing row
//! unreadable. This rewrites each row from the old key material to the new
//! one; it is meant to run offline, before the service starts with the new
//! material.

use tracing::{info, warn};

use botvault_crypto::CipherCodec;
use botvault_storage::{CredentialPatch, StorageBackend, StorageError};

use crate::error::CredentialsError;

/// Outcome of a re-key run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RekeyReport {
    /// Rows re-encrypted under the new key material.
    pub rewritten: u64,
    /// Rows left untouched because they did not decrypt under the old
    /// key material.
    pub skipped: u64,
}

/// Re-encrypts every stored credential from `from` to `to`.
///
/// Rows that do not decrypt under `from` are skipped rather than encrypted a
/// second time, so running the migration twice is harmless. A row changed by
/// someone else while it is being rewritten is skipped as well.
pub async fn rekey(
    storage: &dyn StorageBackend,
    from: &CipherCodec,
    to: &CipherCodec,
) -> Result<RekeyReport, CredentialsError> {
    if from.fingerprint() == to.fingerprint() {
        return Err(CredentialsError::Validation(
            "new key material is identical to the current one".to_string(),
        ));
    }

    let mut report = RekeyReport::default();

    for row in storage.list_all_credentials().await? {
        let decrypted = from
            .decrypt(row.api_key.as_str())
            .and_then(|key| from.decrypt(row.api_secret.as_str()).map(|secret| (key, secret)));

        let (api_key, api_secret) = match decrypted {
            Ok(pair) => pair,
            Err(e) => {
                warn!(id = %row.id, error = %e, "Skipping credential during rekey");
                report.skipped += 1;
                continue;
            },
        };

        let patch = CredentialPatch {
            exchange: None,
            api_key: Some(to.encrypt(&api_key)),
            api_secret: Some(to.encrypt(&api_secret)),
        };

        match storage.patch_credential(&row, &patch).await {
            Ok(()) => report.rewritten += 1,
            Err(StorageError::Conflict(_)) | Err(StorageError::NotFound(_)) => {
                warn!(id = %row.id, "Credential changed during rekey, skipped");
                report.skipped += 1;
            },
            Err(e) => return Err(e.into()),
        }
    }

    info!(
        rewritten = report.rewritten,
        skipped = report.skipped,
        from = %from.fingerprint(),
        to = %to.fingerprint(),
        "Credential rekey complete"
    );
    Ok(report)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use botvault_crypto::{Ciphertext, KeyMaterial};
    use botvault_storage::{MemoryBackend, StoredCredential};

    use crate::model::NewCredential;
    use crate::vault::CredentialVault;

    #[tokio::test]
    async fn test_rekey_moves_rows_to_new_material() {
        let storage = Arc::new(MemoryBackend::new());
        let old = Arc::new(CipherCodec::new(KeyMaterial::generate()));
        let new = Arc::new(CipherCodec::new(KeyMaterial::generate()));

        let old_vault = CredentialVault::new(storage.clone(), old.clone());
        let view = old_vault
            .create("alice", NewCredential::new("Binance", "AKIA1234", "s3cr3t-value"))
            .await
            .unwrap();

        let report = rekey(storage.as_ref(), &old, &new).await.unwrap();
        assert_eq!(report, RekeyReport { rewritten: 1, skipped: 0 });

        let new_vault = CredentialVault::new(storage.clone(), new.clone());
        let fetched = new_vault.get("alice", &view.id).await.unwrap();
        assert_eq!(fetched.api_key.as_str(), "AKIA1234");
        assert_eq!(fetched.api_secret.as_str(), "s3cr3t-value");

        assert!(matches!(
            old_vault.get("alice", &view.id).await,
            Err(CredentialsError::Unreadable { .. })
        ));
    }

    #[tokio::test]
    async fn test_rekey_skips_unreadable_and_is_rerunnable() {
        let storage = Arc::new(MemoryBackend::new());
        let old = CipherCodec::new(KeyMaterial::generate());
        let new = CipherCodec::new(KeyMaterial::generate());

        storage
            .insert_credential(&StoredCredential {
                id: "good".to_string(),
                owner_id: "alice".to_string(),
                exchange: "Binance".to_string(),
                api_key: old.encrypt("key"),
                api_secret: old.encrypt("secret"),
                created_at: 1,
            })
            .await
            .unwrap();
        storage
            .insert_credential(&StoredCredential {
                id: "broken".to_string(),
                owner_id: "alice".to_string(),
                exchange: "Kraken".to_string(),
                api_key: Ciphertext::from_stored("abcd"),
                api_secret: old.encrypt("secret"),
                created_at: 2,
            })
            .await
            .unwrap();

        let first = rekey(storage.as_ref(), &old, &new).await.unwrap();
        assert_eq!(first, RekeyReport { rewritten: 1, skipped: 1 });

        let broken = storage.get_credential("broken").await.unwrap().unwrap();
        assert_eq!(broken.api_key.as_str(), "abcd");

        let second = rekey(storage.as_ref(), &old, &new).await.unwrap();
        assert_eq!(second, RekeyReport { rewritten: 0, skipped: 2 });

        let good = storage.get_credential("good").await.unwrap().unwrap();
        assert_eq!(new.decrypt(good.api_key.as_str()).unwrap().as_str(), "key");
    }

    #[tokio::test]
    async fn test_rekey_rejects_identical_material() {
        let storage = MemoryBackend::new();
        let material = KeyMaterial::generate();
        let (key_hex, iv_hex) = material.to_hex();
        let same = KeyMaterial::resolve(
            &botvault_crypto::KeyMaterialConfig::new(key_hex.as_str(), iv_hex.as_str()),
            botvault_crypto::FallbackPolicy::Deny,
        )
        .unwrap();

        let result = rekey(
            &storage,
            &CipherCodec::new(material),
            &CipherCodec::new(same),
        )
        .await;
        assert!(matches!(result, Err(CredentialsError::Validation(_))));
    }
}
