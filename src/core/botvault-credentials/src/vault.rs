//! Credential vault.
//!
//! Every plaintext API key and secret passes through here on its way to and
//! from storage. Writes encrypt each changed field exactly once; reads
//! decrypt each record independently so one bad row never hides the rest.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use botvault_crypto::CipherCodec;
use botvault_storage::{StorageBackend, StoredCredential};

use crate::error::CredentialsError;
use crate::model::{
    ChangeSet, CredentialUpdate, CredentialView, NewCredential, PurgeReport, UpdateOutcome,
};
use crate::{ensure_present, now, required};

/// Encrypting front for credential storage.
#[derive(Clone)]
pub struct CredentialVault {
    storage: Arc<dyn StorageBackend>,
    codec: Arc<CipherCodec>,
}

impl CredentialVault {
    /// Creates a vault over a storage backend and cipher.
    pub fn new(storage: Arc<dyn StorageBackend>, codec: Arc<CipherCodec>) -> Self {
        Self { storage, codec }
    }

    /// Returns the cipher in use.
    pub fn codec(&self) -> &CipherCodec {
        &self.codec
    }

    /// Stores a new credential for `owner_id`.
    ///
    /// Returns the decrypted view of what was stored.
    pub async fn create(
        &self,
        owner_id: &str,
        credential: NewCredential,
    ) -> Result<CredentialView, CredentialsError> {
        let owner_id = required("owner_id", owner_id)?;
        let exchange = required("exchange", &credential.exchange)?;
        ensure_present("api_key", &credential.api_key)?;
        ensure_present("api_secret", &credential.api_secret)?;

        let record = StoredCredential {
            id: Uuid::new_v4().to_string(),
            owner_id,
            exchange,
            api_key: self.codec.encrypt(&credential.api_key),
            api_secret: self.codec.encrypt(&credential.api_secret),
            created_at: now(),
        };

        self.storage.insert_credential(&record).await?;

        info!(
            id = %record.id,
            owner = %record.owner_id,
            exchange = %record.exchange,
            "Credential stored"
        );

        self.reveal(&record)
    }

    /// Lists the credentials of `owner_id`, oldest first.
    ///
    /// Each entry is decrypted on its own: a record that no longer decrypts
    /// comes back as [`CredentialsError::Unreadable`] without affecting the
    /// others.
    pub async fn list(
        &self,
        owner_id: &str,
    ) -> Result<Vec<Result<CredentialView, CredentialsError>>, CredentialsError> {
        let rows = self.storage.list_credentials(owner_id).await?;
        Ok(rows.iter().map(|row| self.reveal(row)).collect())
    }

    /// Fetches one credential owned by `owner_id`.
    pub async fn get(&self, owner_id: &str, id: &str) -> Result<CredentialView, CredentialsError> {
        let record = self.load_owned(owner_id, id).await?;
        self.reveal(&record)
    }

    /// Applies an update to a credential owned by `owner_id`.
    ///
    /// Only fields whose value differs from what is stored are written. When
    /// nothing changed the row is left untouched.
    ///
    /// The write only lands if the written columns still hold the values this
    /// update was computed from. Concurrent updates of different fields both
    /// persist; a lost race on the same field returns
    /// [`CredentialsError::Conflict`].
    pub async fn update(
        &self,
        owner_id: &str,
        id: &str,
        update: &CredentialUpdate,
    ) -> Result<UpdateOutcome, CredentialsError> {
        let record = self.load_owned(owner_id, id).await?;

        let changes = ChangeSet::diff(&self.codec, &record, update)?;
        let changed = changes.fields();
        if changes.is_empty() {
            debug!(id = id, "Credential update had no changes");
            return Ok(UpdateOutcome { changed });
        }

        let patch = changes.into_patch(&self.codec);
        if let Err(e) = self.storage.patch_credential(&record, &patch).await {
            warn!(id = id, error = %e, "Credential update not applied");
            return Err(e.into());
        }

        info!(
            id = id,
            fields = ?changed.iter().map(|f| f.to_string()).collect::<Vec<_>>(),
            "Credential updated"
        );
        Ok(UpdateOutcome { changed })
    }

    /// Deletes a credential owned by `owner_id`.
    ///
    /// Refused while any bot still references it. The reference check and
    /// the delete happen in one storage operation.
    pub async fn delete(&self, owner_id: &str, id: &str) -> Result<(), CredentialsError> {
        self.load_owned(owner_id, id).await?;

        if self.storage.delete_unreferenced_credential(id).await? {
            info!(id = id, "Credential deleted");
            return Ok(());
        }

        let bots = self.storage.count_bots_referencing(id).await?;
        if bots > 0 {
            return Err(CredentialsError::InUse {
                id: id.to_string(),
                bots,
            });
        }
        Err(CredentialsError::NotFound(id.to_string()))
    }

    /// Removes every bot and credential belonging to `owner_id`.
    pub async fn purge_owner(&self, owner_id: &str) -> Result<PurgeReport, CredentialsError> {
        let owner_id = required("owner_id", owner_id)?;

        let bots = self.storage.delete_bots_for_owner(&owner_id).await?;
        let credentials = self.storage.delete_credentials_for_owner(&owner_id).await?;

        if bots + credentials > 0 {
            warn!(
                owner = %owner_id,
                bots = bots,
                credentials = credentials,
                "Purged owner records"
            );
        }

        Ok(PurgeReport { bots, credentials })
    }

    async fn load_owned(
        &self,
        owner_id: &str,
        id: &str,
    ) -> Result<StoredCredential, CredentialsError> {
        let record = self
            .storage
            .get_credential(id)
            .await?
            .ok_or_else(|| CredentialsError::NotFound(id.to_string()))?;

        if record.owner_id != owner_id {
            return Err(CredentialsError::Forbidden(id.to_string()));
        }
        Ok(record)
    }

    fn reveal(&self, record: &StoredCredential) -> Result<CredentialView, CredentialsError> {
        let decrypt = |field: &str, value: &str| {
            self.codec.decrypt(value).map_err(|e| {
                warn!(id = %record.id, field = field, error = %e, "Credential unreadable");
                CredentialsError::Unreadable {
                    id: record.id.clone(),
                }
            })
        };

        let api_key = decrypt("api_key", record.api_key.as_str())?;
        let api_secret = decrypt("api_secret", record.api_secret.as_str())?;

        Ok(CredentialView {
            id: record.id.clone(),
            owner_id: record.owner_id.clone(),
            exchange: record.exchange.clone(),
            api_key,
            api_secret,
            created_at: record.created_at,
        })
    }
}
