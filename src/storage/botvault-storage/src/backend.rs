//! Storage backend trait definition.

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{CredentialPatch, StoredBot, StoredBotLog, StoredCredential};

/// Storage backend trait for implementing different storage engines.
///
/// Credential rows cross this boundary only as ciphertext. Encrypting on the
/// way in and decrypting on the way out is the caller's job.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Inserts a new credential row.
    async fn insert_credential(&self, credential: &StoredCredential) -> Result<(), StorageError>;

    /// Gets a credential row by id.
    async fn get_credential(&self, id: &str) -> Result<Option<StoredCredential>, StorageError>;

    /// Writes the columns set in `patch` to the row `expected.id`.
    ///
    /// The write happens only if every patched column still holds the value
    /// in `expected`; otherwise nothing is written and
    /// [`StorageError::Conflict`] is returned. Columns not in the patch are
    /// neither written nor checked.
    async fn patch_credential(
        &self,
        expected: &StoredCredential,
        patch: &CredentialPatch,
    ) -> Result<(), StorageError>;

    /// Deletes a credential row unless a bot references it, as one atomic
    /// step. Returns false if nothing was deleted (missing or referenced).
    async fn delete_unreferenced_credential(&self, id: &str) -> Result<bool, StorageError>;

    /// Lists credentials owned by a user, oldest first.
    async fn list_credentials(&self, owner_id: &str) -> Result<Vec<StoredCredential>, StorageError>;

    /// Lists every credential row, oldest first.
    async fn list_all_credentials(&self) -> Result<Vec<StoredCredential>, StorageError>;

    /// Deletes all credentials owned by a user, returning how many were removed.
    async fn delete_credentials_for_owner(&self, owner_id: &str) -> Result<u64, StorageError>;

    /// Counts bots that reference a credential.
    async fn count_bots_referencing(&self, credential_id: &str) -> Result<u64, StorageError>;

    /// Inserts a new bot row.
    ///
    /// Fails with [`StorageError::NotFound`] if the referenced credential
    /// does not exist at the time of the insert.
    async fn insert_bot(&self, bot: &StoredBot) -> Result<(), StorageError>;

    /// Gets a bot row by id.
    async fn get_bot(&self, id: &str) -> Result<Option<StoredBot>, StorageError>;

    /// Replaces an existing bot row.
    async fn update_bot(&self, bot: &StoredBot) -> Result<(), StorageError>;

    /// Deletes a bot row and its log entries. Deleting a missing row is not
    /// an error.
    async fn delete_bot(&self, id: &str) -> Result<(), StorageError>;

    /// Lists bots owned by a user, oldest first.
    async fn list_bots(&self, owner_id: &str) -> Result<Vec<StoredBot>, StorageError>;

    /// Deletes all bots owned by a user and their log entries, returning how
    /// many bots were removed.
    async fn delete_bots_for_owner(&self, owner_id: &str) -> Result<u64, StorageError>;

    /// Appends an entry to a bot's log.
    async fn insert_bot_log(&self, entry: &StoredBotLog) -> Result<(), StorageError>;

    /// Lists a bot's log entries, newest first.
    async fn list_bot_logs(&self, bot_id: &str) -> Result<Vec<StoredBotLog>, StorageError>;

    /// Check if a credential exists.
    async fn credential_exists(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.get_credential(id).await?.is_some())
    }
}
