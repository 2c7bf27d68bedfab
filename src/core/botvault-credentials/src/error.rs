//! Credential and bot error types.

use thiserror::Error;

/// Errors that can occur in the credential vault and bot registry.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// Caller input failed validation.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Record not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Record belongs to another user.
    #[error("not authorized for: {0}")]
    Forbidden(String),

    /// Credential is still referenced by bots.
    #[error("credential {id} is in use by {bots} bot(s)")]
    InUse {
        /// Credential id.
        id: String,
        /// Number of referencing bots.
        bots: u64,
    },

    /// A bot referenced a credential the caller does not own.
    #[error("invalid credential reference: {0}")]
    InvalidCredentialReference(String),

    /// Stored ciphertext cannot be decrypted under the current key material.
    ///
    /// Carries no cipher detail; that goes to the log only.
    #[error("credential {id} is unreadable")]
    Unreadable {
        /// Credential id.
        id: String,
    },

    /// The record changed underneath a read-modify-write; retry from a
    /// fresh read.
    #[error("credential {0} was modified concurrently")]
    Conflict(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<botvault_storage::StorageError> for CredentialsError {
    fn from(e: botvault_storage::StorageError) -> Self {
        match e {
            botvault_storage::StorageError::Conflict(id) => CredentialsError::Conflict(id),
            other => CredentialsError::Storage(other.to_string()),
        }
    }
}
