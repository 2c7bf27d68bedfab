//! # Botvault Credentials
//!
//! The single integration point between the credential cipher and storage.
//!
//! ## Features
//!
//! - Exchange credentials encrypted exactly once per changed field
//! - Per-record isolation of undecryptable rows on read
//! - Bot configuration records referencing credentials
//! - Out-of-band re-keying of stored credentials

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bots;
pub mod error;
pub mod migrate;
pub mod model;
pub mod vault;

pub use bots::{BotRegistry, BotUpdate, NewBot};
pub use error::CredentialsError;
pub use migrate::{rekey, RekeyReport};
pub use model::{
    mask, ChangeSet, CredentialField, CredentialUpdate, CredentialView, NewCredential,
    PurgeReport, UpdateOutcome,
};
pub use vault::CredentialVault;

/// Returns the current Unix timestamp.
pub(crate) fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Trims a required text field, rejecting blank values.
pub(crate) fn required(field: &str, value: &str) -> Result<String, CredentialsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CredentialsError::Validation(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

/// Rejects blank secret values without altering them.
pub(crate) fn ensure_present(field: &str, value: &str) -> Result<(), CredentialsError> {
    if value.trim().is_empty() {
        return Err(CredentialsError::Validation(format!("{field} is required")));
    }
    Ok(())
}
