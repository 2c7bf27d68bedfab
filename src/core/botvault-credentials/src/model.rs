//! Credential value objects.
//!
//! Plaintext only ever lives in these types; storage rows hold ciphertext.

use std::fmt;

use botvault_crypto::{CipherCodec, Ciphertext};
use botvault_storage::{CredentialPatch, StoredCredential};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CredentialsError;
use crate::{ensure_present, required};

/// A credential submitted by a user.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct NewCredential {
    /// Exchange label, e.g. "Binance".
    pub exchange: String,
    /// Plaintext API key.
    pub api_key: String,
    /// Plaintext API secret.
    pub api_secret: String,
}

impl NewCredential {
    /// Creates a new credential submission.
    pub fn new(
        exchange: impl Into<String>,
        api_key: impl Into<String>,
        api_secret: impl Into<String>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl fmt::Debug for NewCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewCredential")
            .field("exchange", &self.exchange)
            .field("api_key", &"[REDACTED]")
            .field("api_secret", &"[REDACTED]")
            .finish()
    }
}

/// Requested changes to a stored credential. `None` leaves a field alone.
#[derive(Clone, Default, Zeroize, ZeroizeOnDrop)]
pub struct CredentialUpdate {
    /// New exchange label.
    pub exchange: Option<String>,
    /// New plaintext API key.
    pub api_key: Option<String>,
    /// New plaintext API secret.
    pub api_secret: Option<String>,
}

impl CredentialUpdate {
    /// Sets the exchange label.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = Some(exchange.into());
        self
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the API secret.
    pub fn api_secret(mut self, api_secret: impl Into<String>) -> Self {
        self.api_secret = Some(api_secret.into());
        self
    }
}

impl fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialUpdate")
            .field("exchange", &self.exchange)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A mutable credential attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialField {
    /// The exchange label.
    Exchange,
    /// The API key.
    ApiKey,
    /// The API secret.
    ApiSecret,
}

impl fmt::Display for CredentialField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CredentialField::Exchange => "exchange",
            CredentialField::ApiKey => "api_key",
            CredentialField::ApiSecret => "api_secret",
        })
    }
}

/// Fields of a stored credential whose value actually differs from an update.
///
/// Built by comparing the update against the previously loaded values, so a
/// field the caller resent unchanged is never re-encrypted. Secret fields
/// whose stored ciphertext can no longer be decrypted count as changed when a
/// replacement is supplied.
pub struct ChangeSet<'a> {
    exchange: Option<String>,
    api_key: Option<&'a str>,
    api_secret: Option<&'a str>,
}

impl<'a> ChangeSet<'a> {
    /// Diffs an update against a stored credential.
    pub fn diff(
        codec: &CipherCodec,
        current: &StoredCredential,
        update: &'a CredentialUpdate,
    ) -> Result<Self, CredentialsError> {
        let exchange = match update.exchange.as_deref() {
            Some(value) => {
                let value = required("exchange", value)?;
                (value != current.exchange).then_some(value)
            },
            None => None,
        };

        let api_key = match update.api_key.as_deref() {
            Some(value) => {
                ensure_present("api_key", value)?;
                secret_differs(codec, &current.api_key, value).then_some(value)
            },
            None => None,
        };

        let api_secret = match update.api_secret.as_deref() {
            Some(value) => {
                ensure_present("api_secret", value)?;
                secret_differs(codec, &current.api_secret, value).then_some(value)
            },
            None => None,
        };

        Ok(Self {
            exchange,
            api_key,
            api_secret,
        })
    }

    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.exchange.is_none() && self.api_key.is_none() && self.api_secret.is_none()
    }

    /// Lists the changed fields.
    pub fn fields(&self) -> Vec<CredentialField> {
        let mut fields = Vec::new();
        if self.exchange.is_some() {
            fields.push(CredentialField::Exchange);
        }
        if self.api_key.is_some() {
            fields.push(CredentialField::ApiKey);
        }
        if self.api_secret.is_some() {
            fields.push(CredentialField::ApiSecret);
        }
        fields
    }

    /// Turns the changes into a column patch, encrypting each changed secret
    /// exactly once. Unchanged fields are left out of the patch.
    pub fn into_patch(self, codec: &CipherCodec) -> CredentialPatch {
        CredentialPatch {
            exchange: self.exchange,
            api_key: self.api_key.map(|value| codec.encrypt(value)),
            api_secret: self.api_secret.map(|value| codec.encrypt(value)),
        }
    }
}

impl fmt::Debug for ChangeSet<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeSet")
            .field("fields", &self.fields())
            .finish()
    }
}

fn secret_differs(codec: &CipherCodec, stored: &Ciphertext, new_value: &str) -> bool {
    match codec.decrypt(stored.as_str()) {
        Ok(current) => current.as_str() != new_value,
        Err(_) => true,
    }
}

/// Result of an update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Fields that were written.
    pub changed: Vec<CredentialField>,
}

/// Counts of records removed when an owner is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    /// Bots removed.
    pub bots: u64,
    /// Credentials removed.
    pub credentials: u64,
}

/// A decrypted credential handed back to its owner.
#[derive(Clone)]
pub struct CredentialView {
    /// Record identifier.
    pub id: String,
    /// Owning user.
    pub owner_id: String,
    /// Exchange label.
    pub exchange: String,
    /// Plaintext API key.
    pub api_key: Zeroizing<String>,
    /// Plaintext API secret.
    pub api_secret: Zeroizing<String>,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

impl CredentialView {
    /// Returns the secret with all but its last four characters hidden.
    pub fn masked_secret(&self) -> String {
        mask(&self.api_secret)
    }
}

impl fmt::Debug for CredentialView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialView")
            .field("id", &self.id)
            .field("owner_id", &self.owner_id)
            .field("exchange", &self.exchange)
            .field("api_key", &mask(&self.api_key))
            .field("api_secret", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Hides all but the last four characters of a value.
///
/// Values of four characters or fewer are hidden entirely.
pub fn mask(value: &str) -> String {
    let count = value.chars().count();
    if count <= 4 {
        return "****".to_string();
    }
    let tail: String = value.chars().skip(count - 4).collect();
    format!("****{tail}")
}
