//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Configured key material is malformed (wrong length or not hex).
    #[error("invalid key material in {variable}: {reason}")]
    InvalidKeyMaterial {
        /// Configuration variable that held the bad value.
        variable: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Key material is absent and the fallback is not allowed.
    #[error("key material not configured: {0}")]
    KeyMaterialMissing(String),

    /// Ciphertext could not be decrypted under the current key material.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
}

impl CryptoError {
    /// Returns true for errors that must stop the process from serving
    /// credential operations.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidKeyMaterial { .. } | CryptoError::KeyMaterialMissing(_)
        )
    }
}
