//! Key material for the credential cipher.
//!
//! Key and IV are resolved once at startup from an explicit
//! [`KeyMaterialConfig`] and are immutable afterwards. Both types zeroize
//! their bytes on drop and never print them in `Debug` output.

use tracing::warn;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::random::generate_bytes;

/// Size of an AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of a CBC initialization vector in bytes.
pub const IV_SIZE: usize = 16;

/// Environment variable holding the hex-encoded key.
pub const KEY_ENV: &str = "ENCRYPTION_KEY";

/// Environment variable holding the hex-encoded IV.
pub const IV_ENV: &str = "ENCRYPTION_IV";

/// Placeholder key used when none is configured. Insecure.
const FALLBACK_KEY_HEX: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

/// Placeholder IV used when none is configured. Insecure.
const FALLBACK_IV_HEX: &str = "0123456789abcdef0123456789abcdef";

/// A 256-bit symmetric encryption key with automatic zeroization.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes = fixed_size::<KEY_SIZE>(KEY_ENV, bytes)?;
        Ok(Self { bytes })
    }

    /// Creates a key from a 64-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = zeroize::Zeroizing::new(decode_hex(KEY_ENV, hex_str)?);
        Self::from_bytes(&bytes)
    }

    /// Returns the raw key bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub(crate) fn as_array(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 128-bit CBC initialization vector.
///
/// The same IV is used for every record. This keeps compatibility with data
/// already at rest, at the cost of identical plaintexts producing identical
/// ciphertexts.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct InitVector {
    bytes: [u8; IV_SIZE],
}

impl InitVector {
    /// Creates an IV from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 16 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes = fixed_size::<IV_SIZE>(IV_ENV, bytes)?;
        Ok(Self { bytes })
    }

    /// Creates an IV from a 32-character hex string.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let bytes = decode_hex(IV_ENV, hex_str)?;
        Self::from_bytes(&bytes)
    }

    /// Returns the raw IV bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[inline]
    pub(crate) fn as_array(&self) -> &[u8; IV_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for InitVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitVector")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Where the resolved key material came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Both key and IV were supplied by configuration.
    Configured,
    /// At least one half fell back to the compiled-in placeholder.
    InsecureDefault,
}

/// Whether a missing key or IV may fall back to the compiled-in placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Fall back with a warning.
    #[default]
    Allow,
    /// Refuse to start without configured key material.
    Deny,
}

/// Raw key material configuration, usually read from the environment.
#[derive(Clone, Default)]
pub struct KeyMaterialConfig {
    /// Hex-encoded 32-byte key.
    pub key_hex: Option<String>,
    /// Hex-encoded 16-byte IV.
    pub iv_hex: Option<String>,
}

impl KeyMaterialConfig {
    /// Creates a configuration from explicit hex values.
    pub fn new(key_hex: impl Into<String>, iv_hex: impl Into<String>) -> Self {
        Self {
            key_hex: Some(key_hex.into()),
            iv_hex: Some(iv_hex.into()),
        }
    }

    /// Reads `ENCRYPTION_KEY` and `ENCRYPTION_IV` from the process environment.
    pub fn from_env() -> Self {
        Self {
            key_hex: std::env::var(KEY_ENV).ok(),
            iv_hex: std::env::var(IV_ENV).ok(),
        }
    }

    fn key(&self) -> Option<&str> {
        non_blank(self.key_hex.as_deref())
    }

    fn iv(&self) -> Option<&str> {
        non_blank(self.iv_hex.as_deref())
    }
}

impl std::fmt::Debug for KeyMaterialConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterialConfig")
            .field("key_hex", &self.key().map(|_| "[REDACTED]"))
            .field("iv_hex", &self.iv().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// A resolved key and IV pair.
#[derive(Clone, Debug)]
pub struct KeyMaterial {
    key: EncryptionKey,
    iv: InitVector,
    source: KeySource,
}

impl KeyMaterial {
    /// Builds key material from an already validated key and IV.
    pub fn new(key: EncryptionKey, iv: InitVector) -> Self {
        Self {
            key,
            iv,
            source: KeySource::Configured,
        }
    }

    /// Resolves key material from configuration.
    ///
    /// Malformed values are always fatal. Missing values fall back to the
    /// compiled-in placeholder only under [`FallbackPolicy::Allow`], and
    /// each fallback is logged as a warning.
    pub fn resolve(config: &KeyMaterialConfig, policy: FallbackPolicy) -> Result<Self, CryptoError> {
        let mut source = KeySource::Configured;

        let key = match config.key() {
            Some(hex_str) => EncryptionKey::from_hex(hex_str)?,
            None => {
                fallback_allowed(KEY_ENV, policy)?;
                source = KeySource::InsecureDefault;
                EncryptionKey::from_hex(FALLBACK_KEY_HEX)?
            },
        };

        let iv = match config.iv() {
            Some(hex_str) => InitVector::from_hex(hex_str)?,
            None => {
                fallback_allowed(IV_ENV, policy)?;
                source = KeySource::InsecureDefault;
                InitVector::from_hex(FALLBACK_IV_HEX)?
            },
        };

        Ok(Self { key, iv, source })
    }

    /// Generates fresh random key material.
    pub fn generate() -> Self {
        let key_bytes = zeroize::Zeroizing::new(generate_bytes(KEY_SIZE));
        let iv_bytes = generate_bytes(IV_SIZE);

        let mut key = EncryptionKey {
            bytes: [0u8; KEY_SIZE],
        };
        key.bytes.copy_from_slice(&key_bytes);

        let mut iv = InitVector {
            bytes: [0u8; IV_SIZE],
        };
        iv.bytes.copy_from_slice(&iv_bytes);

        Self::new(key, iv)
    }

    /// Returns the key.
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    /// Returns the IV.
    pub fn iv(&self) -> &InitVector {
        &self.iv
    }

    /// Returns where this material came from.
    pub fn source(&self) -> KeySource {
        self.source
    }

    /// Returns the key and IV as lowercase hex strings.
    ///
    /// Only meant for printing freshly generated material.
    pub fn to_hex(&self) -> (zeroize::Zeroizing<String>, zeroize::Zeroizing<String>) {
        (
            zeroize::Zeroizing::new(hex::encode(self.key.as_bytes())),
            zeroize::Zeroizing::new(hex::encode(self.iv.as_bytes())),
        )
    }
}

fn fallback_allowed(variable: &str, policy: FallbackPolicy) -> Result<(), CryptoError> {
    match policy {
        FallbackPolicy::Allow => {
            warn!(
                variable = variable,
                "⚠️  {} not set - using built-in placeholder key material - NOT FOR PRODUCTION ⚠️",
                variable
            );
            Ok(())
        },
        FallbackPolicy::Deny => Err(CryptoError::KeyMaterialMissing(variable.to_string())),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn decode_hex(variable: &str, hex_str: &str) -> Result<Vec<u8>, CryptoError> {
    hex::decode(hex_str.trim()).map_err(|e| CryptoError::InvalidKeyMaterial {
        variable: variable.to_string(),
        reason: format!("not valid hex: {e}"),
    })
}

fn fixed_size<const N: usize>(variable: &str, bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    if bytes.len() != N {
        return Err(CryptoError::InvalidKeyMaterial {
            variable: variable.to_string(),
            reason: format!("expected {} bytes, got {}", N, bytes.len()),
        });
    }

    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    Ok(out)
}
