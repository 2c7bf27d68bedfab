//! AES-256-CBC credential codec.
//!
//! Credential strings are encrypted with AES-256 in CBC mode with PKCS#7
//! padding and a fixed IV, and stored as lowercase hex. The format is
//! bit-compatible with records already at rest.
//!
//! Because the IV never changes, encryption is deterministic: the same
//! plaintext always yields the same ciphertext under the same key material.
//! That leaks equality between stored values and is kept only for
//! compatibility.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::keys::KeyMaterial;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Plaintext whose ciphertext identifies a set of key material.
const FINGERPRINT_PROBE: &str = "botvault:key-fingerprint";

/// Hex-encoded ciphertext of a single credential field.
///
/// Values are produced by [`CipherCodec::encrypt`] or rehydrated from storage
/// with [`Ciphertext::from_stored`]. There is intentionally no conversion from
/// an arbitrary `String`, so plaintext cannot be handed to storage by accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ciphertext(String);

impl Ciphertext {
    /// Wraps a value read back from storage.
    ///
    /// Only storage backends should call this.
    pub fn from_stored(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Returns the hex representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the ciphertext, returning the hex string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl AsRef<str> for Ciphertext {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Ciphertext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Symmetric encrypt/decrypt pair for credential fields.
///
/// Holds its key material for its whole lifetime; construct one at startup
/// and share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CipherCodec {
    material: KeyMaterial,
}

impl CipherCodec {
    /// Creates a codec over resolved key material.
    pub fn new(material: KeyMaterial) -> Self {
        Self { material }
    }

    /// Returns the key material this codec was built with.
    pub fn key_material(&self) -> &KeyMaterial {
        &self.material
    }

    /// Encrypts a UTF-8 string.
    ///
    /// Never fails: every input, including the empty string, pads to at
    /// least one block.
    pub fn encrypt(&self, plaintext: &str) -> Ciphertext {
        let cipher = Aes256CbcEnc::new(
            self.material.key().as_array().into(),
            self.material.iv().as_array().into(),
        );
        let bytes = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        Ciphertext(hex::encode(bytes))
    }

    /// Decrypts a hex-encoded ciphertext back to its UTF-8 plaintext.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::DecryptionFailed`] when the input is empty, not
    /// hex, not a whole number of blocks, fails padding validation (wrong key,
    /// truncation, tampering) or does not decrypt to UTF-8.
    pub fn decrypt(&self, ciphertext: &str) -> Result<Zeroizing<String>, CryptoError> {
        let bytes = hex::decode(ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(format!("invalid hex: {e}")))?;

        if bytes.is_empty() {
            return Err(CryptoError::DecryptionFailed("empty ciphertext".to_string()));
        }

        if bytes.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::DecryptionFailed(format!(
                "length {} is not a multiple of {}",
                bytes.len(),
                BLOCK_SIZE
            )));
        }

        let cipher = Aes256CbcDec::new(
            self.material.key().as_array().into(),
            self.material.iv().as_array().into(),
        );
        let plaintext = Zeroizing::new(
            cipher
                .decrypt_padded_vec_mut::<Pkcs7>(&bytes)
                .map_err(|_| CryptoError::DecryptionFailed("bad padding".to_string()))?,
        );

        let text = std::str::from_utf8(&plaintext)
            .map_err(|_| CryptoError::DecryptionFailed("plaintext is not UTF-8".to_string()))?;

        Ok(Zeroizing::new(text.to_owned()))
    }

    /// Short identifier for this key material, safe to log.
    pub fn fingerprint(&self) -> String {
        let mut hex = self.encrypt(FINGERPRINT_PROBE).into_string();
        hex.truncate(8);
        hex
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::keys::{FallbackPolicy, KeyMaterialConfig};

    const KEY_HEX: &str = "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4";
    const IV_HEX: &str = "000102030405060708090a0b0c0d0e0f";

    fn codec() -> CipherCodec {
        let config = KeyMaterialConfig::new(KEY_HEX, IV_HEX);
        CipherCodec::new(KeyMaterial::resolve(&config, FallbackPolicy::Deny).unwrap())
    }

    fn flip_nibble(hex: &str, index: usize) -> String {
        hex.char_indices()
            .map(|(i, c)| {
                if i == index {
                    let nibble = c.to_digit(16).unwrap() ^ 0x1;
                    std::char::from_digit(nibble, 16).unwrap()
                } else {
                    c
                }
            })
            .collect()
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let codec = codec();
        let long = "x".repeat(10_000);
        let inputs = [
            "",
            "a",
            "AKIA1234",
            "exactly sixteen!",
            "pâté, Ünïcödé, 日本語, 🚀",
            long.as_str(),
        ];

        for input in inputs {
            let ciphertext = codec.encrypt(input);
            let decrypted = codec.decrypt(ciphertext.as_str()).unwrap();
            assert_eq!(decrypted.as_str(), input);
        }
    }

    #[test]
    fn test_nist_sp800_38a_vector() {
        // F.2.5 CBC-AES256.Encrypt, first block. The NIST block is not UTF-8,
        // so the raw cipher is driven directly; PKCS#7 appends a padding
        // block that is not compared.
        let codec = codec();
        let cipher = Aes256CbcEnc::new(
            codec.key_material().key().as_array().into(),
            codec.key_material().iv().as_array().into(),
        );
        let block = hex::decode("6bc1bee22e409f96e93d7e117393172a").unwrap();
        let out = cipher.encrypt_padded_vec_mut::<Pkcs7>(&block);

        assert_eq!(out.len(), BLOCK_SIZE * 2);
        assert_eq!(hex::encode(&out[..BLOCK_SIZE]), "f58c4c04d6e5f1ba779eabfb5f7bfbd6");
    }

    #[test]
    fn test_ciphertext_format() {
        let codec = codec();

        let empty = codec.encrypt("");
        assert_eq!(empty.as_str().len(), BLOCK_SIZE * 2);

        let full_block = codec.encrypt("exactly sixteen!");
        assert_eq!(full_block.as_str().len(), BLOCK_SIZE * 4);

        assert!(full_block
            .as_str()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    /// Identical plaintexts produce identical ciphertexts because the IV is
    /// fixed. This is a known weakness kept for compatibility, not a property
    /// to rely on.
    #[test]
    fn test_deterministic_under_fixed_iv() {
        let codec = codec();
        assert_eq!(codec.encrypt("s3cr3t-value"), codec.encrypt("s3cr3t-value"));
        assert_ne!(codec.encrypt("s3cr3t-value"), codec.encrypt("s3cr3t-valuf"));
    }

    #[test]
    fn test_tampered_ciphertext_never_yields_original() {
        let codec = codec();
        let plaintext = "s3cr3t-value-that-spans-two-blocks";
        let ciphertext = codec.encrypt(plaintext).into_string();

        for index in 0..ciphertext.len() {
            let tampered = flip_nibble(&ciphertext, index);
            assert_ne!(tampered, ciphertext);

            match codec.decrypt(&tampered) {
                Ok(decrypted) => assert_ne!(decrypted.as_str(), plaintext, "index {index}"),
                Err(e) => assert!(matches!(e, CryptoError::DecryptionFailed(_))),
            }
        }
    }

    #[test]
    fn test_decrypt_rejects_invalid_hex() {
        let result = codec().decrypt("not-valid-hex");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_decrypt_rejects_empty() {
        let result = codec().decrypt("");
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_decrypt_rejects_partial_block() {
        let codec = codec();
        let ciphertext = codec.encrypt("AKIA1234").into_string();

        let result = codec.decrypt(&ciphertext[..30]);
        assert!(matches!(result, Err(CryptoError::DecryptionFailed(_))));
    }

    #[test]
    fn test_decrypt_accepts_uppercase_hex() {
        let codec = codec();
        let ciphertext = codec.encrypt("AKIA1234").into_string().to_uppercase();
        assert_eq!(codec.decrypt(&ciphertext).unwrap().as_str(), "AKIA1234");
    }

    #[test]
    fn test_decrypt_wrong_key_fails() {
        let codec1 = codec();
        let codec2 = CipherCodec::new(KeyMaterial::generate());

        let ciphertext = codec1.encrypt("secret data");
        match codec2.decrypt(ciphertext.as_str()) {
            Ok(decrypted) => assert_ne!(decrypted.as_str(), "secret data"),
            Err(e) => assert!(matches!(e, CryptoError::DecryptionFailed(_))),
        }
    }

    #[test]
    fn test_double_encryption_does_not_roundtrip() {
        let codec = codec();
        let once = codec.encrypt("AKIA1234");
        let twice = codec.encrypt(once.as_str());

        let decrypted = codec.decrypt(twice.as_str()).unwrap();
        assert_ne!(decrypted.as_str(), "AKIA1234");
        assert_eq!(decrypted.as_str(), once.as_str());
    }

    #[test]
    fn test_fingerprint() {
        let codec = codec();
        let other = CipherCodec::new(KeyMaterial::generate());

        assert_eq!(codec.fingerprint().len(), 8);
        assert_eq!(codec.fingerprint(), codec.fingerprint());
        assert_ne!(codec.fingerprint(), other.fingerprint());
    }
}
