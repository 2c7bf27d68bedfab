//! # Botvault Crypto
//!
//! Symmetric encryption of exchange credentials at rest.
//!
//! This crate provides:
//! - Key material resolution from injected configuration (key + IV)
//! - The credential cipher codec (AES-256-CBC, PKCS#7, hex encoding)
//! - Secure random generation of fresh key material

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod error;
pub mod keys;
pub mod random;

pub use codec::{Ciphertext, CipherCodec};
pub use error::CryptoError;
pub use keys::{
    EncryptionKey, FallbackPolicy, InitVector, KeyMaterial, KeyMaterialConfig, KeySource,
};
