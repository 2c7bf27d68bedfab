//! # Botvault Storage
//!
//! Storage abstraction layer for Botvault backends.
//!
//! Backends persist credential rows whose secret fields are already
//! [`Ciphertext`](botvault_crypto::Ciphertext); nothing in this crate ever
//! sees plaintext.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod models;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;
pub use models::{
    BotLogKind, BotPerformance, BotStatus, CredentialPatch, StoredBot, StoredBotLog,
    StoredCredential,
};
