//! # PhotoSafe Vault
//!
//! On-device encrypted photo storage with post-quantum public-key sealing.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                     VAULT SERVICE                         │
//! │        save / load / delete_all  (tokio blocking pool)    │
//! │  ┌─────────────┐  ┌─────────────┐  ┌──────────────────┐  │
//! │  │  KEY STORE  │  │ CRYPTO      │  │  METADATA STORE  │  │
//! │  │  hybrid key │  │ ENGINE      │  │  SQLite (WAL)    │  │
//! │  │  pair       │  │ ML-KEM-768  │  │  records + tags  │  │
//! │  └──────┬──────┘  │ + X25519    │  └──────────────────┘  │
//! │         │         │ HKDF/AES-GCM│                         │
//! │  ┌──────┴──────┐  └─────────────┘  ┌──────────────────┐  │
//! │  │ SECRET STORE│                   │  BLOB STORE      │  │
//! │  │ memory/file │                   │  <id>.enc files  │  │
//! │  └─────────────┘                   └──────────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security Model
//!
//! - Each photo sealed to the device public key (hybrid KEM + AES-256-GCM)
//! - Photo id bound as associated data; blobs cannot be swapped between records
//! - Private key only reachable inside `KeyStore::with_private_key`
//! - Blob written before its record, removed before its record
//! - Key material zeroized after use, never logged

pub mod blob_store;
pub mod config;
pub mod crypto;
pub mod error;
pub mod keystore;
pub mod metadata;
pub mod vault;

pub use blob_store::{BlobLocation, BlobStore};
pub use config::{KeyStoreBackend, KeyStoreConfig, VaultConfig};
pub use crypto::{Ciphersuite, CryptoEngine, KeyId, KeyPair, PrivateKey, PublicKey, Sealed};
pub use error::{
    CryptoError, KeyStoreError, MetadataError, StorageError, VaultError, VaultResult,
};
pub use keystore::{FileSecretStore, KdfParams, KeyStore, MemorySecretStore, SecretStore};
pub use metadata::{MetadataEvent, MetadataStore, PhotoRecord};
pub use vault::{
    CancelHandle, CancelToken, DeletionReport, IntegrityReport, VaultService, PHOTO_INFO,
};

/// PhotoSafe Vault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
