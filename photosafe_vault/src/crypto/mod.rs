//! PhotoSafe Vault - Cryptographic Core
//!
//! Hybrid post-quantum public-key encryption for photos.

pub mod aead;
pub mod engine;
pub mod hkdf;
pub mod kem;
pub mod keys;
pub mod suite;

pub use engine::{CryptoEngine, Sealed};
pub use kem::{KeyId, KeyPair, PrivateKey, PublicKey};
pub use keys::SymmetricKey;
pub use suite::Ciphersuite;
