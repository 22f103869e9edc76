//! PhotoSafe Vault - Crypto Engine
//!
//! Single-shot public-key sealing: hybrid KEM, HKDF key schedule, AES-256-GCM.
//! Each seal encapsulates a fresh shared secret, so the derived key and
//! nonce are never reused.

use super::aead::{decrypt_aes_gcm, encrypt_aes_gcm};
use super::hkdf::key_schedule;
use super::kem::{self, KeyId, PrivateKey, PublicKey};
use super::suite::Ciphersuite;
use crate::error::{CryptoError, CryptoResult};

/// Output of [`CryptoEngine::seal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// KEM output the recipient needs to recover the key
    pub encapsulated_key: Vec<u8>,
    /// AEAD ciphertext including the tag
    pub ciphertext: Vec<u8>,
}

/// Stateless engine; cheap to copy and safe to share across threads
#[derive(Debug, Clone, Copy, Default)]
pub struct CryptoEngine {
    suite: Ciphersuite,
}

impl CryptoEngine {
    pub fn new(suite: Ciphersuite) -> Self {
        Self { suite }
    }

    /// Suite applied to new seals
    pub fn suite(&self) -> Ciphersuite {
        self.suite
    }

    /// Encrypt `plaintext` to `recipient`, binding `info` and `aad`
    pub fn seal(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
        info: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Sealed> {
        let (shared, encapsulated_key) = kem::encapsulate(recipient)?;
        let ctx = key_schedule(self.suite, &shared[..], info)?;
        let ciphertext = encrypt_aes_gcm(&ctx.key, &ctx.nonce, plaintext, aad)?;

        Ok(Sealed {
            encapsulated_key,
            ciphertext,
        })
    }

    /// Decrypt a ciphertext sealed under this engine's suite
    pub fn open(
        &self,
        encapsulated_key: &[u8],
        ciphertext: &[u8],
        private: &PrivateKey,
        info: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        open_with(self.suite, encapsulated_key, ciphertext, private, info, aad)
    }

    /// Decrypt a stored record: resolves the persisted suite id and checks
    /// that `private` is the key the record was sealed to.
    #[allow(clippy::too_many_arguments)]
    pub fn open_record(
        &self,
        suite_id: u16,
        sealed_to: &KeyId,
        encapsulated_key: &[u8],
        ciphertext: &[u8],
        private: &PrivateKey,
        info: &[u8],
        aad: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let suite = Ciphersuite::from_id(suite_id)?;
        if private.public_key().key_id() != *sealed_to {
            return Err(CryptoError::KeyMismatch);
        }
        open_with(suite, encapsulated_key, ciphertext, private, info, aad)
    }
}

fn open_with(
    suite: Ciphersuite,
    encapsulated_key: &[u8],
    ciphertext: &[u8],
    private: &PrivateKey,
    info: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    match suite {
        Ciphersuite::XWingMlKem768X25519Sha256Aes256Gcm => {
            let shared = kem::decapsulate(private, encapsulated_key)?;
            let ctx = key_schedule(suite, &shared[..], info)?;
            decrypt_aes_gcm(&ctx.key, &ctx.nonce, ciphertext, aad)
        }
    }
}
