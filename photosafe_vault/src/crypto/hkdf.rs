//! PhotoSafe Vault - Key Schedule
//!
//! Turns a KEM shared secret into a one-shot AEAD key and nonce, bound to
//! the ciphersuite and the caller's `info`.

use hkdf::Hkdf;
use sha2::Sha256;

use super::keys::{SymmetricKey, KEY_LEN, NONCE_LEN};
use super::suite::Ciphersuite;
use crate::error::{CryptoError, CryptoResult};

/// Key and nonce for a single seal or open
#[derive(Debug)]
pub struct AeadContext {
    pub key: SymmetricKey,
    pub nonce: [u8; NONCE_LEN],
}

/// Derive the AEAD context.
///
/// `salt = suite label`, `key = Expand("key" || info)`,
/// `nonce = Expand("base_nonce" || info)`.
pub fn key_schedule(
    suite: Ciphersuite,
    shared_secret: &[u8],
    info: &[u8],
) -> CryptoResult<AeadContext> {
    let hk = Hkdf::<Sha256>::new(Some(suite.label()), shared_secret);

    let mut okm = [0u8; KEY_LEN];
    hk.expand_multi_info(&[&b"key"[..], info], &mut okm)
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;
    let key = SymmetricKey::new(okm);

    let mut nonce = [0u8; NONCE_LEN];
    hk.expand_multi_info(&[&b"base_nonce"[..], info], &mut nonce)
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;

    Ok(AeadContext { key, nonce })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_is_deterministic() {
        let a = key_schedule(Ciphersuite::CURRENT, &[7u8; 32], b"photo-v1").unwrap();
        let b = key_schedule(Ciphersuite::CURRENT, &[7u8; 32], b"photo-v1").unwrap();

        assert_eq!(a.key.expose(), b.key.expose());
        assert_eq!(a.nonce, b.nonce);
    }

    #[test]
    fn test_info_separates_keys() {
        let a = key_schedule(Ciphersuite::CURRENT, &[7u8; 32], b"photo-v1").unwrap();
        let b = key_schedule(Ciphersuite::CURRENT, &[7u8; 32], b"photo-v2").unwrap();

        assert_ne!(a.key.expose(), b.key.expose());
        assert_ne!(a.nonce, b.nonce);
    }
}
