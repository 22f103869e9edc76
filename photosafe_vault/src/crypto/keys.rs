//! PhotoSafe Vault - Symmetric Key Material
//!
//! Wrappers for the short-lived symmetric keys produced by the key schedule
//! and by passphrase derivation in the key store.

use rand::RngCore;
use secrecy::{ExposeSecret, Secret};

/// Key length for AES-256 and XChaCha20
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// Authentication tag length (both AEADs)
pub const TAG_LEN: usize = 16;

/// Symmetric key, zeroized on drop
pub struct SymmetricKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl SymmetricKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Generate a random nonce for XChaCha20
pub fn generate_xchacha_nonce() -> [u8; XCHACHA_NONCE_LEN] {
    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Generate a random salt
pub fn generate_salt<const N: usize>() -> [u8; N] {
    let mut salt = [0u8; N];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_keys_differ() {
        let a = SymmetricKey::generate();
        let b = SymmetricKey::generate();
        assert_ne!(a.expose(), b.expose());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = SymmetricKey::new([0x41; KEY_LEN]);
        let shown = format!("{:?}", key);
        assert!(!shown.contains("65"));
        assert!(shown.contains("REDACTED"));
    }
}
