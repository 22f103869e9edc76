//! PhotoSafe Vault - Ciphersuite Registry
//!
//! Every sealed photo records the suite id it was produced under, so a new
//! suite can be introduced without orphaning old ciphertexts.

use serde::{Deserialize, Serialize};

use crate::error::{CryptoError, CryptoResult};

/// KEM / KDF / AEAD combination used to seal a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Ciphersuite {
    /// Hybrid ML-KEM-768 + X25519 (X-Wing combiner), HKDF-SHA256, AES-256-GCM
    XWingMlKem768X25519Sha256Aes256Gcm = 0x0001,
}

impl Ciphersuite {
    /// Suite used for all new seals
    pub const CURRENT: Ciphersuite = Ciphersuite::XWingMlKem768X25519Sha256Aes256Gcm;

    /// Numeric id persisted alongside each record
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Resolve a persisted suite id
    pub fn from_id(id: u16) -> CryptoResult<Self> {
        match id {
            0x0001 => Ok(Ciphersuite::XWingMlKem768X25519Sha256Aes256Gcm),
            other => Err(CryptoError::UnsupportedSuite(other)),
        }
    }

    /// Display name
    pub fn name(self) -> &'static str {
        match self {
            Ciphersuite::XWingMlKem768X25519Sha256Aes256Gcm => {
                "XWingMLKEM768X25519_SHA256_AES_GCM_256"
            }
        }
    }

    /// Domain separation label, used as the HKDF salt of the key schedule
    pub(crate) fn label(self) -> &'static [u8] {
        match self {
            Ciphersuite::XWingMlKem768X25519Sha256Aes256Gcm => {
                b"PhotoSafe:v1:XWing-MLKEM768-X25519:HKDF-SHA256:AES-256-GCM"
            }
        }
    }
}

impl Default for Ciphersuite {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl std::fmt::Display for Ciphersuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({:#06x})", self.name(), self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suite_id_roundtrip() {
        let suite = Ciphersuite::CURRENT;
        assert_eq!(Ciphersuite::from_id(suite.id()).unwrap(), suite);
    }

    #[test]
    fn test_unknown_suite_rejected() {
        assert_eq!(
            Ciphersuite::from_id(0x7f00),
            Err(CryptoError::UnsupportedSuite(0x7f00))
        );
    }
}
