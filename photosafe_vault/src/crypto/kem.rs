//! PhotoSafe Vault - Hybrid Key Encapsulation
//!
//! ML-KEM-768 combined with X25519. The two shared secrets are bound
//! together with SHA3-256 over the X25519 transcript, label last as in the
//! X-Wing combiner, so the result stays secret while either primitive holds.
//!
//! ```text
//! public key        = mlkem_pk (1184) || x25519_pk (32)
//! encapsulated key  = mlkem_ct (1088) || x25519_ephemeral_pk (32)
//! shared secret     = SHA3-256(ss_mlkem || ss_x25519 || x25519_ephemeral_pk || x25519_pk || label)
//! ```

use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SecretKey as _, SharedSecret as _,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

/// ML-KEM-768 encapsulation key length
pub const MLKEM_PUBLIC_KEY_LEN: usize = 1184;

/// ML-KEM-768 decapsulation key length
pub const MLKEM_SECRET_KEY_LEN: usize = 2400;

/// ML-KEM-768 ciphertext length
pub const MLKEM_CIPHERTEXT_LEN: usize = 1088;

/// X25519 key length (public and secret)
pub const X25519_KEY_LEN: usize = 32;

/// Serialized hybrid public key length
pub const PUBLIC_KEY_LEN: usize = MLKEM_PUBLIC_KEY_LEN + X25519_KEY_LEN;

/// Serialized hybrid private key length (secrets followed by the public key)
pub const PRIVATE_KEY_LEN: usize = X25519_KEY_LEN + MLKEM_SECRET_KEY_LEN + PUBLIC_KEY_LEN;

/// Encapsulated key length
pub const ENCAPSULATED_KEY_LEN: usize = MLKEM_CIPHERTEXT_LEN + X25519_KEY_LEN;

/// Combined shared secret length
pub const SHARED_SECRET_LEN: usize = 32;

/// Public key fingerprint length
pub const KEY_ID_LEN: usize = 16;

const XWING_LABEL: &[u8] = br"\.//^\";

// ---------------------------------------------------------------------------
// Key fingerprint
// ---------------------------------------------------------------------------

/// Truncated SHA-256 of a serialized public key
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId([u8; KEY_ID_LEN]);

impl KeyId {
    /// Rebuild from persisted bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_ID_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_ID_LEN] {
        &self.0
    }
}

impl std::fmt::Display for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl std::fmt::Debug for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyId({})", self)
    }
}

// ---------------------------------------------------------------------------
// Public key
// ---------------------------------------------------------------------------

/// Recipient public key; safe to hand to any sender
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    mlkem: Vec<u8>,
    x25519: [u8; X25519_KEY_LEN],
}

impl PublicKey {
    /// Parse a serialized public key
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::MalformedKey(format!(
                "public key must be {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }

        let (mlkem, x25519) = bytes.split_at(MLKEM_PUBLIC_KEY_LEN);
        mlkem768::PublicKey::from_bytes(mlkem)
            .map_err(|e| CryptoError::MalformedKey(format!("ML-KEM public key: {}", e)))?;

        let mut x = [0u8; X25519_KEY_LEN];
        x.copy_from_slice(x25519);

        Ok(Self {
            mlkem: mlkem.to_vec(),
            x25519: x,
        })
    }

    /// Serialize as `mlkem_pk || x25519_pk`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_LEN);
        out.extend_from_slice(&self.mlkem);
        out.extend_from_slice(&self.x25519);
        out
    }

    /// Fingerprint recorded with every sealed photo
    pub fn key_id(&self) -> KeyId {
        let digest = Sha256::digest(self.to_bytes());
        let mut id = [0u8; KEY_ID_LEN];
        id.copy_from_slice(&digest[..KEY_ID_LEN]);
        KeyId(id)
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKey")
            .field("key_id", &self.key_id())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Private key
// ---------------------------------------------------------------------------

/// Recipient private key. Secret halves are wiped on drop.
pub struct PrivateKey {
    x25519: StaticSecret,
    mlkem: Zeroizing<Vec<u8>>,
    public: PublicKey,
}

impl PrivateKey {
    /// Parse a serialized private key (`x25519_sk || mlkem_sk || public key`)
    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(CryptoError::MalformedKey(format!(
                "private key must be {} bytes, got {}",
                PRIVATE_KEY_LEN,
                bytes.len()
            )));
        }

        let mut x_bytes = Zeroizing::new([0u8; X25519_KEY_LEN]);
        x_bytes.copy_from_slice(&bytes[..X25519_KEY_LEN]);
        let x25519 = StaticSecret::from(*x_bytes);

        let mlkem_end = X25519_KEY_LEN + MLKEM_SECRET_KEY_LEN;
        let mlkem = Zeroizing::new(bytes[X25519_KEY_LEN..mlkem_end].to_vec());
        mlkem768::SecretKey::from_bytes(&mlkem)
            .map_err(|e| CryptoError::MalformedKey(format!("ML-KEM secret key: {}", e)))?;

        let public = PublicKey::from_bytes(&bytes[mlkem_end..])?;
        if X25519PublicKey::from(&x25519).as_bytes() != &public.x25519 {
            return Err(CryptoError::MalformedKey(
                "X25519 secret does not match embedded public key".into(),
            ));
        }

        Ok(Self {
            x25519,
            mlkem,
            public,
        })
    }

    /// Serialize for the secret store
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(PRIVATE_KEY_LEN));
        out.extend_from_slice(self.x25519.as_bytes());
        out.extend_from_slice(&self.mlkem);
        out.extend_from_slice(&self.public.to_bytes());
        out
    }

    /// Matching public key
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("key_id", &self.public.key_id())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Key pair
// ---------------------------------------------------------------------------

/// Freshly generated recipient key material
#[derive(Debug)]
pub struct KeyPair {
    private: PrivateKey,
}

impl KeyPair {
    /// Generate a new hybrid key pair from the OS RNG
    pub fn generate() -> Self {
        let (mlkem_pk, mlkem_sk) = mlkem768::keypair();
        let x25519 = StaticSecret::random_from_rng(OsRng);
        let x25519_pk = X25519PublicKey::from(&x25519);

        let public = PublicKey {
            mlkem: mlkem_pk.as_bytes().to_vec(),
            x25519: x25519_pk.to_bytes(),
        };

        Self {
            private: PrivateKey {
                x25519,
                mlkem: Zeroizing::new(mlkem_sk.as_bytes().to_vec()),
                public,
            },
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.private.public
    }

    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// Give up the pair, keeping only the private half (which embeds the public key)
    pub fn into_private_key(self) -> PrivateKey {
        self.private
    }
}

// ---------------------------------------------------------------------------
// Encapsulation
// ---------------------------------------------------------------------------

/// Derive a fresh shared secret for `recipient`.
///
/// Returns the shared secret and the encapsulated key to store with the ciphertext.
pub fn encapsulate(
    recipient: &PublicKey,
) -> CryptoResult<(Zeroizing<[u8; SHARED_SECRET_LEN]>, Vec<u8>)> {
    let mlkem_pk = mlkem768::PublicKey::from_bytes(&recipient.mlkem)
        .map_err(|e| CryptoError::MalformedKey(format!("ML-KEM public key: {}", e)))?;
    let (ss_mlkem, ct_mlkem) = mlkem768::encapsulate(&mlkem_pk);

    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_pk = X25519PublicKey::from(&ephemeral);
    let ss_x25519 = ephemeral.diffie_hellman(&X25519PublicKey::from(recipient.x25519));
    if !ss_x25519.was_contributory() {
        return Err(CryptoError::MalformedKey(
            "X25519 public key is a low-order point".into(),
        ));
    }

    let shared = combine(
        ss_mlkem.as_bytes(),
        ss_x25519.as_bytes(),
        ephemeral_pk.as_bytes(),
        &recipient.x25519,
    );

    let mut encapsulated = Vec::with_capacity(ENCAPSULATED_KEY_LEN);
    encapsulated.extend_from_slice(ct_mlkem.as_bytes());
    encapsulated.extend_from_slice(ephemeral_pk.as_bytes());

    Ok((shared, encapsulated))
}

/// Recover the shared secret from an encapsulated key.
///
/// A tampered encapsulated key or a foreign private key does not fail here:
/// ML-KEM rejects implicitly, so the derived secret is simply wrong and the
/// AEAD layer reports the failure.
pub fn decapsulate(
    private: &PrivateKey,
    encapsulated: &[u8],
) -> CryptoResult<Zeroizing<[u8; SHARED_SECRET_LEN]>> {
    if encapsulated.len() != ENCAPSULATED_KEY_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }

    let (ct_bytes, eph_bytes) = encapsulated.split_at(MLKEM_CIPHERTEXT_LEN);
    let ct_mlkem = mlkem768::Ciphertext::from_bytes(ct_bytes)
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    let sk_mlkem = mlkem768::SecretKey::from_bytes(&private.mlkem)
        .map_err(|e| CryptoError::MalformedKey(format!("ML-KEM secret key: {}", e)))?;
    let ss_mlkem = mlkem768::decapsulate(&ct_mlkem, &sk_mlkem);

    let mut eph = [0u8; X25519_KEY_LEN];
    eph.copy_from_slice(eph_bytes);
    let ss_x25519 = private.x25519.diffie_hellman(&X25519PublicKey::from(eph));
    if !ss_x25519.was_contributory() {
        return Err(CryptoError::AuthenticationFailed);
    }

    Ok(combine(
        ss_mlkem.as_bytes(),
        ss_x25519.as_bytes(),
        &eph,
        &private.public.x25519,
    ))
}

fn combine(
    ss_mlkem: &[u8],
    ss_x25519: &[u8],
    ct_x25519: &[u8],
    pk_x25519: &[u8],
) -> Zeroizing<[u8; SHARED_SECRET_LEN]> {
    let mut hasher = Sha3_256::new();
    hasher.update(ss_mlkem);
    hasher.update(ss_x25519);
    hasher.update(ct_x25519);
    hasher.update(pk_x25519);
    hasher.update(XWING_LABEL);

    let mut out = Zeroizing::new([0u8; SHARED_SECRET_LEN]);
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encapsulate_decapsulate_agree() {
        let pair = KeyPair::generate();

        let (ss_sender, encapsulated) = encapsulate(pair.public_key()).unwrap();
        let ss_recipient = decapsulate(pair.private_key(), &encapsulated).unwrap();

        assert_eq!(encapsulated.len(), ENCAPSULATED_KEY_LEN);
        assert_eq!(*ss_sender, *ss_recipient);
    }

    #[test]
    fn test_foreign_key_derives_different_secret() {
        let pair = KeyPair::generate();
        let other = KeyPair::generate();

        let (ss_sender, encapsulated) = encapsulate(pair.public_key()).unwrap();
        let ss_other = decapsulate(other.private_key(), &encapsulated).unwrap();

        assert_ne!(*ss_sender, *ss_other);
    }

    #[test]
    fn test_private_key_serialization_roundtrip() {
        let pair = KeyPair::generate();
        let bytes = pair.private_key().to_bytes();
        assert_eq!(bytes.len(), PRIVATE_KEY_LEN);

        let restored = PrivateKey::from_bytes(&bytes).unwrap();
        assert_eq!(restored.public_key(), pair.public_key());

        let (ss, encapsulated) = encapsulate(pair.public_key()).unwrap();
        assert_eq!(*decapsulate(&restored, &encapsulated).unwrap(), *ss);
    }

    #[test]
    fn test_public_key_wrong_length_is_malformed() {
        let pair = KeyPair::generate();
        let mut bytes = pair.public_key().to_bytes();
        bytes.pop();

        assert!(matches!(
            PublicKey::from_bytes(&bytes),
            Err(CryptoError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_low_order_x25519_rejected() {
        let pair = KeyPair::generate();
        let mut bytes = pair.public_key().to_bytes();
        for b in &mut bytes[MLKEM_PUBLIC_KEY_LEN..] {
            *b = 0;
        }
        let weak = PublicKey::from_bytes(&bytes).unwrap();

        assert!(matches!(encapsulate(&weak), Err(CryptoError::MalformedKey(_))));
    }

    #[test]
    fn test_mismatched_private_key_bytes_rejected() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();

        let mut bytes = a.private_key().to_bytes();
        let public_start = X25519_KEY_LEN + MLKEM_SECRET_KEY_LEN;
        bytes[public_start..].copy_from_slice(&b.public_key().to_bytes());

        assert!(matches!(
            PrivateKey::from_bytes(&bytes),
            Err(CryptoError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_key_id_is_stable() {
        let pair = KeyPair::generate();
        let reparsed = PublicKey::from_bytes(&pair.public_key().to_bytes()).unwrap();

        assert_eq!(pair.public_key().key_id(), reparsed.key_id());
        assert_ne!(pair.public_key().key_id(), KeyPair::generate().public_key().key_id());
    }

    #[test]
    fn test_combiner_hashes_label_last() {
        let ss_mlkem = [1u8; 32];
        let ss_x25519 = [2u8; 32];
        let ct_x25519 = [3u8; 32];
        let pk_x25519 = [4u8; 32];

        let mut hasher = Sha3_256::new();
        hasher.update(ss_mlkem);
        hasher.update(ss_x25519);
        hasher.update(ct_x25519);
        hasher.update(pk_x25519);
        hasher.update(XWING_LABEL);
        let mut expected = [0u8; SHARED_SECRET_LEN];
        expected.copy_from_slice(&hasher.finalize());

        let combined = combine(&ss_mlkem, &ss_x25519, &ct_x25519, &pk_x25519);
        assert_eq!(*combined, expected);
    }
}
