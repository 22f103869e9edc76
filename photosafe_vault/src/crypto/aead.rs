//! PhotoSafe Vault - AEAD Encryption
//!
//! AES-256-GCM for photos, XChaCha20-Poly1305 for wrapping secrets at rest.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};

use super::keys::{generate_xchacha_nonce, SymmetricKey, NONCE_LEN, TAG_LEN, XCHACHA_NONCE_LEN};
use crate::error::{CryptoError, CryptoResult};

// ═══════════════════════════════════════════════════════════════════════════
// AES-256-GCM (photos)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt with AES-256-GCM under an explicit nonce. Output is `ciphertext || tag`.
pub fn encrypt_aes_gcm(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;

    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Primitive(e.to_string()))
}

/// Decrypt AES-256-GCM output
pub fn decrypt_aes_gcm(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> CryptoResult<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key.expose())
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;

    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}

// ═══════════════════════════════════════════════════════════════════════════
// XChaCha20-Poly1305 (secrets at rest)
// ═══════════════════════════════════════════════════════════════════════════

/// Encrypt with a random nonce. Output is `nonce || ciphertext || tag`.
pub fn encrypt_xchacha(key: &SymmetricKey, plaintext: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;

    let nonce_bytes = generate_xchacha_nonce();
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce_bytes), Payload { msg: plaintext, aad })
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;

    let mut out = Vec::with_capacity(XCHACHA_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt `nonce || ciphertext || tag`
pub fn decrypt_xchacha(key: &SymmetricKey, data: &[u8], aad: &[u8]) -> CryptoResult<Vec<u8>> {
    if data.len() < XCHACHA_NONCE_LEN + TAG_LEN {
        return Err(CryptoError::AuthenticationFailed);
    }

    let cipher = XChaCha20Poly1305::new_from_slice(key.expose())
        .map_err(|e| CryptoError::Primitive(e.to_string()))?;

    let (nonce, ciphertext) = data.split_at(XCHACHA_NONCE_LEN);
    cipher
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::AuthenticationFailed)
}
