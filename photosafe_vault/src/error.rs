//! PhotoSafe Vault - Error Types
//!
//! One closed enum per component, wrapped by [`VaultError`] at the service
//! boundary. Platform diagnostics travel as context strings only.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Result type for crypto operations
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Result type for blob storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type for metadata operations
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Result type for key store operations
pub type KeyStoreResult<T> = Result<T, KeyStoreError>;

// ═══════════════════════════════════════════════════════════════
// CRYPTO ERRORS
// ═══════════════════════════════════════════════════════════════

/// Failures of the hybrid KEM + AEAD engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Malformed key: {0}")]
    MalformedKey(String),

    #[error("Authentication failed - ciphertext, encapsulated key or associated data altered")]
    AuthenticationFailed,

    #[error("Private key does not match the key this photo was sealed to")]
    KeyMismatch,

    #[error("Unsupported ciphersuite: {0:#06x}")]
    UnsupportedSuite(u16),

    #[error("Crypto primitive failed: {0}")]
    Primitive(String),
}

// ═══════════════════════════════════════════════════════════════
// BLOB STORAGE ERRORS
// ═══════════════════════════════════════════════════════════════

/// Failures of the encrypted blob store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Blob not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Failed to write blob {}: {source}", path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read blob {}: {source}", path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete {} blob(s): {}", failed.len(), failed.join(", "))]
    PartialDeletion { failed: Vec<String> },

    #[error("Blob already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid photo id for blob storage: {0:?}")]
    InvalidId(String),
}

// ═══════════════════════════════════════════════════════════════
// METADATA ERRORS
// ═══════════════════════════════════════════════════════════════

/// Failures of the photo metadata store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Photo record already exists: {0}")]
    ConstraintViolation(String),

    #[error("Metadata commit failed: {0}")]
    PersistenceFailed(String),

    #[error("Photo not found in metadata: {0}")]
    NotFound(String),

    #[error("Metadata row corrupted: {0}")]
    Corrupted(String),
}

impl From<rusqlite::Error> for MetadataError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref err, ref msg)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                MetadataError::ConstraintViolation(
                    msg.clone().unwrap_or_else(|| err.to_string()),
                )
            }
            rusqlite::Error::QueryReturnedNoRows => {
                MetadataError::NotFound("no matching row".into())
            }
            other => MetadataError::PersistenceFailed(other.to_string()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// KEY STORE ERRORS
// ═══════════════════════════════════════════════════════════════

/// Failures of the recipient key store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("No key pair provisioned: {0}")]
    NotProvisioned(String),

    #[error("Secure key store unavailable: {0}")]
    Unavailable(String),
}

// ═══════════════════════════════════════════════════════════════
// VAULT ERRORS
// ═══════════════════════════════════════════════════════════════

/// Error returned by [`crate::VaultService`] operations.
///
/// The variant identifies the stage that failed: key lookup, sealing,
/// opening, blob I/O or metadata commit.
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Key store error: {0}")]
    KeyStore(#[from] KeyStoreError),

    #[error("Encryption failed: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Decryption failed: {0}")]
    Decrypt(CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Metadata error: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VaultError {
    /// Human-readable message for the UI layer.
    ///
    /// Decryption failures are deliberately distinct from "missing photo".
    pub fn user_message(&self) -> &'static str {
        match self {
            VaultError::KeyStore(KeyStoreError::NotProvisioned(_)) => {
                "No encryption key is set up on this device yet."
            }
            VaultError::KeyStore(KeyStoreError::Unavailable(_)) => {
                "The secure key store is not available right now."
            }
            VaultError::Crypto(_) => "The photo could not be encrypted.",
            VaultError::Decrypt(CryptoError::KeyMismatch) => {
                "This photo was encrypted with a different key."
            }
            VaultError::Decrypt(_) => "The photo is damaged and could not be decrypted.",
            VaultError::Storage(StorageError::NotFound(_)) => "The photo file is missing.",
            VaultError::Storage(StorageError::PartialDeletion { .. }) => {
                "Some photos could not be deleted. Please try again."
            }
            VaultError::Storage(_) => "The photo file could not be read or written.",
            VaultError::Metadata(MetadataError::NotFound(_)) => "The photo no longer exists.",
            VaultError::Metadata(_) => "The photo library could not be updated.",
            VaultError::Cancelled => "The operation was cancelled.",
            VaultError::Worker(_) | VaultError::Config(_) => "An internal error occurred.",
        }
    }

    /// Transient failures a caller may retry as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            VaultError::Storage(
                StorageError::WriteFailed { .. }
                    | StorageError::ReadFailed { .. }
                    | StorageError::PartialDeletion { .. }
            ) | VaultError::Metadata(MetadataError::PersistenceFailed(_))
                | VaultError::KeyStore(KeyStoreError::Unavailable(_))
                | VaultError::Cancelled
        )
    }

    /// Check if this is a security-critical error
    pub fn is_security_critical(&self) -> bool {
        matches!(
            self,
            VaultError::Decrypt(CryptoError::AuthenticationFailed | CryptoError::KeyMismatch)
        )
    }
}

impl From<tokio::task::JoinError> for VaultError {
    fn from(e: tokio::task::JoinError) -> Self {
        VaultError::Worker(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decrypt_failure_is_not_reported_as_missing() {
        let missing = VaultError::Storage(StorageError::NotFound(PathBuf::from("a.enc")));
        let tampered = VaultError::Decrypt(CryptoError::AuthenticationFailed);

        assert_ne!(missing.user_message(), tampered.user_message());
        assert!(tampered.is_security_critical());
        assert!(!missing.is_security_critical());
    }

    #[test]
    fn test_partial_deletion_lists_ids() {
        let err = StorageError::PartialDeletion {
            failed: vec!["a".into(), "b".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("2 blob(s)"));
        assert!(msg.contains("a, b"));
        assert!(VaultError::from(err).is_retryable());
    }

    #[test]
    fn test_unique_violation_maps_to_constraint() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id TEXT PRIMARY KEY); INSERT INTO t VALUES ('x');")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES ('x')", []).unwrap_err();

        assert!(matches!(
            MetadataError::from(err),
            MetadataError::ConstraintViolation(_)
        ));
    }
}
