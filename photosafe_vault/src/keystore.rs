//! PhotoSafe Vault - Recipient Key Store
//!
//! Holds the device's single hybrid key pair. The pair is one secret (the
//! private key embeds its public half), so a rotation either replaces it
//! whole or not at all. The private key is handed to callers inside a
//! closure, never as an owned value.
//!
//! ```text
//! KeyStore ──► SecretStore (trait)
//!               ├── MemorySecretStore   tests / ephemeral vaults
//!               └── FileSecretStore     Argon2id KEK + XChaCha20-Poly1305
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::blob_store::write_atomic;
use crate::crypto::aead::{decrypt_xchacha, encrypt_xchacha};
use crate::crypto::keys::{generate_salt, SymmetricKey, KEY_LEN};
use crate::crypto::{KeyId, KeyPair, PrivateKey, PublicKey};
use crate::error::{KeyStoreError, KeyStoreResult};

/// Label the recipient key pair is stored under
pub const DEFAULT_KEY_LABEL: &str = "photosafe.recipient.v1";

// ═══════════════════════════════════════════════════════════════
// SECRET STORE BACKENDS
// ═══════════════════════════════════════════════════════════════

/// Platform secure storage for labelled secrets
pub trait SecretStore: Send + Sync {
    /// Fetch a secret, `None` if the label is unset
    fn get(&self, label: &str) -> KeyStoreResult<Option<Zeroizing<Vec<u8>>>>;

    /// Store or replace a secret
    fn put(&self, label: &str, secret: &[u8]) -> KeyStoreResult<()>;

    /// Remove a secret; removing a missing label is not an error
    fn delete(&self, label: &str) -> KeyStoreResult<()>;

    /// Short description used in diagnostics
    fn describe(&self) -> String;
}

/// In-process secret store
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, Zeroizing<Vec<u8>>>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, label: &str) -> KeyStoreResult<Option<Zeroizing<Vec<u8>>>> {
        Ok(self.entries.lock().get(label).cloned())
    }

    fn put(&self, label: &str, secret: &[u8]) -> KeyStoreResult<()> {
        self.entries
            .lock()
            .insert(label.to_string(), Zeroizing::new(secret.to_vec()));
        Ok(())
    }

    fn delete(&self, label: &str) -> KeyStoreResult<()> {
        self.entries.lock().remove(label);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory secret store".into()
    }
}

/// Argon2id cost parameters for passphrase-derived wrapping keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory in KiB
    pub memory_kib: u32,
    /// Iterations (time cost)
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024, // 64 MiB
            iterations: 3,
            parallelism: 2,
        }
    }
}

impl KdfParams {
    /// Profile for weak devices
    pub fn low_memory() -> Self {
        Self {
            memory_kib: 16 * 1024,
            iterations: 4,
            parallelism: 1,
        }
    }

    fn derive(&self, passphrase: &SecretString, salt: &[u8]) -> KeyStoreResult<SymmetricKey> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(KEY_LEN))
            .map_err(|e| KeyStoreError::Unavailable(format!("invalid Argon2 parameters: {}", e)))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut out = [0u8; KEY_LEN];
        argon2
            .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut out)
            .map_err(|e| KeyStoreError::Unavailable(format!("key derivation failed: {}", e)))?;
        Ok(SymmetricKey::new(out))
    }
}

/// On-disk envelope of one wrapped secret
#[derive(Serialize, Deserialize)]
struct WrappedSecret {
    version: u8,
    kdf: KdfParams,
    salt: String,
    sealed: String,
}

const WRAPPED_SECRET_VERSION: u8 = 1;

/// Passphrase-protected secrets, one JSON file per label
pub struct FileSecretStore {
    dir: PathBuf,
    passphrase: SecretString,
    kdf: KdfParams,
}

impl FileSecretStore {
    pub fn open(dir: &Path, passphrase: SecretString, kdf: KdfParams) -> KeyStoreResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            KeyStoreError::Unavailable(format!("cannot create {}: {}", dir.display(), e))
        })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            passphrase,
            kdf,
        })
    }

    fn path_for(&self, label: &str) -> PathBuf {
        let file: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.key", file))
    }
}

impl SecretStore for FileSecretStore {
    fn get(&self, label: &str) -> KeyStoreResult<Option<Zeroizing<Vec<u8>>>> {
        let path = self.path_for(label);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(KeyStoreError::Unavailable(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let wrapped: WrappedSecret = serde_json::from_slice(&raw)
            .map_err(|e| KeyStoreError::Unavailable(format!("corrupted secret file: {}", e)))?;
        if wrapped.version != WRAPPED_SECRET_VERSION {
            return Err(KeyStoreError::Unavailable(format!(
                "unsupported secret file version {}",
                wrapped.version
            )));
        }

        let salt = B64
            .decode(&wrapped.salt)
            .map_err(|e| KeyStoreError::Unavailable(format!("corrupted salt: {}", e)))?;
        let sealed = B64
            .decode(&wrapped.sealed)
            .map_err(|e| KeyStoreError::Unavailable(format!("corrupted secret: {}", e)))?;

        let kek = wrapped.kdf.derive(&self.passphrase, &salt)?;
        let secret = decrypt_xchacha(&kek, &sealed, label.as_bytes()).map_err(|_| {
            KeyStoreError::Unavailable("secret could not be unwrapped (wrong passphrase?)".into())
        })?;

        Ok(Some(Zeroizing::new(secret)))
    }

    fn put(&self, label: &str, secret: &[u8]) -> KeyStoreResult<()> {
        let salt: [u8; 16] = generate_salt();
        let kek = self.kdf.derive(&self.passphrase, &salt)?;
        let sealed = encrypt_xchacha(&kek, secret, label.as_bytes())
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))?;

        let wrapped = WrappedSecret {
            version: WRAPPED_SECRET_VERSION,
            kdf: self.kdf,
            salt: B64.encode(salt),
            sealed: B64.encode(sealed),
        };
        let json = serde_json::to_vec_pretty(&wrapped)
            .map_err(|e| KeyStoreError::Unavailable(e.to_string()))?;

        let path = self.path_for(label);
        write_atomic(&path, &json).map_err(|e| {
            KeyStoreError::Unavailable(format!("cannot write {}: {}", path.display(), e))
        })
    }

    fn delete(&self, label: &str) -> KeyStoreResult<()> {
        let path = self.path_for(label);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(KeyStoreError::Unavailable(format!(
                "cannot remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("file secret store at {}", self.dir.display())
    }
}

// ═══════════════════════════════════════════════════════════════
// KEY STORE
// ═══════════════════════════════════════════════════════════════

/// Owner of the recipient key pair
pub struct KeyStore {
    secrets: Arc<dyn SecretStore>,
    label: String,
    public_cache: RwLock<Option<PublicKey>>,
}

impl KeyStore {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_label(secrets, DEFAULT_KEY_LABEL)
    }

    pub fn with_label(secrets: Arc<dyn SecretStore>, label: &str) -> Self {
        Self {
            secrets,
            label: label.to_string(),
            public_cache: RwLock::new(None),
        }
    }

    /// Whether a key pair is present
    pub fn is_provisioned(&self) -> KeyStoreResult<bool> {
        Ok(self.secrets.get(&self.label)?.is_some())
    }

    /// Generate and store a key pair.
    ///
    /// With `replace == false` an existing pair is kept and its public key
    /// returned. With `replace == true` a new pair overwrites the old one;
    /// photos sealed to the old key can no longer be opened.
    pub fn provision(&self, replace: bool) -> KeyStoreResult<PublicKey> {
        if !replace && self.is_provisioned()? {
            return self.public_key();
        }

        let pair = KeyPair::generate();
        let public = pair.public_key().clone();

        self.secrets.put(&self.label, &pair.private_key().to_bytes())?;
        *self.public_cache.write() = Some(public.clone());

        log::info!(
            "Provisioned recipient key {} in {}",
            public.key_id(),
            self.secrets.describe()
        );
        Ok(public)
    }

    /// Public half of the stored pair
    pub fn public_key(&self) -> KeyStoreResult<PublicKey> {
        if let Some(public) = self.public_cache.read().as_ref() {
            return Ok(public.clone());
        }

        let public = self.with_private_key(|private| private.public_key().clone())?;
        *self.public_cache.write() = Some(public.clone());
        Ok(public)
    }

    /// Fingerprint of the stored public key
    pub fn key_id(&self) -> KeyStoreResult<KeyId> {
        Ok(self.public_key()?.key_id())
    }

    /// Run `f` with the private key; the key is wiped when `f` returns
    pub fn with_private_key<R>(&self, f: impl FnOnce(&PrivateKey) -> R) -> KeyStoreResult<R> {
        let bytes = self
            .secrets
            .get(&self.label)?
            .ok_or_else(|| self.not_provisioned())?;
        let private = PrivateKey::from_bytes(&bytes).map_err(|e| {
            KeyStoreError::Unavailable(format!("stored private key corrupted: {}", e))
        })?;

        Ok(f(&private))
    }

    /// Remove the key pair
    pub fn destroy(&self) -> KeyStoreResult<()> {
        self.secrets.delete(&self.label)?;
        *self.public_cache.write() = None;
        log::info!("Destroyed recipient key in {}", self.secrets.describe());
        Ok(())
    }

    fn not_provisioned(&self) -> KeyStoreError {
        KeyStoreError::NotProvisioned(format!(
            "no key under label '{}' in {}",
            self.label,
            self.secrets.describe()
        ))
    }
}
