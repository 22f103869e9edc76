//! PhotoSafe Vault - Configuration
//!
//! ```text
//! <root>/
//! ├── vault.json        this config
//! ├── photos/<id>.enc   sealed blobs
//! ├── db/index.db       metadata (SQLite, WAL)
//! └── keys/             file secret store
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::blob_store::{write_atomic, DEFAULT_EXTENSION};
use crate::error::{VaultError, VaultResult};
use crate::keystore::{
    FileSecretStore, KdfParams, MemorySecretStore, SecretStore, DEFAULT_KEY_LABEL,
};

/// Config file name inside the vault root
pub const CONFIG_FILE: &str = "vault.json";

/// Where the recipient key pair is kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStoreBackend {
    /// Process memory only; the key dies with the process
    Memory,
    /// Passphrase-wrapped files under the key directory
    File,
}

/// Key store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    pub backend: KeyStoreBackend,
    /// Directory for the file backend, relative to the vault root
    pub dir: PathBuf,
    /// Label of the recipient key pair
    pub label: String,
    /// Argon2id parameters for the file backend
    pub kdf: KdfParams,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            backend: KeyStoreBackend::File,
            dir: PathBuf::from("keys"),
            label: DEFAULT_KEY_LABEL.into(),
            kdf: KdfParams::default(),
        }
    }
}

/// Vault configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault root directory. Not stored; taken from where the config file lives.
    #[serde(skip)]
    pub root: PathBuf,
    /// Blob directory, relative to the root
    pub blob_dir: PathBuf,
    /// Blob file extension
    pub blob_extension: String,
    /// Database file, relative to the root
    pub database: PathBuf,
    /// Overwrite blobs with zeros before unlinking
    pub secure_delete: bool,
    pub key_store: KeyStoreConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            blob_dir: PathBuf::from("photos"),
            blob_extension: DEFAULT_EXTENSION.into(),
            database: PathBuf::from("db").join("index.db"),
            secure_delete: true,
            key_store: KeyStoreConfig::default(),
        }
    }
}

impl VaultConfig {
    /// Default layout under `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn blob_dir_path(&self) -> PathBuf {
        self.root.join(&self.blob_dir)
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(&self.database)
    }

    pub fn key_dir_path(&self) -> PathBuf {
        self.root.join(&self.key_store.dir)
    }

    /// Reject settings that would break the on-disk layout
    pub fn validate(&self) -> VaultResult<()> {
        let ext = self.blob_extension.trim_start_matches('.');
        if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(VaultError::Config(format!(
                "blob extension must be alphanumeric, got {:?}",
                self.blob_extension
            )));
        }
        if self.key_store.label.trim().is_empty() {
            return Err(VaultError::Config("key label must not be empty".into()));
        }
        if self.blob_dir_path() == self.key_dir_path() {
            return Err(VaultError::Config(
                "blob and key directories must differ".into(),
            ));
        }
        Ok(())
    }

    /// Read a config file; the vault root is the file's directory
    pub fn load(path: &Path) -> VaultResult<Self> {
        let raw = std::fs::read(path)
            .map_err(|e| VaultError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let mut config: Self = serde_json::from_slice(&raw)?;
        config.root = root_of(path);
        config.validate()?;
        Ok(config)
    }

    /// Read `path` if it exists, otherwise defaults rooted at its directory
    pub fn load_or_default(path: &Path) -> VaultResult<Self> {
        if path.exists() {
            return Self::load(path);
        }

        log::info!("No config at {}, using defaults", path.display());
        Ok(Self::new(root_of(path)))
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: &Path) -> VaultResult<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)
            .map_err(|e| VaultError::Config(format!("cannot write {}: {}", path.display(), e)))
    }

    /// Build the configured secret store backend
    pub fn secret_store(
        &self,
        passphrase: Option<SecretString>,
    ) -> VaultResult<Arc<dyn SecretStore>> {
        match self.key_store.backend {
            KeyStoreBackend::Memory => Ok(Arc::new(MemorySecretStore::new())),
            KeyStoreBackend::File => {
                let passphrase = passphrase.ok_or_else(|| {
                    VaultError::Config("file key store requires a passphrase".into())
                })?;
                let store =
                    FileSecretStore::open(&self.key_dir_path(), passphrase, self.key_store.kdf)?;
                Ok(Arc::new(store))
            }
        }
    }
}

fn root_of(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_layout() {
        let config = VaultConfig::new("/vault");

        assert_eq!(config.blob_dir_path(), PathBuf::from("/vault/photos"));
        assert_eq!(config.database_path(), PathBuf::from("/vault/db/index.db"));
        assert_eq!(config.key_dir_path(), PathBuf::from("/vault/keys"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = VaultConfig::new(dir.path());
        config.secure_delete = false;
        config.key_store.backend = KeyStoreBackend::Memory;
        config.save(&path).unwrap();

        let loaded = VaultConfig::load(&path).unwrap();
        assert!(!loaded.secure_delete);
        assert_eq!(loaded.key_store.backend, KeyStoreBackend::Memory);
        assert_eq!(loaded.root, dir.path());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, br#"{"key_store":{"backend":"memory"}}"#).unwrap();

        let config = VaultConfig::load(&path).unwrap();
        assert_eq!(config.blob_extension, "enc");
        assert_eq!(config.key_store.backend, KeyStoreBackend::Memory);
        assert_eq!(config.key_store.label, DEFAULT_KEY_LABEL);
        assert_eq!(config.root, dir.path());
        assert_eq!(config.blob_dir_path(), dir.path().join("photos"));
        assert_eq!(config.database_path(), dir.path().join("db").join("index.db"));
    }

    #[test]
    fn test_moved_vault_follows_its_config() {
        let old = tempdir().unwrap();
        let new = tempdir().unwrap();

        VaultConfig::new(old.path())
            .save(&old.path().join(CONFIG_FILE))
            .unwrap();
        let raw = std::fs::read_to_string(old.path().join(CONFIG_FILE)).unwrap();
        assert!(!raw.contains("\"root\""));

        std::fs::rename(old.path().join(CONFIG_FILE), new.path().join(CONFIG_FILE)).unwrap();
        let config = VaultConfig::load(&new.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.root, new.path());
        assert_eq!(config.blob_dir_path(), new.path().join("photos"));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::load_or_default(&dir.path().join(CONFIG_FILE)).unwrap();

        assert_eq!(config.root, dir.path());
    }

    #[test]
    fn test_invalid_extension_rejected() {
        let mut config = VaultConfig::new("/vault");
        config.blob_extension = "../x".into();

        assert!(matches!(config.validate(), Err(VaultError::Config(_))));
    }

    #[test]
    fn test_file_backend_needs_passphrase() {
        let config = VaultConfig::new("/vault");
        assert!(matches!(config.secret_store(None), Err(VaultError::Config(_))));
    }
}
