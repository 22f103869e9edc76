//! PhotoSafe Vault - Vault Service
//!
//! Coordinates the key store, crypto engine, blob store and metadata store.
//! Every operation runs on tokio's blocking pool and completes on the
//! awaiting task.
//!
//! Ordering rules:
//! - save: seal, write blob, then insert the record; a blob is never
//!   replaced, so of two saves racing on one id only the first to commit
//!   its blob can succeed
//! - delete / delete_all: remove blobs first, records only after
//! - a partial blob wipe skips the bulk record wipe and only prunes the
//!   records whose blobs are already gone
//!
//! A crash can therefore leave an orphan blob but never a record without
//! its blob. `delete_all` must not run concurrently with other mutations.

use std::path::Path;
use std::sync::Arc;

use secrecy::SecretString;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::blob_store::{BlobLocation, BlobStore};
use crate::config::VaultConfig;
use crate::crypto::CryptoEngine;
use crate::error::{MetadataError, StorageError, VaultError, VaultResult};
use crate::keystore::{KeyStore, SecretStore};
use crate::metadata::{normalize_tags, now_utc, MetadataEvent, MetadataStore, PhotoRecord};

/// KDF `info` bound into every photo seal
pub const PHOTO_INFO: &[u8] = b"PhotoSafe photo v1";

// ═══════════════════════════════════════════════════════════════════════════
// CANCELLATION
// ═══════════════════════════════════════════════════════════════════════════

/// Requests cancellation of the operations holding the paired token
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Checked by long operations between phases
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// New handle / token pair
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    fn check(token: Option<&CancelToken>) -> VaultResult<()> {
        match token {
            Some(t) if t.is_cancelled() => Err(VaultError::Cancelled),
            _ => Ok(()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// REPORTS
// ═══════════════════════════════════════════════════════════════════════════

/// Result of a successful `delete_all`
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub blobs_removed: usize,
    pub records_removed: usize,
}

/// Consistency between records and blobs
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub records: usize,
    /// Records whose blob is gone
    pub missing_blobs: Vec<String>,
    /// Blobs without a record
    pub orphan_blobs: Vec<String>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.missing_blobs.is_empty() && self.orphan_blobs.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// SERVICE
// ═══════════════════════════════════════════════════════════════════════════

struct Inner {
    engine: CryptoEngine,
    keys: Arc<KeyStore>,
    blobs: Arc<BlobStore>,
    metadata: Arc<MetadataStore>,
}

/// Encrypted photo vault. Cheap to clone; clones share the same stores.
#[derive(Clone)]
pub struct VaultService {
    inner: Arc<Inner>,
}

impl VaultService {
    pub fn new(keys: Arc<KeyStore>, blobs: Arc<BlobStore>, metadata: Arc<MetadataStore>) -> Self {
        Self::with_engine(CryptoEngine::default(), keys, blobs, metadata)
    }

    pub fn with_engine(
        engine: CryptoEngine,
        keys: Arc<KeyStore>,
        blobs: Arc<BlobStore>,
        metadata: Arc<MetadataStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                keys,
                blobs,
                metadata,
            }),
        }
    }

    /// Build all stores from `config` around an existing secret store
    pub fn open(config: &VaultConfig, secrets: Arc<dyn SecretStore>) -> VaultResult<Self> {
        config.validate()?;

        let keys = KeyStore::with_label(secrets, &config.key_store.label);
        let blobs = BlobStore::open(
            &config.blob_dir_path(),
            &config.blob_extension,
            config.secure_delete,
        )?;
        let metadata = MetadataStore::open(&config.database_path())?;

        log::info!("Opened vault at {}", config.root.display());
        Ok(Self::new(Arc::new(keys), Arc::new(blobs), Arc::new(metadata)))
    }

    /// Open using the secret store backend named in `config`
    pub fn open_with_passphrase(
        config: &VaultConfig,
        passphrase: Option<SecretString>,
    ) -> VaultResult<Self> {
        let secrets = config.secret_store(passphrase)?;
        Self::open(config, secrets)
    }

    /// Load `<root>/vault.json` (or defaults) and open
    pub fn open_root(root: &Path, passphrase: Option<SecretString>) -> VaultResult<Self> {
        let config = VaultConfig::load_or_default(&root.join(crate::config::CONFIG_FILE))?;
        Self::open_with_passphrase(&config, passphrase)
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.inner.keys
    }

    pub fn blob_store(&self) -> &BlobStore {
        &self.inner.blobs
    }

    pub fn metadata_store(&self) -> &MetadataStore {
        &self.inner.metadata
    }

    /// Live record change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MetadataEvent> {
        self.inner.metadata.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PHOTO LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt and store a photo. Generates a UUID when `id` is `None`.
    pub async fn save(
        &self,
        plaintext: Vec<u8>,
        id: Option<String>,
        tags: Vec<String>,
        title: Option<String>,
    ) -> VaultResult<PhotoRecord> {
        self.run(move |inner| inner.save(Zeroizing::new(plaintext), id, tags, title, None))
            .await
    }

    /// [`save`](Self::save) that stops between phases once `cancel` fires
    pub async fn save_cancellable(
        &self,
        plaintext: Vec<u8>,
        id: Option<String>,
        tags: Vec<String>,
        title: Option<String>,
        cancel: CancelToken,
    ) -> VaultResult<PhotoRecord> {
        self.run(move |inner| {
            inner.save(Zeroizing::new(plaintext), id, tags, title, Some(&cancel))
        })
        .await
    }

    /// Decrypt the photo described by `record`
    pub async fn load(&self, record: PhotoRecord) -> VaultResult<Vec<u8>> {
        self.run(move |inner| inner.load(&record)).await
    }

    /// Look up a record and decrypt its photo
    pub async fn load_by_id(&self, id: &str) -> VaultResult<Vec<u8>> {
        let id = id.to_string();
        self.run(move |inner| {
            let record = inner.metadata.get(&id)?;
            inner.load(&record)
        })
        .await
    }

    /// Remove one photo, blob first. Returns `false` if no record existed.
    pub async fn delete(&self, id: &str) -> VaultResult<bool> {
        let id = id.to_string();
        self.run(move |inner| {
            inner.blobs.delete(&id)?;
            let existed = inner.metadata.delete(&id)?;
            log::info!("Deleted photo {}", id);
            Ok(existed)
        })
        .await
    }

    /// Remove every photo. Records are only cleared once all blobs are gone.
    pub async fn delete_all(&self) -> VaultResult<DeletionReport> {
        self.run(|inner| inner.delete_all(None)).await
    }

    /// [`delete_all`](Self::delete_all) that can be cancelled before blob removal starts
    pub async fn delete_all_cancellable(&self, cancel: CancelToken) -> VaultResult<DeletionReport> {
        self.run(move |inner| inner.delete_all(Some(&cancel))).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // METADATA
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn get(&self, id: &str) -> VaultResult<PhotoRecord> {
        let id = id.to_string();
        self.run(move |inner| Ok(inner.metadata.get(&id)?)).await
    }

    pub async fn list(&self) -> VaultResult<Vec<PhotoRecord>> {
        self.run(|inner| Ok(inner.metadata.list()?)).await
    }

    pub async fn search_by_tag(&self, tag: &str) -> VaultResult<Vec<PhotoRecord>> {
        let tag = tag.to_string();
        self.run(move |inner| Ok(inner.metadata.search_by_tag(&tag)?))
            .await
    }

    pub async fn count(&self) -> VaultResult<usize> {
        self.run(|inner| Ok(inner.metadata.count()?)).await
    }

    /// Replace a photo's tags; returns the normalized list
    pub async fn set_tags(&self, id: &str, tags: Vec<String>) -> VaultResult<Vec<String>> {
        let id = id.to_string();
        self.run(move |inner| Ok(inner.metadata.set_tags(&id, &tags)?))
            .await
    }

    pub async fn set_title(&self, id: &str, title: Option<String>) -> VaultResult<()> {
        let id = id.to_string();
        self.run(move |inner| Ok(inner.metadata.set_title(&id, title.as_deref())?))
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // MAINTENANCE
    // ═══════════════════════════════════════════════════════════════════════

    /// Delete blobs that have no record. Returns the removed ids.
    pub async fn collect_orphans(&self) -> VaultResult<Vec<String>> {
        self.run(|inner| inner.collect_orphans()).await
    }

    /// Compare records against blobs on disk
    pub async fn verify(&self) -> VaultResult<IntegrityReport> {
        self.run(|inner| inner.verify()).await
    }

    async fn run<T, F>(&self, f: F) -> VaultResult<T>
    where
        F: FnOnce(&Inner) -> VaultResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

impl Inner {
    fn save(
        &self,
        plaintext: Zeroizing<Vec<u8>>,
        id: Option<String>,
        tags: Vec<String>,
        title: Option<String>,
        cancel: Option<&CancelToken>,
    ) -> VaultResult<PhotoRecord> {
        let id = id.unwrap_or_else(|| Uuid::new_v4().to_string());
        self.blobs.location_for(&id)?;
        if self.metadata.contains(&id)? {
            return Err(MetadataError::ConstraintViolation(id).into());
        }

        let public_key = self.keys.public_key()?;
        let sealed = self
            .engine
            .seal(&plaintext, &public_key, PHOTO_INFO, id.as_bytes())?;
        CancelToken::check(cancel)?;

        // A concurrent save of the same id owns the blob if it linked first
        let location = self.blobs.write(&id, &sealed.ciphertext).map_err(|e| match e {
            StorageError::AlreadyExists(id) => {
                VaultError::from(MetadataError::ConstraintViolation(id))
            }
            other => other.into(),
        })?;
        if let Err(e) = CancelToken::check(cancel) {
            self.discard_blob(&id);
            return Err(e);
        }

        let record = PhotoRecord {
            id,
            blob_path: Some(location.path().to_path_buf()),
            encapsulated_key: sealed.encapsulated_key,
            suite: self.engine.suite().id(),
            recipient_key_id: public_key.key_id(),
            size: plaintext.len() as u64,
            tags: normalize_tags(&tags),
            title,
            created_at: now_utc(),
        };

        if let Err(e) = self.metadata.insert(&record) {
            self.discard_blob(&record.id);
            return Err(e.into());
        }

        log::info!(
            "Saved photo {} ({} bytes, suite {:#06x})",
            record.id,
            record.size,
            record.suite
        );
        Ok(record)
    }

    fn load(&self, record: &PhotoRecord) -> VaultResult<Vec<u8>> {
        let location = match &record.blob_path {
            Some(path) => BlobLocation::from(path.clone()),
            None => self.blobs.location_for(&record.id)?,
        };
        let ciphertext = self.blobs.read(&location)?;

        let plaintext = self
            .keys
            .with_private_key(|private| {
                self.engine.open_record(
                    record.suite,
                    &record.recipient_key_id,
                    &record.encapsulated_key,
                    &ciphertext,
                    private,
                    PHOTO_INFO,
                    record.id.as_bytes(),
                )
            })?
            .map_err(|e| {
                log::warn!("Failed to open photo {}: {}", record.id, e);
                VaultError::Decrypt(e)
            })?;

        log::debug!("Loaded photo {}", record.id);
        Ok(plaintext)
    }

    fn delete_all(&self, cancel: Option<&CancelToken>) -> VaultResult<DeletionReport> {
        CancelToken::check(cancel)?;

        let blobs_removed = match self.blobs.delete_all() {
            Ok(n) => n,
            Err(StorageError::PartialDeletion { failed }) => {
                log::warn!("Blob deletion incomplete, {} blob(s) remain", failed.len());
                // A record left pointing at a removed blob outranks the blob failure
                self.prune_records_without_blobs(&failed)?;
                return Err(StorageError::PartialDeletion { failed }.into());
            }
            Err(e) => return Err(e.into()),
        };
        let records_removed = self.metadata.delete_all()?;

        log::info!(
            "Vault cleared: {} blob(s), {} record(s)",
            blobs_removed,
            records_removed
        );
        Ok(DeletionReport {
            blobs_removed,
            records_removed,
        })
    }

    /// After a partial blob wipe, drop only the records whose blob is gone.
    /// Every record is attempted; the first failure is returned.
    fn prune_records_without_blobs(&self, failed: &[String]) -> VaultResult<usize> {
        let records = self.metadata.list().map_err(|e| {
            log::error!("Could not list records after partial deletion: {}", e);
            e
        })?;

        let mut pruned = 0;
        let mut first_error = None;
        for record in records {
            if failed.contains(&record.id) || self.blob_present(&record) {
                continue;
            }
            match self.metadata.delete(&record.id) {
                Ok(_) => pruned += 1,
                Err(e) => {
                    log::error!("Could not prune record {}: {}", record.id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(pruned),
        }
    }

    fn blob_present(&self, record: &PhotoRecord) -> bool {
        match &record.blob_path {
            Some(path) => path.exists(),
            None => self.blobs.exists(&record.id),
        }
    }

    fn collect_orphans(&self) -> VaultResult<Vec<String>> {
        let known = self.metadata.ids()?;
        let mut removed = Vec::new();
        let mut failed = Vec::new();

        for id in self.blobs.list_ids()? {
            if known.contains(&id) {
                continue;
            }
            match self.blobs.delete(&id) {
                Ok(_) => removed.push(id),
                Err(e) => {
                    log::warn!("Could not remove orphan blob {}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        if !failed.is_empty() {
            return Err(StorageError::PartialDeletion { failed }.into());
        }
        if !removed.is_empty() {
            log::info!("Removed {} orphan blob(s)", removed.len());
        }
        Ok(removed)
    }

    fn verify(&self) -> VaultResult<IntegrityReport> {
        let records = self.metadata.list()?;
        let on_disk = self.blobs.list_ids()?;

        let mut report = IntegrityReport {
            records: records.len(),
            ..Default::default()
        };

        for record in &records {
            if !self.blob_present(record) {
                report.missing_blobs.push(record.id.clone());
            }
        }

        let known: std::collections::HashSet<&str> =
            records.iter().map(|r| r.id.as_str()).collect();
        report.orphan_blobs = on_disk
            .into_iter()
            .filter(|id| !known.contains(id.as_str()))
            .collect();

        Ok(report)
    }

    fn discard_blob(&self, id: &str) {
        if let Err(e) = self.blobs.delete(id) {
            log::warn!("Could not remove blob {} after failed save: {}", id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CryptoError;
    use crate::keystore::MemorySecretStore;
    use tempfile::{tempdir, TempDir};

    fn open_vault() -> (TempDir, VaultService) {
        let dir = tempdir().unwrap();
        let config = VaultConfig::new(dir.path());
        let vault = VaultService::open(&config, Arc::new(MemorySecretStore::new())).unwrap();
        vault.key_store().provision(false).unwrap();
        (dir, vault)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (_dir, vault) = open_vault();

        let record = vault
            .save(b"jpeg bytes".to_vec(), None, vec!["cat".into()], Some("Tom".into()))
            .await
            .unwrap();

        assert_eq!(record.size, 10);
        assert_eq!(record.tags, vec!["cat"]);
        assert!(vault.blob_store().exists(&record.id));
        assert_eq!(vault.get(&record.id).await.unwrap(), record);
        assert_eq!(vault.load(record.clone()).await.unwrap(), b"jpeg bytes");
        assert_eq!(vault.load_by_id(&record.id).await.unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_save_without_key_fails_at_key_stage() {
        let dir = tempdir().unwrap();
        let config = VaultConfig::new(dir.path());
        let vault = VaultService::open(&config, Arc::new(MemorySecretStore::new())).unwrap();

        let err = vault.save(b"x".to_vec(), None, vec![], None).await.unwrap_err();
        assert!(matches!(err, VaultError::KeyStore(_)));
        assert_eq!(vault.count().await.unwrap(), 0);
        assert!(vault.blob_store().list_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_keeps_original() {
        let (_dir, vault) = open_vault();

        vault
            .save(b"first".to_vec(), Some("p1".into()), vec![], None)
            .await
            .unwrap();
        let err = vault
            .save(b"second".to_vec(), Some("p1".into()), vec![], None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            VaultError::Metadata(MetadataError::ConstraintViolation(_))
        ));
        assert_eq!(vault.load_by_id("p1").await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_invalid_id_rejected_before_sealing() {
        let (_dir, vault) = open_vault();

        let err = vault
            .save(b"x".to_vec(), Some("../evil".into()), vec![], None)
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::Storage(StorageError::InvalidId(_))));
    }

    #[tokio::test]
    async fn test_missing_blob_is_storage_error() {
        let (_dir, vault) = open_vault();
        let record = vault.save(b"x".to_vec(), None, vec![], None).await.unwrap();

        std::fs::remove_file(record.blob_path.as_ref().unwrap()).unwrap();

        let err = vault.load(record).await.unwrap_err();
        assert!(matches!(err, VaultError::Storage(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rotated_key_reports_mismatch() {
        let (_dir, vault) = open_vault();
        let record = vault.save(b"x".to_vec(), None, vec![], None).await.unwrap();

        vault.key_store().provision(true).unwrap();

        let err = vault.load(record).await.unwrap_err();
        assert!(matches!(err, VaultError::Decrypt(CryptoError::KeyMismatch)));
    }

    #[tokio::test]
    async fn test_cancelled_save_leaves_nothing() {
        let (_dir, vault) = open_vault();
        let (handle, token) = CancelToken::pair();
        handle.cancel();

        let err = vault
            .save_cancellable(b"x".to_vec(), Some("c1".into()), vec![], None, token)
            .await
            .unwrap_err();

        assert!(matches!(err, VaultError::Cancelled));
        assert!(!vault.blob_store().exists("c1"));
        assert_eq!(vault.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_delete_all_keeps_everything() {
        let (_dir, vault) = open_vault();
        vault.save(b"x".to_vec(), None, vec![], None).await.unwrap();
        let (handle, token) = CancelToken::pair();
        handle.cancel();

        let err = vault.delete_all_cancellable(token).await.unwrap_err();
        assert!(matches!(err, VaultError::Cancelled));
        assert_eq!(vault.count().await.unwrap(), 1);
        assert_eq!(vault.blob_store().list_ids().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_blob_wipe_keeps_metadata_consistent() {
        let (dir, vault) = open_vault();
        let a = vault.save(b"a".to_vec(), None, vec![], None).await.unwrap();
        std::fs::create_dir(dir.path().join("photos").join("stuck.enc")).unwrap();

        let err = vault.delete_all().await.unwrap_err();
        assert!(matches!(
            err,
            VaultError::Storage(StorageError::PartialDeletion { .. })
        ));

        // The removed blob's record went with it; nothing dangles
        assert!(matches!(
            vault.get(&a.id).await,
            Err(VaultError::Metadata(MetadataError::NotFound(_)))
        ));
        assert!(vault.verify().await.unwrap().missing_blobs.is_empty());
    }

    #[tokio::test]
    async fn test_failed_prune_after_partial_wipe_is_reported() {
        let (dir, vault) = open_vault();
        let a = vault.save(b"a".to_vec(), None, vec![], None).await.unwrap();
        std::fs::create_dir(dir.path().join("photos").join("stuck.enc")).unwrap();

        let conn = rusqlite::Connection::open(vault.metadata_store().path()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER keep_photos BEFORE DELETE ON photos
             BEGIN SELECT RAISE(ABORT, 'photos are read only'); END;",
        )
        .unwrap();

        let err = vault.delete_all().await.unwrap_err();
        assert!(matches!(err, VaultError::Metadata(_)), "got {:?}", err);

        // The caller was told; the dangling record is visible to verify
        assert_eq!(vault.verify().await.unwrap().missing_blobs, vec![a.id]);
    }

    #[tokio::test]
    async fn test_delete_single_photo() {
        let (_dir, vault) = open_vault();
        let record = vault.save(b"x".to_vec(), None, vec![], None).await.unwrap();

        assert!(vault.delete(&record.id).await.unwrap());
        assert!(!vault.blob_store().exists(&record.id));
        assert!(matches!(
            vault.get(&record.id).await,
            Err(VaultError::Metadata(MetadataError::NotFound(_)))
        ));
        assert!(!vault.delete(&record.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_edits_and_search() {
        let (_dir, vault) = open_vault();
        let record = vault
            .save(b"x".to_vec(), None, vec!["a".into()], None)
            .await
            .unwrap();

        vault
            .set_tags(&record.id, vec!["beach".into(), "sun".into(), "beach".into()])
            .await
            .unwrap();
        vault
            .set_title(&record.id, Some("Summer".into()))
            .await
            .unwrap();

        let found = vault.search_by_tag("sun").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].tags, vec!["beach", "sun"]);
        assert_eq!(found[0].title.as_deref(), Some("Summer"));
        assert_eq!(vault.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_and_collect_orphans() {
        let (_dir, vault) = open_vault();
        let kept = vault.save(b"x".to_vec(), None, vec![], None).await.unwrap();
        vault.blob_store().write("orphan", b"residue").unwrap();

        let report = vault.verify().await.unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.orphan_blobs, vec!["orphan"]);
        assert!(!report.is_healthy());

        assert_eq!(vault.collect_orphans().await.unwrap(), vec!["orphan"]);
        assert!(vault.verify().await.unwrap().is_healthy());
        assert!(vault.blob_store().exists(&kept.id));
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let (_dir, vault) = open_vault();
        let mut rx = vault.subscribe();

        let record = vault.save(b"x".to_vec(), None, vec![], None).await.unwrap();
        vault.delete_all().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), MetadataEvent::Inserted(record.id));
        assert_eq!(rx.recv().await.unwrap(), MetadataEvent::Cleared);
    }
}
