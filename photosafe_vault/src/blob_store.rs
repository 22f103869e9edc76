//! PhotoSafe Vault - Encrypted Blob Store
//!
//! One file per photo (`<id>.<ext>`) in a flat directory. Writes go through
//! a uniquely named temp file that is linked into place, so a reader never
//! sees a half-written blob and an existing blob is never replaced.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Default blob file extension
pub const DEFAULT_EXTENSION: &str = "enc";

const TEMP_SUFFIX: &str = "tmp";

/// Location of a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobLocation(PathBuf);

impl BlobLocation {
    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl From<PathBuf> for BlobLocation {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

/// Flat-directory store for sealed photo blobs
#[derive(Debug)]
pub struct BlobStore {
    dir: PathBuf,
    extension: String,
    secure_delete: bool,
}

impl BlobStore {
    /// Open (and create if needed) a blob directory
    pub fn open(dir: &Path, extension: &str, secure_delete: bool) -> StorageResult<Self> {
        fs::create_dir_all(dir).map_err(|source| StorageError::WriteFailed {
            path: dir.to_path_buf(),
            source,
        })?;

        Ok(Self {
            dir: dir.to_path_buf(),
            extension: extension.trim_start_matches('.').to_string(),
            secure_delete,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path a blob for `id` lives at
    pub fn location_for(&self, id: &str) -> StorageResult<BlobLocation> {
        validate_id(id)?;
        Ok(BlobLocation(self.dir.join(format!("{}.{}", id, self.extension))))
    }

    /// Write a new blob for `id`. Fails with `AlreadyExists` if one is present.
    pub fn write(&self, id: &str, data: &[u8]) -> StorageResult<BlobLocation> {
        let location = self.location_for(id)?;

        write_new(location.path(), data).map_err(|source| {
            if source.kind() == io::ErrorKind::AlreadyExists {
                StorageError::AlreadyExists(id.to_string())
            } else {
                StorageError::WriteFailed {
                    path: location.path().to_path_buf(),
                    source,
                }
            }
        })?;

        log::debug!("Wrote blob {} ({} bytes)", id, data.len());
        Ok(location)
    }

    /// Read a blob
    pub fn read(&self, location: &BlobLocation) -> StorageResult<Vec<u8>> {
        fs::read(location.path()).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                StorageError::NotFound(location.path().to_path_buf())
            } else {
                StorageError::ReadFailed {
                    path: location.path().to_path_buf(),
                    source,
                }
            }
        })
    }

    /// Check whether a blob for `id` exists
    pub fn exists(&self, id: &str) -> bool {
        self.location_for(id)
            .map(|loc| loc.path().is_file())
            .unwrap_or(false)
    }

    /// Delete the blob for `id`. Returns `false` if there was none.
    pub fn delete(&self, id: &str) -> StorageResult<bool> {
        let location = self.location_for(id)?;
        match self.remove(location.path()) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StorageError::WriteFailed {
                path: location.path().to_path_buf(),
                source,
            }),
        }
    }

    /// Ids of every blob currently on disk
    pub fn list_ids(&self) -> StorageResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .scan()?
            .into_iter()
            .filter(|entry| !entry.temp)
            .map(|entry| entry.id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Remove every blob, including leftover temp files.
    ///
    /// Every entry is attempted. Ids that could not be removed are reported
    /// together in [`StorageError::PartialDeletion`]. Files without the blob
    /// extension are left alone.
    pub fn delete_all(&self) -> StorageResult<usize> {
        let mut removed = 0;
        let mut failed = Vec::new();

        for entry in self.scan()? {
            match self.remove(&entry.path) {
                Ok(()) => {
                    if !entry.temp {
                        removed += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    log::warn!("Could not delete blob {}: {}", entry.id, e);
                    failed.push(entry.id);
                }
            }
        }

        if !failed.is_empty() {
            return Err(StorageError::PartialDeletion { failed });
        }

        log::info!("Deleted {} blob(s) from {}", removed, self.dir.display());
        Ok(removed)
    }

    fn scan(&self) -> StorageResult<Vec<ScannedEntry>> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::ReadFailed {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let blob_suffix = format!(".{}", self.extension);
        let temp_suffix = format!(".{}", TEMP_SUFFIX);
        let mut entries = Vec::new();

        for entry in read_dir {
            let entry = entry.map_err(|source| StorageError::ReadFailed {
                path: self.dir.clone(),
                source,
            })?;
            let name = match entry.file_name().to_str() {
                Some(name) => name.to_string(),
                None => continue,
            };

            // temp files are `<id>.<ext>.<nonce>.tmp`
            let temp_id = name
                .strip_suffix(&temp_suffix)
                .and_then(|rest| rest.rsplit_once('.'))
                .and_then(|(blob_name, _)| blob_name.strip_suffix(&blob_suffix));

            if let Some(id) = temp_id {
                entries.push(ScannedEntry {
                    id: id.to_string(),
                    path: entry.path(),
                    temp: true,
                });
            } else if let Some(id) = name.strip_suffix(&blob_suffix) {
                entries.push(ScannedEntry {
                    id: id.to_string(),
                    path: entry.path(),
                    temp: false,
                });
            }
        }

        Ok(entries)
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        if self.secure_delete {
            overwrite_with_zeros(path);
        }
        fs::remove_file(path)
    }
}

struct ScannedEntry {
    id: String,
    path: PathBuf,
    temp: bool,
}

/// Write `data` to `path` via a synced temp file and a rename, replacing
/// whatever is there
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp_path = write_temp(path, data)?;

    let result = fs::rename(&temp_path, path);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result?;
    sync_parent(path)
}

/// Write `data` to `path` only if nothing is there yet.
///
/// The synced temp file is hard-linked into place, which fails with
/// `AlreadyExists` instead of replacing a concurrent writer's file.
pub(crate) fn write_new(path: &Path, data: &[u8]) -> io::Result<()> {
    let temp_path = write_temp(path, data)?;

    let result = fs::hard_link(&temp_path, path);
    let _ = fs::remove_file(&temp_path);
    result?;
    sync_parent(path)
}

/// Synced `<path>.<nonce>.tmp` private to this writer
fn write_temp(path: &Path, data: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_os_string();
    temp_name.push(format!(".{}.{}", Uuid::new_v4().simple(), TEMP_SUFFIX));
    let temp_path = PathBuf::from(temp_name);

    let result = (|| {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()
    })();

    match result {
        Ok(()) => Ok(temp_path),
        Err(e) => {
            let _ = fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

/// Persist the directory entry of a freshly committed file
#[cfg(unix)]
fn sync_parent(path: &Path) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::File::open(parent)?.sync_all()
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Best-effort overwrite before unlinking
fn overwrite_with_zeros(path: &Path) {
    let size = match fs::metadata(path) {
        Ok(meta) if meta.is_file() => meta.len() as usize,
        _ => return,
    };
    if size == 0 {
        return;
    }

    if let Ok(mut file) = OpenOptions::new().write(true).open(path) {
        let zeros = vec![0u8; size.min(1024 * 1024)];
        let mut remaining = size;
        while remaining > 0 {
            let to_write = remaining.min(zeros.len());
            if file.write_all(&zeros[..to_write]).is_err() {
                return;
            }
            remaining -= to_write;
        }
        let _ = file.sync_all();
    }
}

fn validate_id(id: &str) -> StorageResult<()> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_read_delete() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, true).unwrap();

        let loc = store.write("photo_001", b"sealed bytes").unwrap();
        assert_eq!(loc.path(), dir.path().join("photo_001.enc"));
        assert!(store.exists("photo_001"));
        assert_eq!(store.read(&loc).unwrap(), b"sealed bytes");

        assert!(store.delete("photo_001").unwrap());
        assert!(!store.exists("photo_001"));
        assert!(!store.delete("photo_001").unwrap());
    }

    #[test]
    fn test_write_refuses_to_replace_and_leaves_no_temp() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, false).unwrap();

        let loc = store.write("a", b"first").unwrap();
        assert!(matches!(
            store.write("a", b"second"),
            Err(StorageError::AlreadyExists(id)) if id == "a"
        ));

        assert_eq!(store.read(&loc).unwrap(), b"first");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("a.enc")]);
    }

    #[test]
    fn test_concurrent_writes_of_one_id_keep_a_single_intact_blob() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(
            BlobStore::open(dir.path(), DEFAULT_EXTENSION, false).unwrap(),
        );

        for round in 0..50 {
            let id = format!("r{}", round);
            let writers: Vec<_> = (0..4u8)
                .map(|i| {
                    let store = store.clone();
                    let id = id.clone();
                    std::thread::spawn(move || store.write(&id, &[i; 4096]).ok().map(|_| i))
                })
                .collect();
            let winners: Vec<u8> = writers
                .into_iter()
                .filter_map(|w| w.join().unwrap())
                .collect();

            assert_eq!(winners.len(), 1, "round {}", round);
            let loc = store.location_for(&id).unwrap();
            assert_eq!(store.read(&loc).unwrap(), vec![winners[0]; 4096]);
        }
        assert_eq!(store.list_ids().unwrap().len(), 50);
    }

    #[test]
    fn test_write_atomic_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vault.json");

        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"secure_delete\":false}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{\"secure_delete\":false}");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, false).unwrap();
        let loc = store.location_for("ghost").unwrap();

        assert!(matches!(store.read(&loc), Err(StorageError::NotFound(_))));
    }

    #[test]
    fn test_path_like_ids_rejected() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, false).unwrap();

        for id in ["", "../escape", "a/b", "a.b", "with space"] {
            assert!(
                matches!(store.write(id, b"x"), Err(StorageError::InvalidId(_))),
                "id {:?} accepted",
                id
            );
        }
    }

    #[test]
    fn test_delete_all_keeps_unrelated_files_and_sweeps_temps() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, true).unwrap();

        store.write("a", b"1").unwrap();
        store.write("b", b"2").unwrap();
        fs::write(dir.path().join("c.enc.5f0c2a.tmp"), b"partial").unwrap();
        fs::write(dir.path().join("notes.txt"), b"keep me").unwrap();

        assert_eq!(store.delete_all().unwrap(), 2);
        assert!(store.list_ids().unwrap().is_empty());
        assert!(!dir.path().join("c.enc.5f0c2a.tmp").exists());
        assert!(dir.path().join("notes.txt").exists());
    }

    #[test]
    fn test_delete_all_attempts_every_blob() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, true).unwrap();

        store.write("a", b"1").unwrap();
        store.write("b", b"2").unwrap();
        // A directory with a blob name cannot be removed with remove_file
        fs::create_dir(dir.path().join("stuck.enc")).unwrap();

        match store.delete_all() {
            Err(StorageError::PartialDeletion { failed }) => {
                assert_eq!(failed, vec!["stuck".to_string()]);
            }
            other => panic!("expected partial deletion, got {:?}", other),
        }

        assert!(!store.exists("a"));
        assert!(!store.exists("b"));
    }

    #[test]
    fn test_list_ids_sorted() {
        let dir = tempdir().unwrap();
        let store = BlobStore::open(dir.path(), DEFAULT_EXTENSION, false).unwrap();

        store.write("b", b"2").unwrap();
        store.write("a", b"1").unwrap();

        assert_eq!(store.list_ids().unwrap(), vec!["a", "b"]);
    }
}
