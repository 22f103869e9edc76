//! PhotoSafe Vault - Photo Metadata Store
//!
//! SQLite (WAL) index of photo records. Writes go through one writer
//! connection, reads through a separate reader connection; each sits behind
//! its own mutex. Field edits update single columns, so concurrent edits of
//! different fields both survive and edits of the same field are
//! last-writer-wins.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::crypto::KeyId;
use crate::error::{MetadataError, MetadataResult};

const SCHEMA_VERSION: i64 = 1;

const EVENT_CAPACITY: usize = 64;

const RECORD_COLUMNS: &str =
    "id, blob_path, encapsulated_key, suite, recipient_key_id, size, title, created_at";

/// Metadata for one stored photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoRecord {
    /// Unique identifier
    pub id: String,
    /// Encrypted blob location
    pub blob_path: Option<PathBuf>,
    /// KEM output needed to open the blob
    pub encapsulated_key: Vec<u8>,
    /// Ciphersuite id the blob was sealed under
    pub suite: u16,
    /// Fingerprint of the public key the blob was sealed to
    pub recipient_key_id: KeyId,
    /// Plaintext size in bytes
    pub size: u64,
    /// User tags, insertion ordered, no duplicates
    pub tags: Vec<String>,
    /// Optional user title
    pub title: Option<String>,
    /// Creation time (microsecond precision)
    pub created_at: DateTime<Utc>,
}

/// Change notification emitted after each commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEvent {
    Inserted(String),
    Updated(String),
    Deleted(String),
    Cleared,
}

/// Trim, drop empties and de-duplicate while keeping first occurrence order
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && seen.insert(tag.to_string()) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Current time truncated to what the store persists
pub fn now_utc() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// SQLite-backed record store
pub struct MetadataStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    path: PathBuf,
    events: broadcast::Sender<MetadataEvent>,
}

impl MetadataStore {
    /// Open (creating if needed) the database at `db_path`
    pub fn open(db_path: &Path) -> MetadataResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MetadataError::PersistenceFailed(format!("cannot create {}: {}", parent.display(), e))
            })?;
        }

        let writer = Connection::open(db_path)?;
        writer.busy_timeout(Duration::from_secs(5))?;
        let _mode: String = writer.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        writer.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            PRAGMA synchronous = NORMAL;

            CREATE TABLE IF NOT EXISTS photos (
                id TEXT PRIMARY KEY,
                blob_path TEXT,
                encapsulated_key BLOB NOT NULL,
                suite INTEGER NOT NULL,
                recipient_key_id BLOB NOT NULL,
                size INTEGER NOT NULL,
                title TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS photo_tags (
                photo_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                tag TEXT NOT NULL,
                PRIMARY KEY (photo_id, tag),
                FOREIGN KEY (photo_id) REFERENCES photos(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_photo_tags_tag ON photo_tags(tag);
            CREATE INDEX IF NOT EXISTS idx_photos_created ON photos(created_at);
            "#,
        )?;

        let version: i64 = writer.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version == 0 {
            writer.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION))?;
        } else if version > SCHEMA_VERSION {
            return Err(MetadataError::Corrupted(format!(
                "database schema version {} is newer than supported {}",
                version, SCHEMA_VERSION
            )));
        }

        let reader = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(Duration::from_secs(5))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        log::info!("Opened metadata store at {}", db_path.display());
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
            path: db_path.to_path_buf(),
            events,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Receive change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<MetadataEvent> {
        self.events.subscribe()
    }

    // ═══════════════════════════════════════════════════════════════
    // WRITES
    // ═══════════════════════════════════════════════════════════════

    /// Insert a new record; fails if the id is taken
    pub fn insert(&self, record: &PhotoRecord) -> MetadataResult<()> {
        {
            let mut conn = self.writer.lock();
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO photos (id, blob_path, encapsulated_key, suite, recipient_key_id, size, title, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.id,
                    record
                        .blob_path
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned()),
                    record.encapsulated_key,
                    i64::from(record.suite),
                    &record.recipient_key_id.as_bytes()[..],
                    record.size as i64,
                    record.title,
                    format_time(&record.created_at),
                ],
            )
            .map_err(|e| match MetadataError::from(e) {
                MetadataError::ConstraintViolation(_) => {
                    MetadataError::ConstraintViolation(record.id.clone())
                }
                other => other,
            })?;

            insert_tags(&tx, &record.id, &record.tags)?;
            tx.commit()?;
        }

        log::debug!("Inserted record {}", record.id);
        self.notify(MetadataEvent::Inserted(record.id.clone()));
        Ok(())
    }

    /// Replace the tag list of a record
    pub fn set_tags(&self, id: &str, tags: &[String]) -> MetadataResult<Vec<String>> {
        let tags = normalize_tags(tags);
        {
            let mut conn = self.writer.lock();
            let tx = conn.transaction()?;

            let exists: Option<i64> = tx
                .query_row("SELECT 1 FROM photos WHERE id = ?1", params![id], |row| row.get(0))
                .optional()?;
            if exists.is_none() {
                return Err(MetadataError::NotFound(id.to_string()));
            }

            tx.execute("DELETE FROM photo_tags WHERE photo_id = ?1", params![id])?;
            insert_tags(&tx, id, &tags)?;
            tx.commit()?;
        }

        self.notify(MetadataEvent::Updated(id.to_string()));
        Ok(tags)
    }

    /// Set or clear the title of a record
    pub fn set_title(&self, id: &str, title: Option<&str>) -> MetadataResult<()> {
        let changed = self
            .writer
            .lock()
            .execute("UPDATE photos SET title = ?2 WHERE id = ?1", params![id, title])?;
        if changed == 0 {
            return Err(MetadataError::NotFound(id.to_string()));
        }

        self.notify(MetadataEvent::Updated(id.to_string()));
        Ok(())
    }

    /// Delete one record. Returns `false` if it did not exist.
    pub fn delete(&self, id: &str) -> MetadataResult<bool> {
        let removed = {
            let mut conn = self.writer.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM photo_tags WHERE photo_id = ?1", params![id])?;
            let removed = tx.execute("DELETE FROM photos WHERE id = ?1", params![id])?;
            tx.commit()?;
            removed > 0
        };

        if removed {
            self.notify(MetadataEvent::Deleted(id.to_string()));
        }
        Ok(removed)
    }

    /// Delete every record in one transaction; nothing is removed on failure
    pub fn delete_all(&self) -> MetadataResult<usize> {
        let removed = {
            let mut conn = self.writer.lock();
            let tx = conn.transaction().map_err(persistence)?;
            tx.execute("DELETE FROM photo_tags", []).map_err(persistence)?;
            let removed = tx.execute("DELETE FROM photos", []).map_err(persistence)?;
            tx.commit().map_err(persistence)?;
            removed
        };

        log::info!("Deleted {} metadata record(s)", removed);
        self.notify(MetadataEvent::Cleared);
        Ok(removed)
    }

    // ═══════════════════════════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════════════════════════

    /// Fetch one record
    pub fn get(&self, id: &str) -> MetadataResult<PhotoRecord> {
        let mut conn = self.reader.lock();
        let tx = conn.transaction()?;
        load_records(&tx, "WHERE id = ?1", params![id])?
            .pop()
            .ok_or_else(|| MetadataError::NotFound(id.to_string()))
    }

    /// Whether a record with `id` exists
    pub fn contains(&self, id: &str) -> MetadataResult<bool> {
        let conn = self.reader.lock();
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM photos WHERE id = ?1", params![id], |row| row.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// All records, newest first, ties by id
    pub fn list(&self) -> MetadataResult<Vec<PhotoRecord>> {
        let mut conn = self.reader.lock();
        let tx = conn.transaction()?;
        load_records(&tx, "", params![])
    }

    /// Records carrying `tag`, same order as [`list`](Self::list)
    pub fn search_by_tag(&self, tag: &str) -> MetadataResult<Vec<PhotoRecord>> {
        let tag = tag.trim();
        let mut conn = self.reader.lock();
        let tx = conn.transaction()?;
        load_records(
            &tx,
            "WHERE id IN (SELECT photo_id FROM photo_tags WHERE tag = ?1)",
            params![tag],
        )
    }

    /// Number of records
    pub fn count(&self) -> MetadataResult<usize> {
        let conn = self.reader.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Every record id
    pub fn ids(&self) -> MetadataResult<HashSet<String>> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare("SELECT id FROM photos")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    fn notify(&self, event: MetadataEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

fn persistence(e: rusqlite::Error) -> MetadataError {
    MetadataError::PersistenceFailed(e.to_string())
}

fn insert_tags(conn: &Connection, id: &str, tags: &[String]) -> MetadataResult<()> {
    let mut stmt =
        conn.prepare_cached("INSERT INTO photo_tags (photo_id, position, tag) VALUES (?1, ?2, ?3)")?;
    for (position, tag) in tags.iter().enumerate() {
        stmt.execute(params![id, position as i64, tag])?;
    }
    Ok(())
}

fn format_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Raw row before tags are attached
struct RecordRow {
    id: String,
    blob_path: Option<String>,
    encapsulated_key: Vec<u8>,
    suite: i64,
    recipient_key_id: Vec<u8>,
    size: i64,
    title: Option<String>,
    created_at: String,
}

impl RecordRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            blob_path: row.get(1)?,
            encapsulated_key: row.get(2)?,
            suite: row.get(3)?,
            recipient_key_id: row.get(4)?,
            size: row.get(5)?,
            title: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_record(self, tags: Vec<String>) -> MetadataResult<PhotoRecord> {
        let suite = u16::try_from(self.suite)
            .map_err(|_| MetadataError::Corrupted(format!("{}: suite {}", self.id, self.suite)))?;
        let recipient_key_id = KeyId::from_slice(&self.recipient_key_id)
            .ok_or_else(|| MetadataError::Corrupted(format!("{}: recipient key id", self.id)))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| MetadataError::Corrupted(format!("{}: created_at {}", self.id, e)))?
            .with_timezone(&Utc);

        Ok(PhotoRecord {
            id: self.id,
            blob_path: self.blob_path.map(PathBuf::from),
            encapsulated_key: self.encapsulated_key,
            suite,
            recipient_key_id,
            size: self.size.max(0) as u64,
            tags,
            title: self.title,
            created_at,
        })
    }
}

fn load_records(
    conn: &Connection,
    filter: &str,
    args: &[&dyn ToSql],
) -> MetadataResult<Vec<PhotoRecord>> {
    let sql = format!(
        "SELECT {} FROM photos {} ORDER BY created_at DESC, id ASC",
        RECORD_COLUMNS, filter
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(args, RecordRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let mut tag_stmt =
        conn.prepare_cached("SELECT tag FROM photo_tags WHERE photo_id = ?1 ORDER BY position")?;

    let mut records = Vec::with_capacity(rows.len());
    for row in rows {
        let tags = tag_stmt
            .query_map(params![row.id], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        records.push(row.into_record(tags)?);
    }
    Ok(records)
}
