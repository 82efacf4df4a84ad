//! Byte-level storage backing the disk tier: one `detailed` row per key in an
//! embedded SQLite database, plus sidecar files for entries above the inline
//! threshold.
//!
//! Keeps one persistent connection open and caches prepared statements instead of
//! opening a fresh `Connection` per call — `rusqlite::Connection::prepare_cached`
//! already caches by SQL text and resets statements on reuse.
//!
//! Takes `dir` as the already-resolved `<root>/diskcache.<app_id>/` directory (see
//! [`crate::config::TierCacheConfig::cache_dir`]) and places both the database and
//! the sidecar files directly inside it, so the cache folder name is appended to
//! the root path exactly once.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::warn;

use crate::error::CacheError;

const DB_FILENAME: &str = "diskcache.sqlite";
const CLOSE_RETRY_ATTEMPTS: usize = 8;

/// One row as returned by [`DiskStore::oldest_items`], used for cost/count trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OldestItem {
    pub key: String,
    pub filename: Option<String>,
    pub size: i64,
}

/// Owns the sidecar directory and the embedded database.
///
/// Every public method returns `Result<_, CacheError>`; nothing panics on a
/// recoverable I/O or SQL failure. Callers (`DiskTier`) are responsible for logging
/// and swallowing these so no error crosses the public cache API — `DiskStore`
/// itself only guarantees it never corrupts its own on-disk state.
pub struct DiskStore {
    dir: PathBuf,
    conn: Connection,
}

impl DiskStore {
    /// Opens (creating if necessary) the store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        fs::create_dir_all(dir)?;
        let conn = Self::open_connection(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            conn,
        })
    }

    fn open_connection(dir: &Path) -> Result<Connection, CacheError> {
        let conn = Connection::open(dir.join(DB_FILENAME))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&conn)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS detailed(
                key TEXT PRIMARY KEY,
                filename TEXT,
                inline_data BLOB,
                size INTEGER NOT NULL,
                last_access_time INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_detailed_last_access
                ON detailed(last_access_time);",
        )?;
        Ok(())
    }

    /// Writes `bytes` for `key`. When `inline_filename` is `Some`, the bytes are
    /// written to that sidecar file before the row is upserted with
    /// `filename = inline_filename`; a file-write failure aborts without touching
    /// the row, and a row-write failure deletes the just-written file. When `None`,
    /// any existing sidecar file for `key` is deleted first and the row is upserted
    /// with the bytes stored inline.
    pub fn write(
        &self,
        key: &str,
        bytes: &[u8],
        inline_filename: Option<&str>,
    ) -> Result<(), CacheError> {
        let now = now_secs();
        let size = bytes.len() as i64;

        match inline_filename {
            Some(filename) => {
                let path = self.dir.join(filename);
                fs::write(&path, bytes)?;
                if let Err(e) = self.upsert_row(key, Some(filename), None, size, now) {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
            }
            None => {
                if let Some(old_filename) = self.filename_for(key)? {
                    let _ = fs::remove_file(self.dir.join(&old_filename));
                }
                self.upsert_row(key, None, Some(bytes), size, now)?;
            }
        }
        Ok(())
    }

    fn upsert_row(
        &self,
        key: &str,
        filename: Option<&str>,
        inline_data: Option<&[u8]>,
        size: i64,
        now: i64,
    ) -> Result<(), CacheError> {
        self.conn
            .prepare_cached(
                "INSERT INTO detailed(key, filename, inline_data, size, last_access_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                     filename = excluded.filename,
                     inline_data = excluded.inline_data,
                     size = excluded.size,
                     last_access_time = excluded.last_access_time",
            )?
            .execute(params![key, filename, inline_data, size, now])?;
        Ok(())
    }

    /// Reads the bytes stored for `key`, bumping `last_access_time` to now. Returns
    /// `None` when no row matches. The row's `size` is authoritative for
    /// sidecar-backed entries; this store trusts it over the file's actual length.
    pub fn read(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = now_secs();
        let row: Option<(Option<String>, Option<Vec<u8>>)> = self
            .conn
            .prepare_cached("SELECT filename, inline_data FROM detailed WHERE key = ?1")?
            .query_row(params![key], |row| Ok((row.get(0)?, row.get(1)?)))
            .optional()?;

        let Some((filename, inline_data)) = row else {
            return Ok(None);
        };

        self.conn
            .prepare_cached("UPDATE detailed SET last_access_time = ?1 WHERE key = ?2")?
            .execute(params![now, key])?;

        match filename {
            Some(filename) => Ok(Some(fs::read(self.dir.join(filename))?)),
            None => Ok(inline_data),
        }
    }

    /// Whether a row exists for `key`.
    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let count: i64 = self
            .conn
            .prepare_cached("SELECT count(key) FROM detailed WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// The sidecar filename for `key`, if the entry is stored as a file.
    pub fn filename_for(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self
            .conn
            .prepare_cached("SELECT filename FROM detailed WHERE key = ?1")?
            .query_row(params![key], |row| row.get(0))
            .optional()?
            .flatten())
    }

    /// Deletes the sidecar file (if any) and the row for `key`.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        if let Some(filename) = self.filename_for(key)? {
            if let Err(e) = fs::remove_file(self.dir.join(&filename)) {
                warn!(filename, error = %e, "failed to remove sidecar file");
            }
        }
        self.conn
            .prepare_cached("DELETE FROM detailed WHERE key = ?1")?
            .execute(params![key])?;
        Ok(())
    }

    /// Removes a sidecar file by name, without touching any row. Used by
    /// [`crate::disk::tier::DiskTier::remove_expired`], which must delete the files
    /// listed by [`DiskStore::expired_filenames`] before deleting the rows.
    pub fn remove_sidecar_file(&self, filename: &str) -> Result<(), CacheError> {
        fs::remove_file(self.dir.join(filename))?;
        Ok(())
    }

    /// Clears the prepared-statement cache, closes the database, deletes the
    /// database file and its WAL/SHM/journal siblings, deletes and recreates the
    /// sidecar directory, then reopens with a fresh schema.
    pub fn remove_all(&mut self) -> Result<(), CacheError> {
        let old = std::mem::replace(&mut self.conn, Connection::open_in_memory()?);
        Self::close_with_retry(old)?;

        let db_path = self.dir.join(DB_FILENAME);
        for suffix in ["", "-wal", "-shm", "-journal"] {
            let _ = fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        fs::create_dir_all(&self.dir)?;

        self.conn = Self::open_connection(&self.dir)?;
        Ok(())
    }

    /// Finalizes every live statement and retries `Connection::close` until it
    /// succeeds or a bounded number of attempts is exhausted, falling back to
    /// `CacheError::Transient` rather than retrying unboundedly and potentially
    /// hanging a maintenance tick indefinitely.
    fn close_with_retry(mut conn: Connection) -> Result<(), CacheError> {
        for _ in 0..CLOSE_RETRY_ATTEMPTS {
            conn.flush_prepared_statement_cache();
            match conn.close() {
                Ok(()) => return Ok(()),
                Err((returned, _err)) => conn = returned,
            }
        }
        Err(CacheError::Transient)
    }

    /// Sidecar filenames for every row whose `last_access_time` is older than
    /// `cutoff`. The caller removes these files before calling
    /// [`DiskStore::delete_expired`].
    pub fn expired_filenames(&self, cutoff: i64) -> Result<Vec<String>, CacheError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT filename FROM detailed
             WHERE last_access_time < ?1 AND filename IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Deletes every row whose `last_access_time` is older than `cutoff`. Returns
    /// whether anything was deleted. Sidecar files must already have been removed by
    /// the caller via [`DiskStore::expired_filenames`].
    pub fn delete_expired(&self, cutoff: i64) -> Result<bool, CacheError> {
        let deleted = self
            .conn
            .prepare_cached("DELETE FROM detailed WHERE last_access_time < ?1")?
            .execute(params![cutoff])?;
        Ok(deleted > 0)
    }

    /// The `limit` least-recently-accessed rows, used for size/count trimming.
    pub fn oldest_items(&self, limit: usize) -> Result<Vec<OldestItem>, CacheError> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT key, filename, size FROM detailed ORDER BY last_access_time ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(OldestItem {
                key: row.get(0)?,
                filename: row.get(1)?,
                size: row.get(2)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Sum of `size` across every resident row.
    pub fn total_size(&self) -> Result<i64, CacheError> {
        Ok(self.conn.prepare_cached("SELECT COALESCE(SUM(size), 0) FROM detailed")?.query_row(
            [],
            |row| row.get(0),
        )?)
    }

    /// Number of resident rows.
    pub fn total_count(&self) -> Result<i64, CacheError> {
        Ok(self
            .conn
            .prepare_cached("SELECT COUNT(*) FROM detailed")?
            .query_row([], |row| row.get(0))?)
    }

    /// Flushes the WAL into the main database file. Called after bulk deletions so
    /// disk usage reflects the trim immediately rather than waiting for SQLite's own
    /// checkpoint heuristics.
    pub fn checkpoint(&self) -> Result<(), CacheError> {
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, DiskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn inline_write_then_read_round_trips() {
        let (_dir, store) = store();
        store.write("a", b"hello", None).unwrap();
        assert_eq!(store.read("a").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(store.filename_for("a").unwrap(), None);
        assert!(store.contains("a").unwrap());
    }

    #[test]
    fn sidecar_write_creates_file_of_matching_length() {
        let (dir, store) = store();
        let payload = vec![7u8; 40 * 1024];
        store.write("big", &payload, Some("big.bin")).unwrap();
        assert_eq!(store.filename_for("big").unwrap().as_deref(), Some("big.bin"));
        let on_disk = fs::metadata(dir.path().join("big.bin")).unwrap();
        assert_eq!(on_disk.len(), payload.len() as u64);
        assert_eq!(store.read("big").unwrap(), Some(payload));
    }

    #[test]
    fn switching_from_sidecar_to_inline_removes_old_file() {
        let (dir, store) = store();
        store.write("k", b"big-ish", Some("k.bin")).unwrap();
        assert!(dir.path().join("k.bin").exists());
        store.write("k", b"small", None).unwrap();
        assert!(!dir.path().join("k.bin").exists());
        assert_eq!(store.read("k").unwrap(), Some(b"small".to_vec()));
    }

    #[test]
    fn remove_deletes_row_and_sidecar_file() {
        let (dir, store) = store();
        store.write("k", b"data", Some("k.bin")).unwrap();
        store.remove("k").unwrap();
        assert!(!store.contains("k").unwrap());
        assert!(!dir.path().join("k.bin").exists());
    }

    #[test]
    fn oldest_items_orders_by_last_access_ascending() {
        let (_dir, store) = store();
        store.write("a", b"1", None).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        store.write("b", b"2", None).unwrap();
        let oldest = store.oldest_items(16).unwrap();
        assert_eq!(oldest.first().map(|i| i.key.as_str()), Some("a"));
    }

    #[test]
    fn delete_expired_removes_old_rows_and_leaves_new_ones() {
        let (_dir, store) = store();
        store.write("old", b"1", None).unwrap();
        let cutoff = now_secs() + 10;
        store.write("new", b"2", None).unwrap();
        // force "new" to look fresh regardless of clock resolution
        store
            .upsert_row("new", None, Some(b"2"), 1, cutoff + 100)
            .unwrap();
        let expired = store.expired_filenames(cutoff).unwrap();
        assert!(expired.is_empty()); // neither row used a sidecar file
        store.delete_expired(cutoff).unwrap();
        assert!(!store.contains("old").unwrap());
        assert!(store.contains("new").unwrap());
    }

    #[test]
    fn total_size_and_count_reflect_resident_rows() {
        let (_dir, store) = store();
        store.write("a", b"123", None).unwrap();
        store.write("b", b"45", None).unwrap();
        assert_eq!(store.total_count().unwrap(), 2);
        assert_eq!(store.total_size().unwrap(), 5);
    }

    #[test]
    fn remove_all_wipes_rows_and_sidecar_files() {
        let (dir, mut store) = store();
        store.write("a", b"1", None).unwrap();
        store.write("big", b"2", Some("big.bin")).unwrap();
        store.remove_all().unwrap();
        assert_eq!(store.total_count().unwrap(), 0);
        assert!(!dir.path().join("big.bin").exists());
        // the store is still usable afterward
        store.write("c", b"3", None).unwrap();
        assert_eq!(store.read("c").unwrap(), Some(b"3".to_vec()));
    }

    #[test]
    fn checkpoint_does_not_error_on_empty_store() {
        let (_dir, store) = store();
        store.checkpoint().unwrap();
    }
}
