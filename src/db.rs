//! SQLite backing store
//!
//! The store keeps two connections to the same WAL-mode database file: one
//! reserved for scan passes and one for queries and favorite updates. A scan
//! pass runs inside a single transaction on the scan connection, so readers
//! only ever observe fully committed passes.

use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{LibraryError, LibraryErrorKind, Result};

/// Schema version written by this build. Any other version is recreated.
pub const SCHEMA_VERSION: i64 = 3;

const SCHEMA: &str = "
    CREATE TABLE version (version INTEGER NOT NULL);

    CREATE TABLE file_cache (
        path TEXT PRIMARY KEY,
        last_modified INTEGER NOT NULL,
        hash BLOB NOT NULL
    );

    CREATE TABLE model (
        path TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        last_modified INTEGER NOT NULL,
        hash BLOB NOT NULL
    );
    CREATE INDEX idx_model_name ON model(name);
    CREATE INDEX idx_model_last_modified ON model(last_modified);
    CREATE INDEX idx_model_hash ON model(hash);

    CREATE TABLE animation (
        path TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        last_modified INTEGER NOT NULL,
        hash BLOB NOT NULL
    );

    CREATE TABLE thumbnail (
        hash BLOB PRIMARY KEY,
        file_offset INTEGER NOT NULL,
        file_length INTEGER NOT NULL,
        mime_type TEXT
    );

    CREATE TABLE favorite (
        path TEXT PRIMARY KEY,
        favorited_at INTEGER NOT NULL
    );
    CREATE INDEX idx_favorite_favorited_at ON favorite(favorited_at DESC);
";

const DROP_ALL: &str = "
    DROP TABLE IF EXISTS version;
    DROP TABLE IF EXISTS file_cache;
    DROP TABLE IF EXISTS model;
    DROP TABLE IF EXISTS animation;
    DROP TABLE IF EXISTS thumbnail;
    DROP TABLE IF EXISTS favorite;
";

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Database manager for the library index
pub struct Database {
    path: PathBuf,
    scan: Mutex<Connection>,
    query: Mutex<Connection>,
}

impl Database {
    /// Open or create the store and bring its schema up to date
    pub fn open(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let scan = Connection::open(path)?;
        scan.busy_timeout(busy_timeout)?;
        let mode: String = scan.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        log::debug!("Opened {:?} in {} journal mode", path, mode);
        maintain_schema(&scan)?;

        let query = Connection::open(path)?;
        query.busy_timeout(busy_timeout)?;

        Ok(Self {
            path: path.to_path_buf(),
            scan: Mutex::new(scan),
            query: Mutex::new(query),
        })
    }

    /// Open the store, recreating it once if it cannot be opened.
    ///
    /// The unreadable file is moved to `backup` (or deleted when the move
    /// fails) before retrying. A second failure is unrecoverable.
    pub fn open_or_recover(path: &Path, backup: &Path, busy_timeout: Duration) -> Result<Self> {
        match Self::open(path, busy_timeout) {
            Ok(db) => Ok(db),
            Err(e) => {
                log::warn!("Failed to open database {:?}, backup and recreate: {}", path, e);
                if let Err(move_err) = std::fs::rename(path, backup) {
                    log::warn!("Failed to backup database file: {}", move_err);
                    if let Err(remove_err) = std::fs::remove_file(path) {
                        log::warn!("Failed to remove database file: {}", remove_err);
                    }
                }
                remove_sidecars(path);
                Self::open(path, busy_timeout).map_err(|e| {
                    LibraryError::new(
                        LibraryErrorKind::StoreUnrecoverable,
                        Some(path.to_path_buf()),
                        format!("Failed to recreate database: {}", e.message),
                    )
                })
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a read-only query or an independent write on the query connection
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = lock(&self.query);
        Ok(f(&conn)?)
    }

    /// Run `f` inside its own transaction on the query connection
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let mut conn = lock(&self.query);
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Begin the transaction a scan pass runs in
    pub fn begin_scan(&self) -> Result<ScanTransaction<'_>> {
        lock(&self.scan).execute_batch("BEGIN IMMEDIATE")?;
        Ok(ScanTransaction {
            conn: &self.scan,
            finished: false,
        })
    }
}

/// WAL and shared-memory files belong to the database they sit next to
fn remove_sidecars(path: &Path) {
    for suffix in ["-wal", "-shm"] {
        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(sidecar));
    }
}

/// Read the schema version, `None` when the store has no version table
fn read_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'version'",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(None);
    }
    conn.query_row("SELECT version FROM version", [], |row| row.get(0))
        .optional()
}

/// Recreate every table unless the store is already at [`SCHEMA_VERSION`]
pub(crate) fn maintain_schema(conn: &Connection) -> rusqlite::Result<()> {
    match read_version(conn)? {
        Some(SCHEMA_VERSION) => {
            log::info!("Schema is up-to-date (v{})", SCHEMA_VERSION);
        }
        current => {
            log::info!(
                "No valid schema or unsupported version ({:?}), recreating tables at v{}",
                current,
                SCHEMA_VERSION
            );
            conn.execute_batch(&format!(
                "BEGIN; {DROP_ALL} {SCHEMA} INSERT INTO version(version) VALUES ({SCHEMA_VERSION}); COMMIT;"
            ))?;
        }
    }
    Ok(())
}

/// The single transaction a scan pass runs in.
///
/// Per-file workers share it by reference; each repository call holds the
/// connection only for the duration of that call. Dropping the transaction
/// without [`commit`](Self::commit) rolls the whole pass back.
pub struct ScanTransaction<'db> {
    conn: &'db Mutex<Connection>,
    finished: bool,
}

impl ScanTransaction<'_> {
    /// Run one repository call against the pass
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = lock(self.conn);
        Ok(f(&conn)?)
    }

    /// Commit the pass. On failure the transaction is still rolled back on drop.
    pub fn commit(mut self) -> Result<()> {
        let committed = lock(self.conn).execute_batch("COMMIT");
        committed?;
        self.finished = true;
        Ok(())
    }
}

impl Drop for ScanTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = lock(self.conn).execute_batch("ROLLBACK") {
                log::error!("Failed to roll back scan transaction: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> Database {
        Database::open(&dir.join("library.db"), Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_schema_created_once() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        let version = db.read(|conn| read_version(conn)).unwrap();
        assert_eq!(version, Some(SCHEMA_VERSION));

        db.write(|conn| {
            conn.execute(
                "INSERT INTO favorite(path, favorited_at) VALUES ('a.vrm', 1)",
                [],
            )
        })
        .unwrap();
        drop(db);

        // Reopening an up-to-date store keeps its rows
        let db = open(dir.path());
        let count: i64 = db
            .read(|conn| conn.query_row("SELECT COUNT(*) FROM favorite", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_old_version_is_recreated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("library.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE version (version INTEGER); INSERT INTO version VALUES (1);
                 CREATE TABLE model (path TEXT PRIMARY KEY, legacy INTEGER);",
            )
            .unwrap();
        }
        let db = Database::open(&path, Duration::from_millis(500)).unwrap();
        let columns: i64 = db
            .read(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM pragma_table_info('model') WHERE name = 'hash'",
                    [],
                    |r| r.get(0),
                )
            })
            .unwrap();
        assert_eq!(columns, 1);
    }

    #[test]
    fn test_corrupt_store_is_backed_up_and_recreated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".cache.db");
        let backup = dir.path().join(".cache-backup.db");
        std::fs::write(&path, vec![0x5a; 4096]).unwrap();

        let db = Database::open_or_recover(&path, &backup, Duration::from_millis(500)).unwrap();
        assert!(backup.exists());
        assert_eq!(db.read(|conn| read_version(conn)).unwrap(), Some(SCHEMA_VERSION));
    }

    #[test]
    fn test_uncommitted_scan_is_invisible_and_rolled_back() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        let count_models = |db: &Database| -> i64 {
            db.read(|conn| conn.query_row("SELECT COUNT(*) FROM model", [], |r| r.get(0)))
                .unwrap()
        };

        let tx = db.begin_scan().unwrap();
        tx.with(|conn| {
            conn.execute(
                "INSERT INTO model(path, name, last_modified, hash) VALUES ('a.vrm', 'a.vrm', 1, x'00')",
                [],
            )
        })
        .unwrap();
        assert_eq!(count_models(&db), 0);
        drop(tx);
        assert_eq!(count_models(&db), 0);

        let tx = db.begin_scan().unwrap();
        tx.with(|conn| {
            conn.execute(
                "INSERT INTO model(path, name, last_modified, hash) VALUES ('a.vrm', 'a.vrm', 1, x'00')",
                [],
            )
        })
        .unwrap();
        tx.commit().unwrap();
        assert_eq!(count_models(&db), 1);
    }

    #[test]
    fn test_failed_commit_leaves_store_usable() {
        let dir = tempdir().unwrap();
        let db = open(dir.path());
        lock(&db.scan)
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE parent (id INTEGER PRIMARY KEY);
                 CREATE TABLE child (
                     parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
                 );",
            )
            .unwrap();

        // Deferred constraints are only checked by COMMIT
        let tx = db.begin_scan().unwrap();
        tx.with(|conn| conn.execute("INSERT INTO child(parent_id) VALUES (42)", []))
            .unwrap();
        assert!(tx.commit().is_err());

        let tx = db.begin_scan().unwrap();
        let children: i64 = tx
            .with(|conn| conn.query_row("SELECT COUNT(*) FROM child", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(children, 0);
        tx.commit().unwrap();
    }
}
