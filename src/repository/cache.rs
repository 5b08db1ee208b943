//! Path-and-mtime keyed hash cache

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::{delete_not_in, hash_column};
use crate::hash::ContentHash;

/// Maps `(relative path, last modified)` to the content hash computed for it
pub struct CacheRepository<'c> {
    conn: &'c Connection,
}

impl<'c> CacheRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Cached hash for `path`, only when the stored mtime matches exactly
    pub fn find_hash(&self, path: &str, last_modified: i64) -> SqliteResult<Option<ContentHash>> {
        self.conn
            .query_row(
                "SELECT hash FROM file_cache WHERE path = ?1 AND last_modified = ?2",
                params![path, last_modified],
                |row| hash_column(row, 0),
            )
            .optional()
    }

    /// Record the hash of `path` at `last_modified`, replacing any older entry
    pub fn upsert_hash(&self, path: &str, last_modified: i64, hash: &ContentHash) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO file_cache (path, last_modified, hash) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET
                last_modified = excluded.last_modified,
                hash = excluded.hash",
            params![path, last_modified, &hash.as_bytes()[..]],
        )?;
        Ok(())
    }

    /// Drop entries whose hash is not in `keep`
    pub fn retain_hashes<'h>(
        &self,
        keep: impl IntoIterator<Item = &'h ContentHash>,
    ) -> SqliteResult<usize> {
        delete_not_in(
            self.conn,
            "file_cache",
            "hash",
            keep.into_iter().map(|h| h.as_bytes().to_vec()),
        )
    }

    pub fn count(&self) -> SqliteResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM file_cache", [], |row| row.get(0))
    }
}
