//! Favorite records
//!
//! Favorites are keyed by model path without a foreign key, so they survive a
//! model disappearing for a pass. Listings only include favorites whose model
//! is currently recorded.

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::model::model_from_row;
use crate::models::ModelItem;

pub struct FavoriteRepository<'c> {
    conn: &'c Connection,
}

impl<'c> FavoriteRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Add or remove a favorite. Re-adding keeps the original timestamp.
    ///
    /// Returns whether anything changed.
    pub fn set_favorite(&self, path: &str, favorite: bool, now_ms: i64) -> SqliteResult<bool> {
        let changed = if favorite {
            self.conn.execute(
                "INSERT INTO favorite (path, favorited_at) VALUES (?1, ?2)
                 ON CONFLICT(path) DO NOTHING",
                params![path, now_ms],
            )?
        } else {
            self.conn
                .execute("DELETE FROM favorite WHERE path = ?1", params![path])?
        };
        Ok(changed > 0)
    }

    /// Favorited models, most recently favorited first
    pub fn find_all(&self) -> SqliteResult<Vec<ModelItem>> {
        let mut stmt = self.conn.prepare(
            "SELECT m.path, m.name, m.last_modified, m.hash, 1
             FROM favorite f
             JOIN model m ON m.path = f.path
             ORDER BY f.favorited_at DESC, m.path",
        )?;
        let rows = stmt.query_map([], model_from_row)?;
        rows.collect()
    }

    pub fn count(&self) -> SqliteResult<u64> {
        self.conn.query_row(
            "SELECT COUNT(*) FROM favorite f JOIN model m ON m.path = f.path",
            [],
            |row| row.get(0),
        )
    }

    /// Zero-based position of `path` in [`find_all`](Self::find_all)
    pub fn rank_index(&self, path: &str) -> SqliteResult<Option<u64>> {
        self.conn
            .query_row(
                "SELECT rank FROM (
                    SELECT f.path,
                           ROW_NUMBER() OVER (ORDER BY f.favorited_at DESC, m.path) - 1 AS rank
                    FROM favorite f
                    JOIN model m ON m.path = f.path
                 ) WHERE path = ?1",
                params![path],
                |row| row.get(0),
            )
            .optional()
    }
}
