//! Animation records

use rusqlite::{params, Connection, Result as SqliteResult};

use super::{delete_not_in, hash_column};
use crate::hash::ContentHash;
use crate::models::AnimationItem;

pub struct AnimationRepository<'c> {
    conn: &'c Connection,
}

impl<'c> AnimationRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(
        &self,
        path: &str,
        name: &str,
        last_modified: i64,
        hash: &ContentHash,
    ) -> SqliteResult<()> {
        self.conn.execute(
            "INSERT INTO animation (path, name, last_modified, hash) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                last_modified = excluded.last_modified,
                hash = excluded.hash",
            params![path, name, last_modified, &hash.as_bytes()[..]],
        )?;
        Ok(())
    }

    /// All animations ordered by path
    pub fn find_all(&self) -> SqliteResult<Vec<AnimationItem>> {
        let mut stmt = self
            .conn
            .prepare("SELECT path, name, last_modified, hash FROM animation ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            Ok(AnimationItem {
                path: row.get(0)?,
                name: row.get(1)?,
                last_modified: row.get(2)?,
                hash: hash_column(row, 3)?,
            })
        })?;
        rows.collect()
    }

    pub fn count(&self) -> SqliteResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM animation", [], |row| row.get(0))
    }

    /// Delete animations whose path is not in `keep`
    pub fn retain_paths<'p>(&self, keep: impl IntoIterator<Item = &'p str>) -> SqliteResult<usize> {
        delete_not_in(self.conn, "animation", "path", keep)
    }
}
