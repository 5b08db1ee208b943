//! Repositories over the backing store
//!
//! Each repository borrows a connection for the duration of its calls. Scan
//! passes hand them the pass transaction's connection through
//! [`ScanTransaction::with`](crate::db::ScanTransaction::with); queries use the
//! query connection.

mod animation;
mod cache;
mod favorite;
mod model;
mod thumbnail;

pub use animation::AnimationRepository;
pub use cache::CacheRepository;
pub use favorite::FavoriteRepository;
pub use model::ModelRepository;
pub use thumbnail::ThumbnailRepository;

use rusqlite::types::{ToSql, Type};
use rusqlite::{params, Connection, Row};

use crate::hash::ContentHash;

/// Read a hash column, rejecting blobs of the wrong length
pub(crate) fn hash_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<ContentHash> {
    let bytes: Vec<u8> = row.get(idx)?;
    ContentHash::from_slice(&bytes).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Blob,
            format!("expected a 32-byte hash, got {} bytes", bytes.len()).into(),
        )
    })
}

/// Delete every row of `table` whose `column` is not among `keep`.
///
/// The keys are loaded into a temporary membership table so the deletion is a
/// single statement regardless of how many rows survive.
pub(crate) fn delete_not_in<K, I>(
    conn: &Connection,
    table: &str,
    column: &str,
    keep: I,
) -> rusqlite::Result<usize>
where
    K: ToSql,
    I: IntoIterator<Item = K>,
{
    conn.execute_batch(
        "DROP TABLE IF EXISTS temp.retained;
         CREATE TEMP TABLE retained (key PRIMARY KEY);",
    )?;
    {
        let mut stmt = conn.prepare("INSERT OR IGNORE INTO temp.retained (key) VALUES (?1)")?;
        for key in keep {
            stmt.execute(params![key])?;
        }
    }
    let deleted = conn.execute(
        &format!(
            "DELETE FROM {table}
             WHERE NOT EXISTS (SELECT 1 FROM temp.retained r WHERE r.key = {table}.{column})"
        ),
        [],
    )?;
    conn.execute_batch("DROP TABLE temp.retained")?;
    Ok(deleted)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::hash::HASH_LEN;

    /// A fresh in-memory store with the library schema
    pub(crate) fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::maintain_schema(&conn).unwrap();
        conn
    }

    pub(crate) fn hash(byte: u8) -> ContentHash {
        ContentHash::new([byte; HASH_LEN])
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_delete_not_in_keeps_members_only() {
        let conn = memory_db();
        let repo = AnimationRepository::new(&conn);
        for path in ["a.vmd", "b.vmd", "c.vmd"] {
            repo.upsert(path, path, 1, &hash(1)).unwrap();
        }
        let deleted = delete_not_in(&conn, "animation", "path", ["a.vmd", "c.vmd"]).unwrap();
        assert_eq!(deleted, 1);
        let paths: Vec<_> = repo.find_all().unwrap().into_iter().map(|a| a.path).collect();
        assert_eq!(paths, vec!["a.vmd", "c.vmd"]);
    }

    #[test]
    fn test_delete_not_in_with_empty_set_clears_table() {
        let conn = memory_db();
        let repo = AnimationRepository::new(&conn);
        repo.upsert("a.vmd", "a.vmd", 1, &hash(1)).unwrap();
        let deleted = delete_not_in(&conn, "animation", "path", Vec::<String>::new()).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(repo.count().unwrap(), 0);
    }
}
