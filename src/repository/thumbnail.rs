//! Thumbnail records keyed by content hash

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};

use super::delete_not_in;
use crate::hash::ContentHash;
use crate::models::ThumbnailDescriptor;

pub struct ThumbnailRepository<'c> {
    conn: &'c Connection,
}

impl<'c> ThumbnailRepository<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub fn exists(&self, hash: &ContentHash) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM thumbnail WHERE hash = ?1)",
            params![&hash.as_bytes()[..]],
            |row| row.get(0),
        )
    }

    /// Insert the thumbnail of `hash`; an existing record wins
    pub fn insert(&self, hash: &ContentHash, thumbnail: &ThumbnailDescriptor) -> SqliteResult<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO thumbnail (hash, file_offset, file_length, mime_type)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                &hash.as_bytes()[..],
                thumbnail.offset as i64,
                thumbnail.length as i64,
                thumbnail.mime_type,
            ],
        )?;
        Ok(inserted > 0)
    }

    pub fn find(&self, hash: &ContentHash) -> SqliteResult<Option<ThumbnailDescriptor>> {
        self.conn
            .query_row(
                "SELECT file_offset, file_length, mime_type FROM thumbnail WHERE hash = ?1",
                params![&hash.as_bytes()[..]],
                |row| {
                    Ok(ThumbnailDescriptor {
                        offset: row.get::<_, i64>(0)? as u64,
                        length: row.get::<_, i64>(1)? as u64,
                        mime_type: row.get(2)?,
                    })
                },
            )
            .optional()
    }

    pub fn count(&self) -> SqliteResult<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM thumbnail", [], |row| row.get(0))
    }

    /// Delete thumbnails whose hash is not in `keep`
    pub fn retain_hashes<'h>(
        &self,
        keep: impl IntoIterator<Item = &'h ContentHash>,
    ) -> SqliteResult<usize> {
        delete_not_in(
            self.conn,
            "thumbnail",
            "hash",
            keep.into_iter().map(|h| h.as_bytes().to_vec()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{hash, memory_db};

    fn descriptor(offset: u64) -> ThumbnailDescriptor {
        ThumbnailDescriptor {
            offset,
            length: 16,
            mime_type: Some("image/png".to_string()),
        }
    }

    #[test]
    fn test_insert_keeps_first_record() {
        let conn = memory_db();
        let repo = ThumbnailRepository::new(&conn);
        assert!(!repo.exists(&hash(1)).unwrap());

        assert!(repo.insert(&hash(1), &descriptor(100)).unwrap());
        assert!(!repo.insert(&hash(1), &descriptor(200)).unwrap());

        assert!(repo.exists(&hash(1)).unwrap());
        assert_eq!(repo.find(&hash(1)).unwrap(), Some(descriptor(100)));
        assert_eq!(repo.find(&hash(2)).unwrap(), None);
    }

    #[test]
    fn test_retain_hashes() {
        let conn = memory_db();
        let repo = ThumbnailRepository::new(&conn);
        repo.insert(&hash(1), &descriptor(1)).unwrap();
        repo.insert(&hash(2), &descriptor(2)).unwrap();

        assert_eq!(repo.retain_hashes([&hash(2)]).unwrap(), 1);
        assert_eq!(repo.count().unwrap(), 1);
        assert!(repo.exists(&hash(2)).unwrap());
    }
}
