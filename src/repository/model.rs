//! Model records
//!
//! Listings put favorites first, most recently favorited first, followed by
//! the requested order. The path breaks ties so paging is stable.

use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult, Row};

use super::{delete_not_in, hash_column};
use crate::hash::ContentHash;
use crate::models::{ModelItem, ModelOrder, ModelQuery};

const SELECT_MODEL: &str = "
    SELECT m.path, m.name, m.last_modified, m.hash, f.favorited_at IS NOT NULL
    FROM model m
    LEFT JOIN favorite f ON f.path = m.path";

/// Matches every model when `?1` is NULL
const SEARCH_FILTER: &str = "(?1 IS NULL OR instr(lower(m.name), lower(?1)) > 0)";

/// Map a row selected with the model column list
pub(crate) fn model_from_row(row: &Row<'_>) -> SqliteResult<ModelItem> {
    Ok(ModelItem {
        path: row.get(0)?,
        name: row.get(1)?,
        last_modified: row.get(2)?,
        hash: hash_column(row, 3)?,
        favorite: row.get(4)?,
    })
}

/// Empty search strings match everything
fn search_term(search: Option<&str>) -> Option<&str> {
    search.filter(|s| !s.is_empty())
}

pub struct ModelRepository<'c> {
    conn: &'c Connection,
}

impl<'c> ModelRepository<'c> {
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
            "INSERT INTO model (path, name, last_modified, hash) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
                name = excluded.name,
                last_modified = excluded.last_modified,
                hash = excluded.hash",
            params![path, name, last_modified, &hash.as_bytes()[..]],
        )?;
        Ok(())
    }

    /// Whether a record for `path` with exactly this hash exists
    pub fn exists(&self, path: &str, hash: &ContentHash) -> SqliteResult<bool> {
        self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM model WHERE path = ?1 AND hash = ?2)",
            params![path, &hash.as_bytes()[..]],
            |row| row.get(0),
        )
    }

    /// Number of models whose name contains `search`, case-insensitively
    pub fn count(&self, search: Option<&str>) -> SqliteResult<u64> {
        self.conn.query_row(
            &format!("SELECT COUNT(*) FROM model m WHERE {SEARCH_FILTER}"),
            params![search_term(search)],
            |row| row.get(0),
        )
    }

    /// One page of the listing described by `query`
    pub fn find_range(&self, query: &ModelQuery) -> SqliteResult<Vec<ModelItem>> {
        let column = match query.order {
            ModelOrder::Name => "m.name",
            ModelOrder::LastModified => "m.last_modified",
        };
        let direction = if query.ascending { "ASC" } else { "DESC" };
        let sql = format!(
            "{SELECT_MODEL}
             WHERE {SEARCH_FILTER}
             ORDER BY f.favorited_at IS NULL, f.favorited_at DESC,
                      {column} {direction}, m.path {direction}
             LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                search_term(query.search.as_deref()),
                query.limit as i64,
                query.offset as i64
            ],
            model_from_row,
        )?;
        rows.collect()
    }

    pub fn find_by_path(&self, path: &str) -> SqliteResult<Option<ModelItem>> {
        self.conn
            .query_row(
                &format!("{SELECT_MODEL} WHERE m.path = ?1"),
                params![path],
                model_from_row,
            )
            .optional()
    }

    /// First model, by path, whose content hash is `hash`
    pub fn find_by_hash(&self, hash: &ContentHash) -> SqliteResult<Option<ModelItem>> {
        self.conn
            .query_row(
                &format!("{SELECT_MODEL} WHERE m.hash = ?1 ORDER BY m.path LIMIT 1"),
                params![&hash.as_bytes()[..]],
                model_from_row,
            )
            .optional()
    }

    /// Delete models whose path is not in `keep`
    pub fn retain_paths<'p>(&self, keep: impl IntoIterator<Item = &'p str>) -> SqliteResult<usize> {
        delete_not_in(self.conn, "model", "path", keep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_support::{hash, memory_db};
    use crate::repository::FavoriteRepository;

    fn seed(conn: &Connection) {
        let repo = ModelRepository::new(conn);
        repo.upsert("b/Miku.pmx", "Miku.pmx", 300, &hash(1)).unwrap();
        repo.upsert("alice.vrm", "alice.vrm", 100, &hash(2)).unwrap();
        repo.upsert("Carol.vrm", "Carol.vrm", 200, &hash(3)).unwrap();
        repo.upsert("pack", "pack", 50, &hash(2)).unwrap();
    }

    fn paths(items: &[ModelItem]) -> Vec<&str> {
        items.iter().map(|m| m.path.as_str()).collect()
    }

    #[test]
    fn test_exists_matches_path_and_hash() {
        let conn = memory_db();
        seed(&conn);
        let repo = ModelRepository::new(&conn);
        assert!(repo.exists("alice.vrm", &hash(2)).unwrap());
        assert!(!repo.exists("alice.vrm", &hash(3)).unwrap());
        assert!(!repo.exists("missing.vrm", &hash(2)).unwrap());
    }

    #[test]
    fn test_find_range_orders_and_pages() {
        let conn = memory_db();
        seed(&conn);
        let repo = ModelRepository::new(&conn);

        let by_modified = repo
            .find_range(&ModelQuery::page(0, 10).with_order(ModelOrder::LastModified, false))
            .unwrap();
        assert_eq!(
            paths(&by_modified),
            vec!["b/Miku.pmx", "Carol.vrm", "alice.vrm", "pack"]
        );

        let page = repo
            .find_range(&ModelQuery::page(1, 2).with_order(ModelOrder::LastModified, true))
            .unwrap();
        assert_eq!(paths(&page), vec!["alice.vrm", "Carol.vrm"]);
    }

    #[test]
    fn test_search_is_case_insensitive_substring() {
        let conn = memory_db();
        seed(&conn);
        let repo = ModelRepository::new(&conn);

        assert_eq!(repo.count(None).unwrap(), 4);
        assert_eq!(repo.count(Some("")).unwrap(), 4);
        assert_eq!(repo.count(Some("VRM")).unwrap(), 2);
        let found = repo
            .find_range(&ModelQuery::page(0, 10).with_search("mIk"))
            .unwrap();
        assert_eq!(paths(&found), vec!["b/Miku.pmx"]);
    }

    #[test]
    fn test_favorites_come_first() {
        let conn = memory_db();
        seed(&conn);
        let favorites = FavoriteRepository::new(&conn);
        favorites.set_favorite("pack", true, 10).unwrap();
        favorites.set_favorite("Carol.vrm", true, 20).unwrap();

        let repo = ModelRepository::new(&conn);
        let listing = repo
            .find_range(&ModelQuery::page(0, 10).with_order(ModelOrder::LastModified, false))
            .unwrap();
        assert_eq!(
            paths(&listing),
            vec!["Carol.vrm", "pack", "b/Miku.pmx", "alice.vrm"]
        );
        assert!(listing[0].favorite && listing[1].favorite);
        assert!(!listing[2].favorite);
    }

    #[test]
    fn test_find_by_path_and_hash() {
        let conn = memory_db();
        seed(&conn);
        let repo = ModelRepository::new(&conn);

        let item = repo.find_by_path("b/Miku.pmx").unwrap().unwrap();
        assert_eq!(item.name, "Miku.pmx");
        assert_eq!(item.last_modified, 300);
        assert!(repo.find_by_path("nope.vrm").unwrap().is_none());

        // Two models share hash 2; the lowest path wins
        let shared = repo.find_by_hash(&hash(2)).unwrap().unwrap();
        assert_eq!(shared.path, "alice.vrm");
        assert!(repo.find_by_hash(&hash(9)).unwrap().is_none());
    }

    #[test]
    fn test_retain_paths() {
        let conn = memory_db();
        seed(&conn);
        let repo = ModelRepository::new(&conn);
        assert_eq!(repo.retain_paths(["pack", "alice.vrm"]).unwrap(), 2);
        assert_eq!(repo.count(None).unwrap(), 2);
    }
}
