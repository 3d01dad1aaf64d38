use std::collections::HashSet;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;

use crate::error::Result;
use crate::models::{CatalogEntry, EntryStatus, FormatHint, NewCatalogEntry};

use super::{Repository, parse_enum, parse_timestamp};

const ENTRY_COLUMNS: &str = "id, author_id, title, normalized_title, work_id, publish_year, \
     format_hint, language, isbn, description, has_cover, page_count, categories, \
     series_name, series_position, status, fetched_at";

/// Row counts per entry status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub active: usize,
    pub removed_duplicate: usize,
    pub removed_non_english: usize,
}

pub trait CatalogRepository: Repository<Entity = CatalogEntry, Id = i64> {
    fn insert(&self, entry: &NewCatalogEntry) -> Result<i64>;
    /// Work ids of every row for the author, whatever its status.
    fn work_ids_for_author(&self, author_id: i64) -> Result<HashSet<String>>;
    fn list_for_author(&self, author_id: i64) -> Result<Vec<CatalogEntry>>;
    fn list_active_for_author(&self, author_id: i64) -> Result<Vec<CatalogEntry>>;
    fn list_active(&self) -> Result<Vec<CatalogEntry>>;
    /// Active entries that have never been language-classified.
    fn list_unclassified(&self, author_id: Option<i64>) -> Result<Vec<CatalogEntry>>;
    fn set_status(&self, id: i64, status: EntryStatus) -> Result<()>;
    fn set_language(&self, id: i64, language: &str) -> Result<()>;
    fn reassign_author(&self, from: i64, to: i64) -> Result<usize>;
    fn count_active_for_author(&self, author_id: i64) -> Result<usize>;
    fn status_counts(&self) -> Result<StatusCounts>;
}

pub struct SqliteCatalogRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteCatalogRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<CatalogEntry> {
        let format_str: String = row.get(6)?;
        let categories_str: String = row.get(12)?;
        let status_str: String = row.get(15)?;
        let fetched_str: String = row.get(16)?;

        Ok(CatalogEntry {
            id: row.get(0)?,
            author_id: row.get(1)?,
            title: row.get(2)?,
            normalized_title: row.get(3)?,
            work_id: row.get(4)?,
            publish_year: row.get(5)?,
            format_hint: parse_enum::<FormatHint>(6, &format_str)?,
            language: row.get(7)?,
            isbn: row.get(8)?,
            description: row.get(9)?,
            has_cover: row.get(10)?,
            page_count: row.get(11)?,
            categories: serde_json::from_str(&categories_str).unwrap_or_default(),
            series_name: row.get(13)?,
            series_position: row.get(14)?,
            status: parse_enum::<EntryStatus>(15, &status_str)?,
            fetched_at: parse_timestamp(16, &fetched_str)?,
        })
    }

    fn query_entries(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<CatalogEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::row_to_entry)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }
}

impl Repository for SqliteCatalogRepository<'_> {
    type Entity = CatalogEntry;
    type Id = i64;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let entry = self
            .conn
            .query_row(
                &format!("SELECT {ENTRY_COLUMNS} FROM catalog_entries WHERE id = ?1"),
                params![id],
                Self::row_to_entry,
            )
            .optional()?;
        Ok(entry)
    }

    fn save(&self, entry: &Self::Entity) -> Result<()> {
        let categories_json = serde_json::to_string(&entry.categories)?;
        self.conn.execute(
            "INSERT INTO catalog_entries
                (id, author_id, title, normalized_title, work_id, publish_year, format_hint,
                 language, isbn, description, has_cover, page_count, categories,
                 series_name, series_position, status, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
             ON CONFLICT(id) DO UPDATE SET
                author_id = excluded.author_id,
                title = excluded.title,
                normalized_title = excluded.normalized_title,
                work_id = excluded.work_id,
                publish_year = excluded.publish_year,
                format_hint = excluded.format_hint,
                language = excluded.language,
                isbn = excluded.isbn,
                description = excluded.description,
                has_cover = excluded.has_cover,
                page_count = excluded.page_count,
                categories = excluded.categories,
                series_name = excluded.series_name,
                series_position = excluded.series_position,
                status = excluded.status",
            params![
                entry.id,
                entry.author_id,
                entry.title,
                entry.normalized_title,
                entry.work_id,
                entry.publish_year,
                entry.format_hint.to_string(),
                entry.language,
                entry.isbn,
                entry.description,
                entry.has_cover,
                entry.page_count,
                categories_json,
                entry.series_name,
                entry.series_position,
                entry.status.to_string(),
                entry.fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM catalog_entries WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn insert(&self, entry: &NewCatalogEntry) -> Result<i64> {
        let categories_json = serde_json::to_string(&entry.categories)?;
        self.conn.execute(
            "INSERT INTO catalog_entries
                (author_id, title, normalized_title, work_id, publish_year, format_hint,
                 language, isbn, description, has_cover, page_count, categories,
                 series_name, series_position, status, fetched_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'active', ?15)",
            params![
                entry.author_id,
                entry.title,
                entry.normalized_title,
                entry.work_id,
                entry.publish_year,
                entry.format_hint.to_string(),
                entry.language,
                entry.isbn,
                entry.description,
                entry.has_cover,
                entry.page_count,
                categories_json,
                entry.series_name,
                entry.series_position,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn work_ids_for_author(&self, author_id: i64) -> Result<HashSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT work_id FROM catalog_entries WHERE author_id = ?1")?;
        let rows = stmt.query_map(params![author_id], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    fn list_for_author(&self, author_id: i64) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!("SELECT {ENTRY_COLUMNS} FROM catalog_entries WHERE author_id = ?1 ORDER BY id"),
            params![author_id],
        )
    }

    fn list_active_for_author(&self, author_id: i64) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM catalog_entries
                 WHERE author_id = ?1 AND status = 'active' ORDER BY id"
            ),
            params![author_id],
        )
    }

    fn list_active(&self) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM catalog_entries WHERE status = 'active'
                 ORDER BY author_id, id"
            ),
            [],
        )
    }

    fn list_unclassified(&self, author_id: Option<i64>) -> Result<Vec<CatalogEntry>> {
        self.query_entries(
            &format!(
                "SELECT {ENTRY_COLUMNS} FROM catalog_entries
                 WHERE status = 'active' AND language IS NULL
                   AND (?1 IS NULL OR author_id = ?1)
                 ORDER BY id"
            ),
            params![author_id],
        )
    }

    fn set_status(&self, id: i64, status: EntryStatus) -> Result<()> {
        self.conn.execute(
            "UPDATE catalog_entries SET status = ?2 WHERE id = ?1",
            params![id, status.to_string()],
        )?;
        Ok(())
    }

    fn set_language(&self, id: i64, language: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE catalog_entries SET language = ?2 WHERE id = ?1",
            params![id, language],
        )?;
        Ok(())
    }

    fn reassign_author(&self, from: i64, to: i64) -> Result<usize> {
        let affected = self.conn.execute(
            "UPDATE catalog_entries SET author_id = ?2 WHERE author_id = ?1",
            params![from, to],
        )?;
        Ok(affected)
    }

    fn count_active_for_author(&self, author_id: i64) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM catalog_entries WHERE author_id = ?1 AND status = 'active'",
            params![author_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn status_counts(&self) -> Result<StatusCounts> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM catalog_entries GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((parse_enum::<EntryStatus>(0, &status)?, count as usize))
        })?;

        let mut counts = StatusCounts::default();
        for row in rows {
            match row? {
                (EntryStatus::Active, n) => counts.active = n,
                (EntryStatus::RemovedDuplicate, n) => counts.removed_duplicate = n,
                (EntryStatus::RemovedNonEnglish, n) => counts.removed_non_english = n,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewAuthor;
    use crate::storage::{AuthorRepository, Database, SqliteAuthorRepository};

    fn seed_author(conn: &Connection, name: &str) -> i64 {
        SqliteAuthorRepository::new(conn)
            .insert(&NewAuthor {
                name: name.to_string(),
                normalized_name: crate::normalize::normalize_author(name),
            })
            .unwrap()
            .id
    }

    fn new_entry(author_id: i64, title: &str, work_id: &str) -> NewCatalogEntry {
        NewCatalogEntry {
            author_id,
            title: title.to_string(),
            normalized_title: crate::normalize::normalize_title(title),
            work_id: work_id.to_string(),
            categories: vec!["Fiction".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_and_read_back() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let author_id = seed_author(&conn, "Jane Doe");
        let repo = SqliteCatalogRepository::new(&conn);

        let id = repo.insert(&new_entry(author_id, "The Sea Before Us", "/works/OL1W")).unwrap();
        let entry = repo.find_by_id(&id).unwrap().unwrap();
        assert_eq!(entry.normalized_title, "sea before us");
        assert_eq!(entry.status, EntryStatus::Active);
        assert_eq!(entry.categories, vec!["Fiction".to_string()]);
        assert!(entry.language.is_none());
    }

    #[test]
    fn test_work_ids_ignore_status() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let author_id = seed_author(&conn, "Jane Doe");
        let repo = SqliteCatalogRepository::new(&conn);

        let id = repo.insert(&new_entry(author_id, "Emma", "/works/OL1W")).unwrap();
        repo.set_status(id, EntryStatus::RemovedNonEnglish).unwrap();

        assert!(repo.list_active_for_author(author_id).unwrap().is_empty());
        assert_eq!(repo.list_for_author(author_id).unwrap().len(), 1);
        let ids = repo.work_ids_for_author(author_id).unwrap();
        assert!(ids.contains("/works/OL1W"));
        assert!(!ids.contains("/works/OL2W"));
    }

    #[test]
    fn test_active_work_id_is_unique_per_author() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let author_id = seed_author(&conn, "Jane Doe");
        let repo = SqliteCatalogRepository::new(&conn);

        let first = repo.insert(&new_entry(author_id, "Emma", "/works/OL1W")).unwrap();
        assert!(repo.insert(&new_entry(author_id, "Emma", "/works/OL1W")).is_err());

        repo.set_status(first, EntryStatus::RemovedDuplicate).unwrap();
        assert!(repo.insert(&new_entry(author_id, "Emma", "/works/OL1W")).is_ok());
    }

    #[test]
    fn test_unclassified_and_status_counts() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed_author(&conn, "Jane Doe");
        let b = seed_author(&conn, "John Smith");
        let repo = SqliteCatalogRepository::new(&conn);

        let e1 = repo.insert(&new_entry(a, "Emma", "/works/OL1W")).unwrap();
        let e2 = repo.insert(&new_entry(a, "Persuasion", "/works/OL2W")).unwrap();
        repo.insert(&new_entry(b, "Dune", "/works/OL3W")).unwrap();

        repo.set_language(e1, "eng").unwrap();
        repo.set_status(e2, EntryStatus::RemovedDuplicate).unwrap();

        assert_eq!(repo.list_unclassified(None).unwrap().len(), 1);
        assert!(repo.list_unclassified(Some(a)).unwrap().is_empty());

        let counts = repo.status_counts().unwrap();
        assert_eq!(counts.active, 2);
        assert_eq!(counts.removed_duplicate, 1);
        assert_eq!(counts.removed_non_english, 0);
    }

    #[test]
    fn test_reassign_and_save() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let a = seed_author(&conn, "Jane Doe");
        let b = seed_author(&conn, "John Smith");
        let repo = SqliteCatalogRepository::new(&conn);

        let id = repo.insert(&new_entry(a, "Emma", "/works/OL1W")).unwrap();
        assert_eq!(repo.reassign_author(a, b).unwrap(), 1);
        assert_eq!(repo.count_active_for_author(b).unwrap(), 1);

        let mut entry = repo.find_by_id(&id).unwrap().unwrap();
        entry.isbn = Some("9780141439587".to_string());
        repo.save(&entry).unwrap();
        assert_eq!(
            repo.find_by_id(&id).unwrap().unwrap().isbn.as_deref(),
            Some("9780141439587")
        );

        assert!(repo.delete(&id).unwrap());
        assert!(!repo.delete(&id).unwrap());
    }
}
