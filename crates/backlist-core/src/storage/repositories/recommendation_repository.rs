use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::models::{FeedbackState, FormatFilter, Recommendation};

use super::{parse_enum, parse_opt_timestamp, parse_timestamp};

const RECOMMENDATION_COLUMNS: &str =
    "id, catalog_entry_id, format, feedback, generated_at, feedback_at";

pub trait RecommendationRepository {
    /// Writes the snapshot row for an entry. Existing feedback is never touched.
    fn upsert_snapshot(
        &self,
        catalog_entry_id: i64,
        format: FormatFilter,
        generated_at: DateTime<Utc>,
    ) -> Result<()>;
    fn find_by_entry(&self, catalog_entry_id: i64) -> Result<Option<Recommendation>>;
    fn feedback_by_entry(&self) -> Result<HashMap<i64, FeedbackState>>;
    fn set_feedback(&self, catalog_entry_id: i64, feedback: FeedbackState) -> Result<()>;
    /// Drops neutral rows saved under `format` for which `is_stale` holds. Rows saved
    /// under another format belong to another snapshot and are left alone.
    fn delete_stale_neutral(
        &self,
        format: FormatFilter,
        is_stale: &dyn Fn(i64) -> bool,
    ) -> Result<usize>;
    fn list(&self) -> Result<Vec<Recommendation>>;
}

pub struct SqliteRecommendationRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteRecommendationRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_recommendation(row: &rusqlite::Row) -> rusqlite::Result<Recommendation> {
        let format: String = row.get(2)?;
        let feedback: String = row.get(3)?;
        let generated: String = row.get(4)?;
        let feedback_at: Option<String> = row.get(5)?;
        Ok(Recommendation {
            id: row.get(0)?,
            catalog_entry_id: row.get(1)?,
            format: parse_enum::<FormatFilter>(2, &format)?,
            feedback: parse_enum::<FeedbackState>(3, &feedback)?,
            generated_at: parse_timestamp(4, &generated)?,
            feedback_at: parse_opt_timestamp(5, feedback_at)?,
        })
    }
}

impl RecommendationRepository for SqliteRecommendationRepository<'_> {
    fn upsert_snapshot(
        &self,
        catalog_entry_id: i64,
        format: FormatFilter,
        generated_at: DateTime<Utc>,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO recommendations (catalog_entry_id, format, generated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(catalog_entry_id) DO UPDATE SET
                format = excluded.format,
                generated_at = excluded.generated_at",
            params![catalog_entry_id, format.to_string(), generated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn find_by_entry(&self, catalog_entry_id: i64) -> Result<Option<Recommendation>> {
        let rec = self
            .conn
            .query_row(
                &format!(
                    "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations
                     WHERE catalog_entry_id = ?1"
                ),
                params![catalog_entry_id],
                Self::row_to_recommendation,
            )
            .optional()?;
        Ok(rec)
    }

    fn feedback_by_entry(&self) -> Result<HashMap<i64, FeedbackState>> {
        let mut stmt = self
            .conn
            .prepare("SELECT catalog_entry_id, feedback FROM recommendations")?;
        let rows = stmt.query_map([], |row| {
            let feedback: String = row.get(1)?;
            Ok((row.get::<_, i64>(0)?, parse_enum::<FeedbackState>(1, &feedback)?))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (id, feedback) = row?;
            map.insert(id, feedback);
        }
        Ok(map)
    }

    fn set_feedback(&self, catalog_entry_id: i64, feedback: FeedbackState) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO recommendations (catalog_entry_id, feedback, generated_at, feedback_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(catalog_entry_id) DO UPDATE SET
                feedback = excluded.feedback,
                feedback_at = excluded.feedback_at",
            params![catalog_entry_id, feedback.to_string(), now],
        )?;
        Ok(())
    }

    fn delete_stale_neutral(
        &self,
        format: FormatFilter,
        is_stale: &dyn Fn(i64) -> bool,
    ) -> Result<usize> {
        let mut stmt = self.conn.prepare(
            "SELECT catalog_entry_id FROM recommendations
             WHERE feedback = 'neutral' AND format = ?1",
        )?;
        let neutral: Vec<i64> = stmt
            .query_map(params![format.to_string()], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;

        let mut removed = 0;
        for entry_id in neutral.into_iter().filter(|id| is_stale(*id)) {
            removed += self.conn.execute(
                "DELETE FROM recommendations WHERE catalog_entry_id = ?1",
                params![entry_id],
            )?;
        }
        Ok(removed)
    }

    fn list(&self) -> Result<Vec<Recommendation>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {RECOMMENDATION_COLUMNS} FROM recommendations ORDER BY catalog_entry_id"
        ))?;
        let rows = stmt.query_map([], Self::row_to_recommendation)?;
        let mut recs = Vec::new();
        for row in rows {
            recs.push(row?);
        }
        Ok(recs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::models::{NewAuthor, NewCatalogEntry};
    use crate::storage::{
        AuthorRepository, CatalogRepository, Database, SqliteAuthorRepository,
        SqliteCatalogRepository,
    };

    fn seed_entries(conn: &Connection, n: usize) -> Vec<i64> {
        let author = SqliteAuthorRepository::new(conn)
            .insert(&NewAuthor {
                name: "Jane Doe".to_string(),
                normalized_name: "jane doe".to_string(),
            })
            .unwrap();
        let catalog = SqliteCatalogRepository::new(conn);
        (0..n)
            .map(|i| {
                catalog
                    .insert(&NewCatalogEntry {
                        author_id: author.id,
                        title: format!("Book {i}"),
                        normalized_title: format!("book {i}"),
                        work_id: format!("/works/OL{i}W"),
                        ..Default::default()
                    })
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_snapshot_upsert_keeps_feedback() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let ids = seed_entries(&conn, 1);
        let repo = SqliteRecommendationRepository::new(&conn);

        repo.upsert_snapshot(ids[0], FormatFilter::Any, Utc::now()).unwrap();
        repo.set_feedback(ids[0], FeedbackState::ThumbsUp).unwrap();
        repo.upsert_snapshot(ids[0], FormatFilter::Audiobook, Utc::now()).unwrap();

        let rec = repo.find_by_entry(ids[0]).unwrap().unwrap();
        assert_eq!(rec.feedback, FeedbackState::ThumbsUp);
        assert_eq!(rec.format, FormatFilter::Audiobook);
        assert!(rec.feedback_at.is_some());
        assert_eq!(repo.list().unwrap().len(), 1);
    }

    #[test]
    fn test_feedback_creates_row() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let ids = seed_entries(&conn, 1);
        let repo = SqliteRecommendationRepository::new(&conn);

        repo.set_feedback(ids[0], FeedbackState::ThumbsDown).unwrap();
        assert_eq!(
            repo.feedback_by_entry().unwrap().get(&ids[0]),
            Some(&FeedbackState::ThumbsDown)
        );
    }

    #[test]
    fn test_stale_neutral_rows_are_dropped() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let ids = seed_entries(&conn, 3);
        let repo = SqliteRecommendationRepository::new(&conn);

        for id in &ids {
            repo.upsert_snapshot(*id, FormatFilter::Any, Utc::now()).unwrap();
        }
        repo.set_feedback(ids[2], FeedbackState::ThumbsDown).unwrap();

        let keep: HashSet<i64> = [ids[0]].into_iter().collect();
        let stale = |id: i64| !keep.contains(&id);
        assert_eq!(repo.delete_stale_neutral(FormatFilter::Any, &stale).unwrap(), 1);

        let remaining: Vec<i64> = repo.list().unwrap().iter().map(|r| r.catalog_entry_id).collect();
        assert_eq!(remaining, vec![ids[0], ids[2]]);
    }

    #[test]
    fn test_stale_deletion_stays_within_format() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let ids = seed_entries(&conn, 2);
        let repo = SqliteRecommendationRepository::new(&conn);

        repo.upsert_snapshot(ids[0], FormatFilter::Ebook, Utc::now()).unwrap();
        repo.upsert_snapshot(ids[1], FormatFilter::Audiobook, Utc::now()).unwrap();

        assert_eq!(repo.delete_stale_neutral(FormatFilter::Audiobook, &|_| true).unwrap(), 1);
        let remaining: Vec<i64> = repo.list().unwrap().iter().map(|r| r.catalog_entry_id).collect();
        assert_eq!(remaining, vec![ids[0]]);
    }

    #[test]
    fn test_deleting_entry_cascades() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let ids = seed_entries(&conn, 1);
        let repo = SqliteRecommendationRepository::new(&conn);
        repo.upsert_snapshot(ids[0], FormatFilter::Any, Utc::now()).unwrap();

        conn.execute("DELETE FROM catalog_entries WHERE id = ?1", params![ids[0]])
            .unwrap();
        assert!(repo.find_by_entry(ids[0]).unwrap().is_none());
    }
}
