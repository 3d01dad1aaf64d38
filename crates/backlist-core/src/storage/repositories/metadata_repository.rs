use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::models::SystemMetadata;

use super::parse_timestamp;

pub trait MetadataRepository {
    fn get(&self, key: &str) -> Result<Option<SystemMetadata>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    /// Stores `at` as the value of `key`.
    fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<()>;
    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>>;
}

pub struct SqliteMetadataRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMetadataRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MetadataRepository for SqliteMetadataRepository<'_> {
    fn get(&self, key: &str) -> Result<Option<SystemMetadata>> {
        let row = self
            .conn
            .query_row(
                "SELECT key, value, updated_at FROM system_metadata WHERE key = ?1",
                params![key],
                |row| {
                    let updated: String = row.get(2)?;
                    Ok(SystemMetadata {
                        key: row.get(0)?,
                        value: row.get(1)?,
                        updated_at: parse_timestamp(2, &updated)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO system_metadata(key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn touch(&self, key: &str, at: DateTime<Utc>) -> Result<()> {
        self.set(key, &at.to_rfc3339())
    }

    fn get_timestamp(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self.get(key)?.and_then(|meta| {
            DateTime::parse_from_rfc3339(&meta.value)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LAST_INGEST_AT;
    use crate::storage::Database;

    #[test]
    fn test_created_on_first_write_then_updated() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let repo = SqliteMetadataRepository::new(&conn);

        assert!(repo.get(LAST_INGEST_AT).unwrap().is_none());

        let first = Utc::now() - chrono::Duration::days(1);
        repo.touch(LAST_INGEST_AT, first).unwrap();
        let second = Utc::now();
        repo.touch(LAST_INGEST_AT, second).unwrap();

        let stored = repo.get_timestamp(LAST_INGEST_AT).unwrap().unwrap();
        assert_eq!(stored.timestamp(), second.timestamp());
    }

    #[test]
    fn test_non_timestamp_value() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.connection();
        let repo = SqliteMetadataRepository::new(&conn);

        repo.set("schema_note", "hello").unwrap();
        assert_eq!(repo.get("schema_note").unwrap().unwrap().value, "hello");
        assert!(repo.get_timestamp("schema_note").unwrap().is_none());
    }
}
