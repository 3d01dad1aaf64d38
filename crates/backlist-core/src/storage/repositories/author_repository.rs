use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{BacklistError, Result};
use crate::models::{Author, NewAuthor};

use super::{Repository, parse_opt_timestamp, parse_timestamp};

const AUTHOR_COLUMNS: &str =
    "id, name, normalized_name, external_id, last_catalog_check, hidden, merged_into, created_at";

pub trait AuthorRepository: Repository<Entity = Author, Id = i64> {
    fn insert(&self, author: &NewAuthor) -> Result<Author>;
    /// The non-superseded author owning `key`, if any.
    fn find_live_by_key(&self, key: &str) -> Result<Option<Author>>;
    /// Like `find_live_by_key`, but a key held by a superseded author resolves to the
    /// author it was merged into.
    fn resolve_key(&self, key: &str) -> Result<Option<Author>>;
    fn list_live(&self) -> Result<Vec<Author>>;
    fn set_external_id(&self, id: i64, external_id: &str) -> Result<()>;
    fn stamp_checked(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
    fn set_hidden(&self, id: i64, hidden: bool) -> Result<bool>;
    fn mark_merged(&self, loser: i64, survivor: i64) -> Result<()>;
    fn count_live(&self) -> Result<usize>;
}

pub struct SqliteAuthorRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteAuthorRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_author(row: &rusqlite::Row) -> rusqlite::Result<Author> {
        let checked: Option<String> = row.get(4)?;
        let created: String = row.get(7)?;
        Ok(Author {
            id: row.get(0)?,
            name: row.get(1)?,
            normalized_name: row.get(2)?,
            external_id: row.get(3)?,
            last_catalog_check: parse_opt_timestamp(4, checked)?,
            hidden: row.get(5)?,
            merged_into: row.get(6)?,
            created_at: parse_timestamp(7, &created)?,
        })
    }

    fn query_authors(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<Author>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::row_to_author)?;
        let mut authors = Vec::new();
        for row in rows {
            authors.push(row?);
        }
        Ok(authors)
    }
}

impl Repository for SqliteAuthorRepository<'_> {
    type Entity = Author;
    type Id = i64;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let author = self
            .conn
            .query_row(
                &format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE id = ?1"),
                params![id],
                Self::row_to_author,
            )
            .optional()?;
        Ok(author)
    }

    fn save(&self, author: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO authors
                (id, name, normalized_name, external_id, last_catalog_check, hidden,
                 merged_into, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                normalized_name = excluded.normalized_name,
                external_id = excluded.external_id,
                last_catalog_check = excluded.last_catalog_check,
                hidden = excluded.hidden,
                merged_into = excluded.merged_into",
            params![
                author.id,
                author.name,
                author.normalized_name,
                author.external_id,
                author.last_catalog_check.map(|t| t.to_rfc3339()),
                author.hidden,
                author.merged_into,
                author.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM authors WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

impl AuthorRepository for SqliteAuthorRepository<'_> {
    fn insert(&self, author: &NewAuthor) -> Result<Author> {
        let now = Utc::now();
        self.conn.execute(
            "INSERT INTO authors (name, normalized_name, created_at) VALUES (?1, ?2, ?3)",
            params![author.name, author.normalized_name, now.to_rfc3339()],
        )?;
        let id = self.conn.last_insert_rowid();
        self.find_by_id(&id)?
            .ok_or_else(|| BacklistError::AuthorNotFound(id.to_string()))
    }

    fn find_live_by_key(&self, key: &str) -> Result<Option<Author>> {
        let author = self
            .conn
            .query_row(
                &format!(
                    "SELECT {AUTHOR_COLUMNS} FROM authors
                     WHERE normalized_name = ?1 AND merged_into IS NULL"
                ),
                params![key],
                Self::row_to_author,
            )
            .optional()?;
        Ok(author)
    }

    fn resolve_key(&self, key: &str) -> Result<Option<Author>> {
        if let Some(live) = self.find_live_by_key(key)? {
            return Ok(Some(live));
        }

        let superseded = self.query_authors(
            &format!(
                "SELECT {AUTHOR_COLUMNS} FROM authors
                 WHERE normalized_name = ?1 AND merged_into IS NOT NULL
                 ORDER BY id LIMIT 1"
            ),
            params![key],
        )?;
        let Some(mut current) = superseded.into_iter().next() else {
            return Ok(None);
        };

        // merge chains are short; the bound only guards against a corrupted cycle
        for _ in 0..32 {
            match current.merged_into {
                None => return Ok(Some(current)),
                Some(next) => {
                    current = self.find_by_id(&next)?.ok_or_else(|| {
                        BacklistError::DataIntegrity(format!(
                            "author {} merged into missing author {next}",
                            current.id
                        ))
                    })?;
                }
            }
        }
        Err(BacklistError::DataIntegrity(format!(
            "merge chain for key '{key}' does not terminate"
        )))
    }

    fn list_live(&self) -> Result<Vec<Author>> {
        self.query_authors(
            &format!("SELECT {AUTHOR_COLUMNS} FROM authors WHERE merged_into IS NULL ORDER BY id"),
            [],
        )
    }

    fn set_external_id(&self, id: i64, external_id: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE authors SET external_id = ?2 WHERE id = ?1",
            params![id, external_id],
        )?;
        Ok(())
    }

    fn stamp_checked(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "UPDATE authors SET last_catalog_check = ?2 WHERE id = ?1",
            params![id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    fn set_hidden(&self, id: i64, hidden: bool) -> Result<bool> {
        let affected = self.conn.execute(
            "UPDATE authors SET hidden = ?2 WHERE id = ?1",
            params![id, hidden],
        )?;
        Ok(affected > 0)
    }

    fn mark_merged(&self, loser: i64, survivor: i64) -> Result<()> {
        let affected = self.conn.execute(
            "UPDATE authors SET merged_into = ?2 WHERE id = ?1 AND merged_into IS NULL",
            params![loser, survivor],
        )?;
        if affected == 0 {
            return Err(BacklistError::DataIntegrity(format!(
                "author {loser} is missing or already superseded"
            )));
        }
        Ok(())
    }

    fn count_live(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM authors WHERE merged_into IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}
