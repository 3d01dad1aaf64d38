use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::models::{BookFormat, NewReadBook, ReadBook};

use super::{Repository, parse_enum, parse_opt_timestamp};

const READ_BOOK_COLUMNS: &str =
    "id, title, normalized_title, author_key, format, read_at, source_row_id, matched";

pub trait ReadBookRepository: Repository<Entity = ReadBook, Id = i64> {
    /// Inserts unless `source_row_id` is already present. Returns whether a row was added.
    fn insert_if_absent(&self, book: &NewReadBook) -> Result<bool>;
    fn find_by_source_row_id(&self, source_row_id: &str) -> Result<Option<ReadBook>>;
    fn list_all(&self) -> Result<Vec<ReadBook>>;
    fn list_for_author_key(&self, author_key: &str) -> Result<Vec<ReadBook>>;
    fn reassign_author_key(&self, from: &str, to: &str) -> Result<usize>;
    /// Recomputes `matched` for one author's books against its active catalog.
    fn refresh_matched(&self, author_key: &str, author_id: i64) -> Result<usize>;
    fn count(&self) -> Result<usize>;
}

pub struct SqliteReadBookRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteReadBookRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn row_to_book(row: &rusqlite::Row) -> rusqlite::Result<ReadBook> {
        let format_str: String = row.get(4)?;
        let read_at: Option<String> = row.get(5)?;
        Ok(ReadBook {
            id: row.get(0)?,
            title: row.get(1)?,
            normalized_title: row.get(2)?,
            author_key: row.get(3)?,
            format: parse_enum::<BookFormat>(4, &format_str)?,
            read_at: parse_opt_timestamp(5, read_at)?,
            source_row_id: row.get(6)?,
            matched: row.get(7)?,
        })
    }

    fn query_books(&self, sql: &str, args: impl rusqlite::Params) -> Result<Vec<ReadBook>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(args, Self::row_to_book)?;
        let mut books = Vec::new();
        for row in rows {
            books.push(row?);
        }
        Ok(books)
    }
}

impl Repository for SqliteReadBookRepository<'_> {
    type Entity = ReadBook;
    type Id = i64;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>> {
        let book = self
            .conn
            .query_row(
                &format!("SELECT {READ_BOOK_COLUMNS} FROM read_books WHERE id = ?1"),
                params![id],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn save(&self, book: &Self::Entity) -> Result<()> {
        self.conn.execute(
            "INSERT INTO read_books
                (id, title, normalized_title, author_key, format, read_at, source_row_id, matched)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                author_key = excluded.author_key,
                matched = excluded.matched",
            params![
                book.id,
                book.title,
                book.normalized_title,
                book.author_key,
                book.format.to_string(),
                book.read_at.map(|t| t.to_rfc3339()),
                book.source_row_id,
                book.matched,
            ],
        )?;
        Ok(())
    }

    fn delete(&self, id: &Self::Id) -> Result<bool> {
        let affected = self.conn.execute("DELETE FROM read_books WHERE id = ?1", params![id])?;
        Ok(affected > 0)
    }
}

impl ReadBookRepository for SqliteReadBookRepository<'_> {
    fn insert_if_absent(&self, book: &NewReadBook) -> Result<bool> {
        let affected = self.conn.execute(
            "INSERT INTO read_books
                (title, normalized_title, author_key, format, read_at, source_row_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source_row_id) DO NOTHING",
            params![
                book.title,
                book.normalized_title,
                book.author_key,
                book.format.to_string(),
                book.read_at.map(|t| t.to_rfc3339()),
                book.source_row_id,
            ],
        )?;
        Ok(affected > 0)
    }

    fn find_by_source_row_id(&self, source_row_id: &str) -> Result<Option<ReadBook>> {
        let book = self
            .conn
            .query_row(
                &format!("SELECT {READ_BOOK_COLUMNS} FROM read_books WHERE source_row_id = ?1"),
                params![source_row_id],
                Self::row_to_book,
            )
            .optional()?;
        Ok(book)
    }

    fn list_all(&self) -> Result<Vec<ReadBook>> {
        self.query_books(
            &format!("SELECT {READ_BOOK_COLUMNS} FROM read_books ORDER BY id"),
            [],
        )
    }

    fn list_for_author_key(&self, author_key: &str) -> Result<Vec<ReadBook>> {
        self.query_books(
            &format!("SELECT {READ_BOOK_COLUMNS} FROM read_books WHERE author_key = ?1 ORDER BY id"),
            params![author_key],
        )
    }

    fn reassign_author_key(&self, from: &str, to: &str) -> Result<usize> {
        let affected = self.conn.execute(
            "UPDATE read_books SET author_key = ?2 WHERE author_key = ?1",
            params![from, to],
        )?;
        Ok(affected)
    }

    fn refresh_matched(&self, author_key: &str, author_id: i64) -> Result<usize> {
        self.conn.execute(
            "UPDATE read_books SET matched = (
                 normalized_title IN (
                     SELECT normalized_title FROM catalog_entries
                     WHERE author_id = ?2 AND status = 'active'
                 )
             )
             WHERE author_key = ?1",
            params![author_key, author_id],
        )?;
        let matched: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM read_books WHERE author_key = ?1 AND matched = 1",
            params![author_key],
            |row| row.get(0),
        )?;
        Ok(matched as usize)
    }

    fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM read_books", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}
