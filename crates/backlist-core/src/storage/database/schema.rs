use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: u32 = 1;

pub fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        ",
    )?;
    Ok(())
}

pub fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS authors (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            name               TEXT NOT NULL,
            normalized_name    TEXT NOT NULL,
            external_id        TEXT,
            last_catalog_check TEXT,
            hidden             INTEGER NOT NULL DEFAULT 0,
            merged_into        INTEGER REFERENCES authors(id),
            created_at         TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS read_books (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            title            TEXT NOT NULL,
            normalized_title TEXT NOT NULL,
            author_key       TEXT NOT NULL,
            format           TEXT NOT NULL DEFAULT 'unknown',
            read_at          TEXT,
            source_row_id    TEXT NOT NULL UNIQUE,
            matched          INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS catalog_entries (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            author_id        INTEGER NOT NULL REFERENCES authors(id),
            title            TEXT NOT NULL,
            normalized_title TEXT NOT NULL,
            work_id          TEXT NOT NULL,
            publish_year     INTEGER,
            format_hint      TEXT NOT NULL DEFAULT 'unknown',
            language         TEXT,
            isbn             TEXT,
            description      TEXT,
            has_cover        INTEGER NOT NULL DEFAULT 0,
            page_count       INTEGER,
            categories       TEXT NOT NULL DEFAULT '[]',
            series_name      TEXT,
            series_position  INTEGER,
            status           TEXT NOT NULL DEFAULT 'active',
            fetched_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS recommendations (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            catalog_entry_id INTEGER NOT NULL UNIQUE
                             REFERENCES catalog_entries(id) ON DELETE CASCADE,
            format           TEXT NOT NULL DEFAULT 'any',
            feedback         TEXT NOT NULL DEFAULT 'neutral',
            generated_at     TEXT NOT NULL,
            feedback_at      TEXT
        );

        CREATE TABLE IF NOT EXISTS system_metadata (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        ",
    )?;
    Ok(())
}

pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- live authors only: superseded rows may keep a key the survivor shares
        CREATE UNIQUE INDEX IF NOT EXISTS idx_authors_live_key
            ON authors(normalized_name) WHERE merged_into IS NULL;

        CREATE UNIQUE INDEX IF NOT EXISTS idx_catalog_author_work_active
            ON catalog_entries(author_id, work_id) WHERE status = 'active';
        CREATE INDEX IF NOT EXISTS idx_catalog_author_status
            ON catalog_entries(author_id, status);
        CREATE INDEX IF NOT EXISTS idx_catalog_title
            ON catalog_entries(normalized_title);

        CREATE INDEX IF NOT EXISTS idx_read_books_author_title
            ON read_books(author_key, normalized_title);
        ",
    )?;
    Ok(())
}
