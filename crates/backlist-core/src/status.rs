use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::dedup::find_author_candidates;
use crate::error::Result;
use crate::models::{LAST_CATALOG_RUN_AT, LAST_INGEST_AT};
use crate::storage::{
    AuthorRepository, CatalogRepository, Database, MetadataRepository, ReadBookRepository,
    RecommendationRepository, SqliteAuthorRepository, SqliteCatalogRepository,
    SqliteMetadataRepository, SqliteReadBookRepository, SqliteRecommendationRepository,
    repositories::StatusCounts,
};

/// Library-wide counts for the `status` command.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub authors: usize,
    pub hidden_authors: usize,
    pub read_books: usize,
    pub catalog: StatusCounts,
    pub recommendations: usize,
    pub pending_candidates: usize,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_catalog_run_at: Option<DateTime<Utc>>,
}

pub fn status(db: &Database) -> Result<StatusReport> {
    let conn = db.connection();
    let authors = SqliteAuthorRepository::new(&conn).list_live()?;
    let metadata = SqliteMetadataRepository::new(&conn);

    Ok(StatusReport {
        authors: authors.len(),
        hidden_authors: authors.iter().filter(|a| a.hidden).count(),
        read_books: SqliteReadBookRepository::new(&conn).count()?,
        catalog: SqliteCatalogRepository::new(&conn).status_counts()?,
        recommendations: SqliteRecommendationRepository::new(&conn).list()?.len(),
        pending_candidates: find_author_candidates(&authors).len(),
        last_ingest_at: metadata.get_timestamp(LAST_INGEST_AT)?,
        last_catalog_run_at: metadata.get_timestamp(LAST_CATALOG_RUN_AT)?,
    })
}
