//! Turns reading-history records into `ReadBook` rows and find-or-create authors.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::Result;
use crate::models::{LAST_INGEST_AT, NewAuthor, NewReadBook, ReadBookRecord};
use crate::normalize::{detect_format, normalize_author, normalize_title};
use crate::storage::{
    AuthorRepository, Database, MetadataRepository, ReadBookRepository, SqliteAuthorRepository,
    SqliteMetadataRepository, SqliteReadBookRepository,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub inserted: usize,
    /// Records whose `source_row_id` was already stored.
    pub unchanged: usize,
    pub authors_created: usize,
    /// Records with a blank title or author.
    pub rejected: usize,
}

/// Ingests records in one transaction. Re-ingesting the same rows changes nothing.
pub fn ingest_read_books(db: &Database, records: &[ReadBookRecord]) -> Result<IngestReport> {
    let report = db.with_transaction(|tx| {
        let authors = SqliteAuthorRepository::new(tx);
        let books = SqliteReadBookRepository::new(tx);
        let mut report = IngestReport::default();

        for record in records {
            let title = record.title.trim();
            let author_name = record.author_name.trim();
            let author_key = normalize_author(author_name);
            let normalized_title = normalize_title(title);
            if author_key.is_empty() || normalized_title.is_empty() {
                debug!(row = %record.source_row_id, "rejecting record with blank title or author");
                report.rejected += 1;
                continue;
            }

            if books.find_by_source_row_id(&record.source_row_id)?.is_some() {
                report.unchanged += 1;
                continue;
            }

            let author = match authors.resolve_key(&author_key)? {
                Some(author) => author,
                None => {
                    report.authors_created += 1;
                    authors.insert(&NewAuthor {
                        name: author_name.to_string(),
                        normalized_name: author_key,
                    })?
                }
            };

            let inserted = books.insert_if_absent(&NewReadBook {
                title: title.to_string(),
                normalized_title,
                author_key: author.normalized_name.clone(),
                format: record
                    .format
                    .unwrap_or_else(|| detect_format(record.publisher.as_deref())),
                read_at: record.loan_date,
                source_row_id: record.source_row_id.clone(),
            })?;
            if inserted {
                report.inserted += 1;
            } else {
                report.unchanged += 1;
            }
        }

        SqliteMetadataRepository::new(tx).touch(LAST_INGEST_AT, Utc::now())?;
        Ok(report)
    })?;

    info!(
        inserted = report.inserted,
        unchanged = report.unchanged,
        authors_created = report.authors_created,
        rejected = report.rejected,
        "ingested reading history"
    );
    Ok(report)
}
