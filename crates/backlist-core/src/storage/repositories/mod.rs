mod author_repository;
mod catalog_repository;
mod metadata_repository;
mod read_book_repository;
mod recommendation_repository;

pub use author_repository::{AuthorRepository, SqliteAuthorRepository};
pub use catalog_repository::{CatalogRepository, SqliteCatalogRepository, StatusCounts};
pub use metadata_repository::{MetadataRepository, SqliteMetadataRepository};
pub use read_book_repository::{ReadBookRepository, SqliteReadBookRepository};
pub use recommendation_repository::{RecommendationRepository, SqliteRecommendationRepository};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;

use crate::error::Result;

pub trait Repository {
    type Entity;
    type Id;

    fn find_by_id(&self, id: &Self::Id) -> Result<Option<Self::Entity>>;
    fn save(&self, entity: &Self::Entity) -> Result<()>;
    fn delete(&self, id: &Self::Id) -> Result<bool>;
}

// ─── Column codecs ──────────────────────────────────────────

pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_timestamp(
    idx: usize,
    raw: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_timestamp(idx, &s)).transpose()
}

pub(crate) fn parse_enum<T>(idx: usize, raw: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}
