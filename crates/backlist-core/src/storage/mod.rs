pub mod database;
pub mod repositories;

pub use database::{Database, Location, SCHEMA_VERSION};
pub use repositories::{
    AuthorRepository, CatalogRepository, MetadataRepository, ReadBookRepository,
    RecommendationRepository, Repository, SqliteAuthorRepository, SqliteCatalogRepository,
    SqliteMetadataRepository, SqliteReadBookRepository, SqliteRecommendationRepository,
};
