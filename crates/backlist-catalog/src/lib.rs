pub mod error;
pub mod http;
pub mod language;
pub mod planner;
pub mod sources;
pub mod sync;

pub use error::{CatalogError, Result};
pub use http::{DiskCache, RateLimitedClient, RateLimiter};
pub use language::{LanguageReport, LanguageVerdict, classify_title, filter_non_english};
pub use sources::{AuthorMatch, CatalogSource, EntryDetail, OpenLibrarySource, RawEntry};
pub use sync::{AuthorOutcome, SkipReason, SkippedAuthor, SyncEngine, SyncOptions, SyncReport};

#[cfg(test)]
pub(crate) mod testing;
