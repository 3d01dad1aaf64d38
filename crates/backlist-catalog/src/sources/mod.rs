pub mod openlibrary;

use async_trait::async_trait;
use backlist_core::FormatHint;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use openlibrary::OpenLibrarySource;

/// One row of an author's bibliography listing, before any detail call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEntry {
    pub work_id: String,
    pub title: String,
    #[serde(default)]
    pub publish_year: Option<i32>,
}

/// Everything the detail step learns about a work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryDetail {
    pub title: Option<String>,
    pub description: Option<String>,
    pub has_cover: bool,
    pub page_count: Option<u32>,
    pub isbn: Option<String>,
    pub categories: Vec<String>,
    pub publish_year: Option<i32>,
    pub language: Option<String>,
    pub series_name: Option<String>,
    pub series_position: Option<u32>,
    pub format_hint: FormatHint,
}

/// Result of resolving a local author name to the source's identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorMatch {
    pub external_id: String,
    pub name: String,
    pub work_count: u32,
}

/// One pass over an author's listing, named after the author's previous check.
///
/// Listing pages are cached per cycle: an interrupted pass (no new stamp) resumes
/// from the same pages, while the next freshness window lists afresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingCycle(String);

impl ListingCycle {
    pub fn after_check(last_check: Option<DateTime<Utc>>) -> Self {
        match last_check {
            Some(checked) => Self(checked.timestamp().to_string()),
            None => Self("initial".to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A remote bibliographic catalog.
///
/// Implementations pace their own outbound calls through a shared
/// [`RateLimiter`](crate::http::RateLimiter) and cache every response before
/// returning it.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve `name` to an external author id. `read_titles` are normalized titles
    /// the user has read by this author and are used to disambiguate namesakes.
    async fn find_author(&self, name: &str, read_titles: &[String]) -> Result<AuthorMatch>;

    /// Lazily page through an author's works, every entry unfiltered. A page failure
    /// yields one `Err` and ends the stream.
    fn fetch_author_catalog<'a>(
        &'a self,
        author_id: &'a str,
        cycle: &'a ListingCycle,
    ) -> BoxStream<'a, Result<RawEntry>>;

    /// Forget the listing pages cached for `cycle` once the pass is finished.
    async fn release_listing(&self, author_id: &str, cycle: &ListingCycle) -> Result<()>;

    /// The expensive per-work call.
    async fn work_detail(&self, work_id: &str) -> Result<EntryDetail>;

    /// Language tag for a work, or `None` when the source has no opinion.
    async fn work_language(&self, work_id: &str) -> Result<Option<String>>;
}
