use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use backlist_core::AppConfig;
use backlist_core::FormatHint;
use backlist_core::normalize::{extract_series, normalize_author, normalize_title};

use crate::error::{CatalogError, Result};
use crate::http::{DiskCache, RateLimitedClient, RateLimiter};
use crate::sources::{AuthorMatch, CatalogSource, EntryDetail, ListingCycle, RawEntry};

const SOURCE_NAME: &str = "openlibrary";
const AUTHOR_SEARCH_LIMIT: &str = "10";
const NAME_SIMILARITY_THRESHOLD: f64 = 0.85;
const MAX_CATEGORIES: usize = 12;

static SERIES_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.*?)[\s,;:#]*(?:(?:book|vol\.?|volume|no\.?)\s*)?#?(\d+)\s*$")
        .expect("valid regex")
});

// ─── Response records ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct AuthorDoc {
    key: String,
    name: String,
    work_count: u32,
    top_work: Option<String>,
}

impl AuthorDoc {
    fn from_json(v: &Value) -> Option<Self> {
        let key = v.get("key").and_then(Value::as_str)?;
        let name = v.get("name").and_then(Value::as_str)?;
        Some(Self {
            key: key.trim_start_matches("/authors/").to_string(),
            name: name.to_string(),
            work_count: v
                .get("work_count")
                .and_then(Value::as_u64)
                .map(|n| n as u32)
                .unwrap_or_default(),
            top_work: v
                .get("top_work")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WorksPage {
    entries: Vec<RawEntry>,
    size: Option<usize>,
}

impl WorksPage {
    fn from_json(v: &Value) -> Self {
        let entries = v
            .get("entries")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|item| {
                        let work_id = item.get("key").and_then(Value::as_str)?;
                        let title = item.get("title").and_then(Value::as_str)?;
                        let publish_year = item
                            .get("first_publish_date")
                            .and_then(Value::as_str)
                            .and_then(year_in)
                            .or_else(|| {
                                item.get("first_publish_year")
                                    .and_then(Value::as_i64)
                                    .map(|y| y as i32)
                            });
                        Some(RawEntry {
                            work_id: work_id.to_string(),
                            title: title.to_string(),
                            publish_year,
                        })
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();

        Self {
            entries,
            size: v.get("size").and_then(Value::as_u64).map(|n| n as usize),
        }
    }

    /// Offset of the following page, or `None` once the listing is exhausted.
    fn next_offset(&self, offset: usize, page_size: usize) -> Option<usize> {
        if self.entries.is_empty() {
            return None;
        }
        let next = offset + self.entries.len();
        match self.size {
            Some(size) if next >= size => None,
            None if self.entries.len() < page_size => None,
            _ => Some(next),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct EditionRecord {
    languages: Vec<String>,
    isbn_13: Option<String>,
    isbn_10: Option<String>,
    number_of_pages: Option<u32>,
    physical_format: Option<String>,
    has_cover: bool,
    series: Option<String>,
    publish_year: Option<i32>,
}

impl EditionRecord {
    fn from_json(v: &Value) -> Self {
        let first_str = |field: &str| {
            v.get(field)
                .and_then(Value::as_array)
                .and_then(|arr| arr.iter().filter_map(Value::as_str).next())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        Self {
            languages: language_codes(v),
            isbn_13: first_str("isbn_13"),
            isbn_10: first_str("isbn_10"),
            number_of_pages: v
                .get("number_of_pages")
                .and_then(Value::as_u64)
                .map(|n| n as u32)
                .filter(|n| *n > 0),
            physical_format: v
                .get("physical_format")
                .and_then(Value::as_str)
                .map(ToOwned::to_owned),
            has_cover: has_cover(v),
            series: first_str("series"),
            publish_year: v
                .get("publish_date")
                .and_then(Value::as_str)
                .and_then(year_in),
        }
    }
}

fn language_codes(v: &Value) -> Vec<String> {
    v.get("languages")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|lang| lang.get("key").and_then(Value::as_str))
                .map(|key| key.trim_start_matches("/languages/").to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn has_cover(v: &Value) -> bool {
    v.get("covers")
        .and_then(Value::as_array)
        .is_some_and(|arr| arr.iter().any(|id| id.as_i64().is_some_and(|id| id > 0)))
}

fn description(v: &Value) -> Option<String> {
    let raw = v.get("description")?;
    raw.as_str()
        .or_else(|| raw.get("value").and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// English wins if any edition is English; otherwise the first language seen.
fn pick_language(editions: &[EditionRecord]) -> Option<String> {
    let mut first = None;
    for code in editions.iter().flat_map(|e| e.languages.iter()) {
        if code == "eng" {
            return Some(code.clone());
        }
        first.get_or_insert_with(|| code.clone());
    }
    first
}

fn classify_formats(editions: &[EditionRecord]) -> FormatHint {
    let mut audio = false;
    let mut ebook = false;
    for format in editions.iter().filter_map(|e| e.physical_format.as_deref()) {
        let format = format.to_lowercase();
        if format.contains("audio") || format.contains("mp3") || format == "cd" {
            audio = true;
        }
        if format.contains("ebook")
            || format.contains("e-book")
            || format.contains("electronic")
            || format.contains("kindle")
        {
            ebook = true;
        }
    }
    match (audio, ebook) {
        (true, true) => FormatHint::Both,
        (true, false) => FormatHint::Audiobook,
        (false, true) => FormatHint::Ebook,
        (false, false) => FormatHint::Unknown,
    }
}

fn parse_series_field(raw: &str) -> (String, Option<u32>) {
    if let Some(caps) = SERIES_FIELD.captures(raw) {
        let name = caps[1].trim().trim_end_matches([',', ';', ':']).trim();
        if !name.is_empty() {
            return (name.to_string(), caps[2].parse().ok());
        }
    }
    (raw.trim().to_string(), None)
}

fn build_detail(work: &Value, editions: &[EditionRecord]) -> EntryDetail {
    let title = work
        .get("title")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    let categories = work
        .get("subjects")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .take(MAX_CATEGORIES)
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let publish_year = work
        .get("first_publish_date")
        .and_then(Value::as_str)
        .and_then(year_in)
        .or_else(|| editions.iter().filter_map(|e| e.publish_year).min());

    let isbn = editions
        .iter()
        .find_map(|e| e.isbn_13.clone())
        .or_else(|| editions.iter().find_map(|e| e.isbn_10.clone()));

    let (series_name, series_position) = match title.as_deref().and_then(extract_series) {
        Some((name, position)) => (Some(name), Some(position)),
        None => match editions.iter().find_map(|e| e.series.as_deref()) {
            Some(raw) => {
                let (name, position) = parse_series_field(raw);
                (Some(name), position)
            }
            None => (None, None),
        },
    };

    let language = pick_language(editions).or_else(|| language_codes(work).into_iter().next());

    EntryDetail {
        title,
        description: description(work),
        has_cover: has_cover(work) || editions.iter().any(|e| e.has_cover),
        page_count: editions.iter().find_map(|e| e.number_of_pages),
        isbn,
        categories,
        publish_year,
        language,
        series_name,
        series_position,
        format_hint: classify_formats(editions),
    }
}

/// Prefer a search hit whose best-known work is one the user read; fall back to
/// name similarity, larger bibliographies winning ties.
fn select_author(name: &str, read_titles: &[String], docs: &[AuthorDoc]) -> Option<AuthorDoc> {
    let read: HashSet<&str> = read_titles.iter().map(String::as_str).collect();
    let by_work_count = |a: &&AuthorDoc, b: &&AuthorDoc| a.work_count.cmp(&b.work_count);

    if let Some(doc) = docs
        .iter()
        .filter(|d| {
            d.top_work
                .as_deref()
                .is_some_and(|t| read.contains(normalize_title(t).as_str()))
        })
        .max_by(by_work_count)
    {
        return Some(doc.clone());
    }

    let wanted = normalize_author(name);
    docs.iter()
        .map(|d| (d, strsim::jaro_winkler(&wanted, &normalize_author(&d.name))))
        .filter(|(_, score)| *score >= NAME_SIMILARITY_THRESHOLD)
        .max_by(|(a, sa), (b, sb)| sa.total_cmp(sb).then(a.work_count.cmp(&b.work_count)))
        .map(|(d, _)| d.clone())
}

// ─── Source ──────────────────────────────────────────────────────────────────

pub struct OpenLibrarySource {
    client: RateLimitedClient,
    cache: DiskCache,
    base_url: String,
    page_size: usize,
    editions_per_work: usize,
}

impl OpenLibrarySource {
    pub fn new(config: &AppConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        let client = RateLimitedClient::from_config(&config.http, limiter)?;
        Ok(Self::with_config(
            config.http.base_url.clone(),
            client,
            DiskCache::new(config.cache_dir().join(SOURCE_NAME)),
            config.sync.page_size,
            config.sync.editions_per_work,
        ))
    }

    pub fn with_config(
        base_url: String,
        client: RateLimitedClient,
        cache: DiskCache,
        page_size: usize,
        editions_per_work: usize,
    ) -> Self {
        Self {
            client,
            cache,
            base_url,
            page_size: page_size.max(1),
            editions_per_work: editions_per_work.max(1),
        }
    }

    #[cfg(test)]
    pub(crate) fn new_for_tests(base_url: String, cache_dir: &std::path::Path) -> Self {
        let client = RateLimitedClient::new(
            Arc::new(RateLimiter::unlimited()),
            0,
            std::time::Duration::from_secs(5),
            "backlist-test",
        )
        .expect("test client");
        Self::with_config(base_url, client, DiskCache::new(cache_dir), 2, 5)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| CatalogError::Parse(format!("invalid URL {}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| CatalogError::Parse("invalid Open Library base URL".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Cached GET. A hit never touches the network; a miss is stored before the
    /// body is handed back.
    async fn get_cached(&self, cache_key: &str, url: Url) -> Result<Value> {
        if let Some(cached) = self.cache.get::<Value>(cache_key).await {
            debug!(key = cache_key, "cache hit");
            return Ok(cached);
        }
        let json: Value = self.client.get_json(url.as_str()).await?;
        self.cache.put(cache_key, &json).await?;
        Ok(json)
    }

    async fn search_authors(&self, name: &str) -> Result<Vec<AuthorDoc>> {
        let mut url = self.endpoint(&["search", "authors.json"])?;
        url.query_pairs_mut()
            .append_pair("q", name)
            .append_pair("limit", AUTHOR_SEARCH_LIMIT);

        let cache_key = format!("authors:{}", name.trim().to_lowercase());
        let json = self.get_cached(&cache_key, url).await?;
        Ok(json
            .get("docs")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(AuthorDoc::from_json).collect())
            .unwrap_or_default())
    }

    fn works_key(&self, author_id: &str, cycle: &ListingCycle, offset: usize) -> String {
        format!("works:{author_id}:{}:{offset}:{}", cycle.as_str(), self.page_size)
    }

    async fn works_page(&self, author_id: &str, cycle: &ListingCycle, offset: usize) -> Result<WorksPage> {
        let author_key = author_id.trim_start_matches("/authors/");
        let mut url = self.endpoint(&["authors", author_key, "works.json"])?;
        url.query_pairs_mut()
            .append_pair("limit", &self.page_size.to_string())
            .append_pair("offset", &offset.to_string());

        let cache_key = self.works_key(author_id, cycle, offset);
        let json = self.get_cached(&cache_key, url).await?;
        Ok(WorksPage::from_json(&json))
    }

    async fn work_record(&self, work_id: &str) -> Result<Value> {
        let key = format!("{}.json", work_key(work_id));
        let url = self.endpoint(&["works", key.as_str()])?;
        self.get_cached(&format!("work:{}", work_key(work_id)), url).await
    }

    /// A work without an editions listing has no editions, not an error.
    async fn editions(&self, work_id: &str) -> Result<Vec<EditionRecord>> {
        let id = work_key(work_id);
        let mut url = self.endpoint(&["works", id, "editions.json"])?;
        url.query_pairs_mut()
            .append_pair("limit", &self.editions_per_work.to_string());

        let cache_key = format!("editions:{id}:{}", self.editions_per_work);
        let json = match self.get_cached(&cache_key, url).await {
            Ok(json) => json,
            Err(CatalogError::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Ok(json
            .get("entries")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().map(EditionRecord::from_json).collect())
            .unwrap_or_default())
    }
}

#[async_trait]
impl CatalogSource for OpenLibrarySource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn find_author(&self, name: &str, read_titles: &[String]) -> Result<AuthorMatch> {
        let docs = self.search_authors(name).await?;
        let doc = select_author(name, read_titles, &docs)
            .ok_or_else(|| CatalogError::NotFound(format!("author {name}")))?;
        debug!(author = name, external_id = %doc.key, "resolved author");
        Ok(AuthorMatch {
            external_id: doc.key,
            name: doc.name,
            work_count: doc.work_count,
        })
    }

    fn fetch_author_catalog<'a>(
        &'a self,
        author_id: &'a str,
        cycle: &'a ListingCycle,
    ) -> BoxStream<'a, Result<RawEntry>> {
        stream::try_unfold(Some(0usize), move |offset| async move {
            let Some(offset) = offset else {
                return Ok(None);
            };
            let page = self.works_page(author_id, cycle, offset).await?;
            let next = page.next_offset(offset, self.page_size);
            Ok::<_, CatalogError>(Some((page.entries, next)))
        })
        .map_ok(|entries| stream::iter(entries.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }

    /// Pages are cached at consecutive offsets, so the first gap ends the cycle.
    async fn release_listing(&self, author_id: &str, cycle: &ListingCycle) -> Result<()> {
        let mut offset = 0;
        let mut released = 0usize;
        while self.cache.invalidate(&self.works_key(author_id, cycle, offset)).await {
            released += 1;
            offset += self.page_size;
        }
        debug!(author = author_id, cycle = cycle.as_str(), pages = released, "released listing cache");
        Ok(())
    }

    async fn work_detail(&self, work_id: &str) -> Result<EntryDetail> {
        let work = self.work_record(work_id).await?;
        let editions = self.editions(work_id).await?;
        Ok(build_detail(&work, &editions))
    }

    async fn work_language(&self, work_id: &str) -> Result<Option<String>> {
        let editions = self.editions(work_id).await?;
        if let Some(lang) = pick_language(&editions) {
            return Ok(Some(lang));
        }
        match self.work_record(work_id).await {
            Ok(work) => Ok(language_codes(&work).into_iter().next()),
            Err(CatalogError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn work_key(work_id: &str) -> &str {
    work_id.trim_start_matches("/works/")
}

/// First four-digit run in a free-form date such as `"March 3, 2021"` or `"c1998"`.
fn year_in(date: &str) -> Option<i32> {
    date.as_bytes()
        .windows(4)
        .find(|w| w.iter().all(u8::is_ascii_digit))
        .map(|w| w.iter().fold(0, |acc, d| acc * 10 + i32::from(d - b'0')))
}
