//! In-process catalog source and seeding helpers for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use backlist_core::normalize::{normalize_author, normalize_title};
use backlist_core::storage::{
    AuthorRepository, CatalogRepository, ReadBookRepository, SqliteAuthorRepository,
    SqliteCatalogRepository, SqliteReadBookRepository,
};
use backlist_core::{BookFormat, Database, NewAuthor, NewCatalogEntry, NewReadBook};

use crate::error::{CatalogError, Result};
use crate::sources::{AuthorMatch, CatalogSource, EntryDetail, ListingCycle, RawEntry};

/// Serves canned listings and counts every call. Nothing is cached, so listing
/// cycles only show up in the release log.
#[derive(Default)]
pub struct FakeSource {
    authors: HashMap<String, String>,
    failing_authors: HashSet<String>,
    catalogs: HashMap<String, Vec<RawEntry>>,
    page_failures: HashMap<String, usize>,
    details: HashMap<String, EntryDetail>,
    languages: HashMap<String, Option<String>>,
    failing_languages: HashSet<String>,
    cancel_after: Option<(usize, Arc<AtomicBool>)>,
    listing_calls: AtomicUsize,
    language_calls: AtomicUsize,
    detail_calls: Mutex<Vec<String>>,
    releases: Mutex<Vec<(String, ListingCycle)>>,
}

impl FakeSource {
    pub fn with_author(mut self, name: &str, external_id: &str) -> Self {
        self.authors.insert(name.to_string(), external_id.to_string());
        self
    }

    /// `find_author` fails with a transient server error.
    pub fn failing_author(mut self, name: &str) -> Self {
        self.failing_authors.insert(name.to_string());
        self
    }

    pub fn with_catalog(mut self, external_id: &str, entries: Vec<RawEntry>) -> Self {
        self.catalogs.insert(external_id.to_string(), entries);
        self
    }

    /// The listing errors after yielding `after` entries.
    pub fn with_page_failure(mut self, external_id: &str, after: usize) -> Self {
        self.page_failures.insert(external_id.to_string(), after);
        self
    }

    pub fn with_detail(mut self, work_id: &str, detail: EntryDetail) -> Self {
        self.details.insert(work_id.to_string(), detail);
        self
    }

    pub fn with_language(mut self, work_id: &str, language: Option<&str>) -> Self {
        self.languages
            .insert(work_id.to_string(), language.map(ToOwned::to_owned));
        self
    }

    pub fn failing_language(mut self, work_id: &str) -> Self {
        self.failing_languages.insert(work_id.to_string());
        self
    }

    /// Raises `flag` right after the `n`th detail call.
    pub fn cancel_after_details(mut self, n: usize, flag: Arc<AtomicBool>) -> Self {
        self.cancel_after = Some((n, flag));
        self
    }

    pub fn listing_calls(&self) -> usize {
        self.listing_calls.load(Ordering::SeqCst)
    }

    pub fn language_calls(&self) -> usize {
        self.language_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> Vec<String> {
        self.detail_calls.lock().unwrap().clone()
    }

    pub fn releases(&self) -> Vec<(String, ListingCycle)> {
        self.releases.lock().unwrap().clone()
    }
}

fn server_error(what: &str) -> CatalogError {
    CatalogError::ServerError {
        url: format!("fake://{what}"),
        status: 503,
    }
}

#[async_trait]
impl CatalogSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn find_author(&self, name: &str, _read_titles: &[String]) -> Result<AuthorMatch> {
        if self.failing_authors.contains(name) {
            return Err(server_error(name));
        }
        let external_id = self
            .authors
            .get(name)
            .ok_or_else(|| CatalogError::NotFound(format!("author {name}")))?;
        Ok(AuthorMatch {
            external_id: external_id.clone(),
            name: name.to_string(),
            work_count: 0,
        })
    }

    fn fetch_author_catalog<'a>(
        &'a self,
        author_id: &'a str,
        _cycle: &'a ListingCycle,
    ) -> BoxStream<'a, Result<RawEntry>> {
        self.listing_calls.fetch_add(1, Ordering::SeqCst);
        let entries = self.catalogs.get(author_id).cloned().unwrap_or_default();
        let mut items: Vec<Result<RawEntry>> = entries.into_iter().map(Ok).collect();
        if let Some(after) = self.page_failures.get(author_id) {
            items.truncate(*after);
            items.push(Err(server_error(author_id)));
        }
        stream::iter(items).boxed()
    }

    async fn release_listing(&self, author_id: &str, cycle: &ListingCycle) -> Result<()> {
        self.releases
            .lock()
            .unwrap()
            .push((author_id.to_string(), cycle.clone()));
        Ok(())
    }

    async fn work_detail(&self, work_id: &str) -> Result<EntryDetail> {
        let calls = {
            let mut calls = self.detail_calls.lock().unwrap();
            calls.push(work_id.to_string());
            calls.len()
        };
        if let Some((n, flag)) = &self.cancel_after
            && calls == *n
        {
            flag.store(true, Ordering::SeqCst);
        }
        Ok(self.details.get(work_id).cloned().unwrap_or_default())
    }

    async fn work_language(&self, work_id: &str) -> Result<Option<String>> {
        self.language_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_languages.contains(work_id) {
            return Err(server_error(work_id));
        }
        Ok(self.languages.get(work_id).cloned().flatten())
    }
}

pub fn raw(work_id: &str, title: &str, publish_year: Option<i32>) -> RawEntry {
    RawEntry {
        work_id: work_id.to_string(),
        title: title.to_string(),
        publish_year,
    }
}

pub fn seed_author(db: &Database, name: &str) -> i64 {
    let conn = db.connection();
    SqliteAuthorRepository::new(&conn)
        .insert(&NewAuthor {
            name: name.to_string(),
            normalized_name: normalize_author(name),
        })
        .unwrap()
        .id
}

pub fn seed_entry(
    db: &Database,
    author_id: i64,
    work_id: &str,
    title: &str,
    language: Option<&str>,
) -> i64 {
    let conn = db.connection();
    SqliteCatalogRepository::new(&conn)
        .insert(&NewCatalogEntry {
            author_id,
            title: title.to_string(),
            normalized_title: normalize_title(title),
            work_id: work_id.to_string(),
            language: language.map(ToOwned::to_owned),
            ..NewCatalogEntry::default()
        })
        .unwrap()
}

/// Inserts a read book without creating its author.
pub fn seed_read_book(db: &Database, title: &str, author_name: &str, row: &str) {
    let conn = db.connection();
    SqliteReadBookRepository::new(&conn)
        .insert_if_absent(&NewReadBook {
            title: title.to_string(),
            normalized_title: normalize_title(title),
            author_key: normalize_author(author_name),
            format: BookFormat::Ebook,
            read_at: None,
            source_row_id: row.to_string(),
        })
        .unwrap();
}
