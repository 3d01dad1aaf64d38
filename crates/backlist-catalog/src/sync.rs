use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use backlist_core::config::SyncConfig;
use backlist_core::dedup::{
    MergeCandidate, MergeResult, auto_merge, dedupe_all_titles, dedupe_author_titles,
    merge_candidates,
};
use backlist_core::normalize::{is_credential_only, normalize_author, normalize_title, split_author_group};
use backlist_core::storage::{
    AuthorRepository, CatalogRepository, MetadataRepository, ReadBookRepository,
    SqliteAuthorRepository, SqliteCatalogRepository, SqliteMetadataRepository,
    SqliteReadBookRepository,
};
use backlist_core::{Author, Database, LAST_CATALOG_RUN_AT, NewCatalogEntry};

use crate::error::{CatalogError, Result};
use crate::language::{LanguageReport, filter_non_english};
use crate::planner::{EntryDecision, entry_gate, is_too_old, recent_cutoff, should_fetch_author};
use crate::sources::{CatalogSource, EntryDetail, ListingCycle, RawEntry};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub force: bool,
    pub only_recent: bool,
    pub recent_years: i32,
    /// Run the language filter and a full title dedup after fetching.
    pub auto_cleanup: bool,
    pub auto_merge: bool,
    /// When set, every other author is reported as `forced-skip`.
    pub author_filter: Option<String>,
    pub freshness_days: i64,
    pub max_consecutive_failures: u32,
    /// Clock override; `None` means now.
    pub now: Option<DateTime<Utc>>,
}

impl SyncOptions {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            force: false,
            only_recent: false,
            recent_years: config.recent_years,
            auto_cleanup: false,
            auto_merge: false,
            author_filter: None,
            freshness_days: config.freshness_days,
            max_consecutive_failures: config.max_consecutive_failures,
            now: None,
        }
    }
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    Fresh,
    ForcedSkip,
    NotFound,
    Error,
    CredentialOnly,
    AuthorGroup,
    Aborted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fresh => write!(f, "fresh"),
            Self::ForcedSkip => write!(f, "forced-skip"),
            Self::NotFound => write!(f, "not-found"),
            Self::Error => write!(f, "error"),
            Self::CredentialOnly => write!(f, "credential-only"),
            Self::AuthorGroup => write!(f, "author-group"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedAuthor {
    pub author_id: i64,
    pub author: String,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Counters for one author whose fetch ran to the end of its listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorOutcome {
    pub author_id: i64,
    pub author: String,
    pub external_id: String,
    pub listed: usize,
    pub skipped_existing: usize,
    pub skipped_too_old: usize,
    pub detail_fetches: usize,
    pub inserted: usize,
    pub duplicates_removed: usize,
    pub matched_read_books: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<AuthorOutcome>,
    pub skipped: Vec<SkippedAuthor>,
    pub failures: Vec<String>,
    /// Candidates still pending review after this run.
    pub merge_candidates: Vec<MergeCandidate>,
    pub merges_applied: Vec<MergeResult>,
    pub duplicates_removed: usize,
    pub non_english_removed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<LanguageReport>,
    pub interrupted: bool,
}

impl SyncReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            succeeded: Vec::new(),
            skipped: Vec::new(),
            failures: Vec::new(),
            merge_candidates: Vec::new(),
            merges_applied: Vec::new(),
            duplicates_removed: 0,
            non_english_removed: 0,
            language: None,
            interrupted: false,
        }
    }

    fn skip(&mut self, author: &Author, reason: SkipReason, detail: Option<String>) {
        info!(author = %author.name, reason = %reason, "skipping author");
        if matches!(reason, SkipReason::NotFound | SkipReason::Error) {
            let detail = detail.as_deref().unwrap_or("no detail");
            self.failures.push(format!("{}: {detail}", author.name));
        }
        self.skipped.push(SkippedAuthor {
            author_id: author.id,
            author: author.name.clone(),
            reason,
            detail,
        });
    }
}

/// Why an author fetch stopped short. The partial catalog is kept either way.
enum AuthorFailure {
    Failed(CatalogError),
    Interrupted(AuthorOutcome),
}

impl From<CatalogError> for AuthorFailure {
    fn from(e: CatalogError) -> Self {
        Self::Failed(e)
    }
}

impl From<backlist_core::BacklistError> for AuthorFailure {
    fn from(e: backlist_core::BacklistError) -> Self {
        Self::Failed(CatalogError::Storage(e))
    }
}

/// Drives the per-author fetch loop and the post-fetch cleanup stages.
pub struct SyncEngine<'a> {
    db: &'a Database,
    source: &'a dyn CatalogSource,
    cancel: Arc<AtomicBool>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(db: &'a Database, source: &'a dyn CatalogSource) -> Self {
        Self {
            db,
            source,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub async fn run_sync(&self, opts: &SyncOptions) -> Result<SyncReport> {
        let now = opts.now.unwrap_or_else(Utc::now);
        let cutoff = opts.only_recent.then(|| recent_cutoff(now, opts.recent_years));
        let filter = opts.author_filter.as_deref().map(normalize_author);
        let mut report = SyncReport::new(Utc::now());

        let authors = {
            let conn = self.db.connection();
            SqliteAuthorRepository::new(&conn).list_live()?
        };
        info!(
            authors = authors.len(),
            source = self.source.name(),
            force = opts.force,
            only_recent = opts.only_recent,
            "starting catalog sync"
        );

        let mut consecutive_failures = 0u32;
        for author in &authors {
            if self.cancelled() {
                report.interrupted = true;
                break;
            }
            if author.hidden {
                debug!(author = %author.name, "hidden author, not fetched");
                continue;
            }
            if let Some(filter) = &filter
                && author.normalized_name != *filter
            {
                report.skip(author, SkipReason::ForcedSkip, None);
                continue;
            }
            if opts.max_consecutive_failures > 0 && consecutive_failures >= opts.max_consecutive_failures {
                report.skip(author, SkipReason::Aborted, None);
                continue;
            }
            if is_credential_only(&author.name) {
                report.skip(author, SkipReason::CredentialOnly, None);
                continue;
            }
            if split_author_group(&author.name).is_some() {
                report.skip(author, SkipReason::AuthorGroup, None);
                continue;
            }
            if !should_fetch_author(author.last_catalog_check, now, opts.freshness_days, opts.force) {
                report.skip(author, SkipReason::Fresh, None);
                continue;
            }

            let cycle = ListingCycle::after_check(author.last_catalog_check);
            let result = self.sync_author(author, cutoff, &cycle).await;

            // A finished attempt is stamped even when it failed. An interrupted one is
            // not, so the next run picks the author up again.
            if !matches!(result, Err(AuthorFailure::Interrupted(_))) {
                let conn = self.db.connection();
                SqliteAuthorRepository::new(&conn).stamp_checked(author.id, now)?;
            }

            match result {
                Ok(outcome) => {
                    consecutive_failures = 0;
                    info!(
                        author = %author.name,
                        inserted = outcome.inserted,
                        skipped_existing = outcome.skipped_existing,
                        skipped_too_old = outcome.skipped_too_old,
                        "author synced"
                    );
                    report.duplicates_removed += outcome.duplicates_removed;
                    report.succeeded.push(outcome);
                }
                Err(AuthorFailure::Interrupted(outcome)) => {
                    report.duplicates_removed += outcome.duplicates_removed;
                    report.succeeded.push(outcome);
                    report.interrupted = true;
                    break;
                }
                Err(AuthorFailure::Failed(CatalogError::NotFound(what))) => {
                    consecutive_failures = 0;
                    report.skip(author, SkipReason::NotFound, Some(what));
                }
                Err(AuthorFailure::Failed(e @ CatalogError::Storage(_))) => return Err(e),
                Err(AuthorFailure::Failed(e)) => {
                    if e.is_transient() {
                        consecutive_failures += 1;
                    }
                    warn!(author = %author.name, error = %e, "author fetch failed");
                    report.skip(author, SkipReason::Error, Some(e.to_string()));
                }
            }
        }

        if opts.auto_cleanup && !report.interrupted {
            report.duplicates_removed += dedupe_all_titles(self.db)?;
            let language = filter_non_english(self.db, self.source, &self.cancel).await?;
            report.non_english_removed = language.removed;
            report.interrupted |= language.interrupted;
            report.language = Some(language);
        }

        let candidates = merge_candidates(self.db)?;
        if opts.auto_merge && !candidates.is_empty() {
            report.merges_applied = auto_merge(self.db, &candidates)?;
            report.merge_candidates = merge_candidates(self.db)?;
        } else {
            report.merge_candidates = candidates;
        }

        if !report.interrupted {
            let conn = self.db.connection();
            SqliteMetadataRepository::new(&conn).touch(LAST_CATALOG_RUN_AT, Utc::now())?;
        }

        report.finished_at = Utc::now();
        info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            candidates = report.merge_candidates.len(),
            interrupted = report.interrupted,
            "catalog sync finished"
        );
        Ok(report)
    }

    async fn sync_author(
        &self,
        author: &Author,
        cutoff: Option<i32>,
        cycle: &ListingCycle,
    ) -> std::result::Result<AuthorOutcome, AuthorFailure> {
        let external_id = match &author.external_id {
            Some(id) => id.clone(),
            None => self.resolve_external_id(author).await?,
        };

        let mut existing = {
            let conn = self.db.connection();
            SqliteCatalogRepository::new(&conn).work_ids_for_author(author.id)?
        };

        let mut outcome = AuthorOutcome {
            author_id: author.id,
            author: author.name.clone(),
            external_id: external_id.clone(),
            ..AuthorOutcome::default()
        };

        let mut failure = None;
        let mut interrupted = false;
        let mut entries = self.source.fetch_author_catalog(&external_id, cycle);
        while let Some(item) = entries.next().await {
            if self.cancelled() {
                interrupted = true;
                break;
            }
            let raw = match item {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(author = %author.name, error = %e, "catalog page failed, keeping partial catalog");
                    failure = Some(e);
                    break;
                }
            };
            outcome.listed += 1;

            match entry_gate(&raw.work_id, raw.publish_year, &existing, cutoff) {
                EntryDecision::SkipExisting => {
                    outcome.skipped_existing += 1;
                    continue;
                }
                EntryDecision::SkipTooOld => {
                    debug!(work_id = %raw.work_id, year = ?raw.publish_year, "too old, not fetched");
                    outcome.skipped_too_old += 1;
                    continue;
                }
                EntryDecision::Fetch => {}
            }

            outcome.detail_fetches += 1;
            let detail = match self.source.work_detail(&raw.work_id).await {
                Ok(detail) => detail,
                Err(CatalogError::NotFound(_)) => {
                    warn!(work_id = %raw.work_id, "work vanished from source");
                    continue;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            let year = raw.publish_year.or(detail.publish_year);
            if raw.publish_year.is_none() && is_too_old(year, cutoff) {
                outcome.skipped_too_old += 1;
                continue;
            }

            let new_entry = new_catalog_entry(author.id, &raw, detail, year);
            {
                let conn = self.db.connection();
                SqliteCatalogRepository::new(&conn).insert(&new_entry)?;
            }
            existing.insert(raw.work_id);
            outcome.inserted += 1;
        }

        if !interrupted
            && let Err(e) = self.source.release_listing(&external_id, cycle).await
        {
            warn!(author = %author.name, error = %e, "could not release listing cache");
        }

        let (duplicates_removed, matched) = self.db.with_transaction(|tx| {
            let removed = dedupe_author_titles(tx, author.id)?;
            let matched = SqliteReadBookRepository::new(tx).refresh_matched(&author.normalized_name, author.id)?;
            Ok((removed, matched))
        })?;
        outcome.duplicates_removed = duplicates_removed;
        outcome.matched_read_books = matched;

        match failure {
            Some(e) => Err(AuthorFailure::Failed(e)),
            None if interrupted => Err(AuthorFailure::Interrupted(outcome)),
            None => Ok(outcome),
        }
    }

    async fn resolve_external_id(&self, author: &Author) -> Result<String> {
        let read_titles: Vec<String> = {
            let conn = self.db.connection();
            SqliteReadBookRepository::new(&conn)
                .list_for_author_key(&author.normalized_name)?
                .into_iter()
                .map(|b| b.normalized_title)
                .collect::<HashSet<_>>()
                .into_iter()
                .collect()
        };

        let found = self.source.find_author(&author.name, &read_titles).await?;
        let conn = self.db.connection();
        SqliteAuthorRepository::new(&conn).set_external_id(author.id, &found.external_id)?;
        Ok(found.external_id)
    }
}

fn new_catalog_entry(author_id: i64, raw: &RawEntry, detail: EntryDetail, year: Option<i32>) -> NewCatalogEntry {
    NewCatalogEntry {
        author_id,
        title: raw.title.clone(),
        normalized_title: normalize_title(&raw.title),
        work_id: raw.work_id.clone(),
        publish_year: year,
        format_hint: detail.format_hint,
        language: detail.language,
        isbn: detail.isbn,
        description: detail.description,
        has_cover: detail.has_cover,
        page_count: detail.page_count,
        categories: detail.categories,
        series_name: detail.series_name,
        series_position: detail.series_position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeSource, raw, seed_author, seed_entry, seed_read_book};
    use backlist_core::storage::Repository;
    use backlist_core::EntryStatus;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn opts() -> SyncOptions {
        SyncOptions {
            now: Some(now()),
            ..SyncOptions::default()
        }
    }

    fn author(db: &Database, id: i64) -> Author {
        let conn = db.connection();
        SqliteAuthorRepository::new(&conn).find_by_id(&id).unwrap().unwrap()
    }

    fn active_titles(db: &Database, author_id: i64) -> Vec<String> {
        let conn = db.connection();
        let mut titles: Vec<String> = SqliteCatalogRepository::new(&conn)
            .list_active_for_author(author_id)
            .unwrap()
            .into_iter()
            .map(|e| e.normalized_title)
            .collect();
        titles.sort();
        titles
    }

    #[tokio::test]
    async fn resolves_fetches_and_matches_history() {
        let db = Database::open_in_memory().unwrap();
        seed_read_book(&db, "The Sea Before Us", "Jane Doe", "row-1");
        let jane = seed_author(&db, "Jane Doe");

        let source = FakeSource::default().with_author("Jane Doe", "OL1A").with_catalog(
            "OL1A",
            vec![
                raw("/works/OL1W", "Sea Before Us (Sunrise at Normandy Book #1)", Some(2018)),
                raw("/works/OL2W", "The Sky Above Us", Some(2019)),
                raw("/works/OL3W", "Sky Above Us", None),
            ],
        );

        let report = SyncEngine::new(&db, &source).run_sync(&opts()).await.unwrap();
        assert_eq!(report.succeeded.len(), 1);
        let outcome = &report.succeeded[0];
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.duplicates_removed, 1);
        assert_eq!(outcome.matched_read_books, 1);
        assert_eq!(active_titles(&db, jane), vec!["sea before us", "sky above us"]);

        let stored = author(&db, jane);
        assert_eq!(stored.external_id.as_deref(), Some("OL1A"));
        assert_eq!(stored.last_catalog_check, Some(now()));

        let conn = db.connection();
        assert!(SqliteMetadataRepository::new(&conn).get(LAST_CATALOG_RUN_AT).unwrap().is_some());
    }

    #[tokio::test]
    async fn existing_work_ids_cost_no_detail_fetch() {
        let db = Database::open_in_memory().unwrap();
        let jane = seed_author(&db, "Jane Doe");
        seed_entry(&db, jane, "/works/OL1W", "Known Book", Some("eng"));

        let source = FakeSource::default().with_author("Jane Doe", "OL1A").with_catalog(
            "OL1A",
            vec![raw("/works/OL1W", "Known Book", Some(2020)), raw("/works/OL2W", "New Book", Some(2021))],
        );

        let mut options = opts();
        options.force = true;
        let engine = SyncEngine::new(&db, &source);
        engine.run_sync(&options).await.unwrap();
        assert_eq!(source.detail_calls(), vec!["/works/OL2W".to_string()]);

        // A repeat run fetches no detail at all.
        engine.run_sync(&options).await.unwrap();
        assert_eq!(source.detail_calls().len(), 1);
        assert_eq!(source.listing_calls(), 2);
    }

    #[tokio::test]
    async fn recent_only_never_details_old_entries() {
        let db = Database::open_in_memory().unwrap();
        seed_author(&db, "Jane Doe");
        let source = FakeSource::default()
            .with_author("Jane Doe", "OL1A")
            .with_catalog(
                "OL1A",
                vec![
                    raw("/works/OLOLDW", "Old Book", Some(2001)),
                    raw("/works/OLNEWW", "New Book", Some(2025)),
                    raw("/works/OLUNDW", "Undated Book", None),
                ],
            )
            .with_detail("/works/OLUNDW", EntryDetail { publish_year: Some(1999), ..EntryDetail::default() });

        let mut options = opts();
        options.only_recent = true;
        options.recent_years = 3;
        let report = SyncEngine::new(&db, &source).run_sync(&options).await.unwrap();

        let calls = source.detail_calls();
        assert!(!calls.contains(&"/works/OLOLDW".to_string()));
        assert_eq!(calls.len(), 2);
        let outcome = &report.succeeded[0];
        assert_eq!(outcome.inserted, 1);
        assert_eq!(outcome.skipped_too_old, 2);
    }

    #[tokio::test]
    async fn next_freshness_window_sees_new_works() {
        use crate::sources::OpenLibrarySource;
        use mockito::{Matcher, Server};
        use serde_json::json;
        use tempfile::TempDir;

        let mut server = Server::new_async().await;
        let mut detail_mocks = Vec::new();
        for work in ["OL1W", "OL2W"] {
            detail_mocks.push(
                server
                    .mock("GET", format!("/works/{work}.json").as_str())
                    .with_status(200)
                    .with_body(json!({"title": work}).to_string())
                    .create_async()
                    .await,
            );
            detail_mocks.push(
                server
                    .mock("GET", format!("/works/{work}/editions.json").as_str())
                    .match_query(Matcher::Any)
                    .with_status(200)
                    .with_body(json!({"entries": []}).to_string())
                    .create_async()
                    .await,
            );
        }
        let first_listing = server
            .mock("GET", "/authors/OL1A/works.json")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(json!({"size": 1, "entries": [{"key": "/works/OL1W", "title": "One"}]}).to_string())
            .expect(1)
            .create_async()
            .await;

        let db = Database::open_in_memory().unwrap();
        let jane = seed_author(&db, "Jane Doe");
        {
            let conn = db.connection();
            SqliteAuthorRepository::new(&conn).set_external_id(jane, "OL1A").unwrap();
        }
        let dir = TempDir::new().unwrap();
        let source = OpenLibrarySource::new_for_tests(server.url(), dir.path());
        let engine = SyncEngine::new(&db, &source);

        engine.run_sync(&opts()).await.unwrap();
        assert_eq!(active_titles(&db, jane), vec!["one"]);
        first_listing.assert_async().await;
        first_listing.remove_async().await;

        let _second_listing = server
            .mock("GET", "/authors/OL1A/works.json")
            .match_query(Matcher::UrlEncoded("offset".into(), "0".into()))
            .with_status(200)
            .with_body(
                json!({"size": 2, "entries": [
                    {"key": "/works/OL2W", "title": "Two"},
                    {"key": "/works/OL1W", "title": "One"}
                ]})
                .to_string(),
            )
            .create_async()
            .await;

        let mut later = opts();
        later.now = Some(now() + Duration::days(8));
        let report = engine.run_sync(&later).await.unwrap();
        assert_eq!(report.succeeded[0].inserted, 1);
        assert_eq!(report.succeeded[0].skipped_existing, 1);
        assert_eq!(active_titles(&db, jane), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn fresh_authors_are_not_fetched() {
        let db = Database::open_in_memory().unwrap();
        let jane = seed_author(&db, "Jane Doe");
        {
            let conn = db.connection();
            SqliteAuthorRepository::new(&conn)
                .stamp_checked(jane, now() - Duration::days(2))
                .unwrap();
        }
        let source = FakeSource::default().with_author("Jane Doe", "OL1A");

        let report = SyncEngine::new(&db, &source).run_sync(&opts()).await.unwrap();
        assert_eq!(report.skipped[0].reason, SkipReason::Fresh);
        assert_eq!(source.listing_calls(), 0);
    }

    #[tokio::test]
    async fn failures_are_stamped_and_isolated() {
        let db = Database::open_in_memory().unwrap();
        let missing = seed_author(&db, "Nobody Known");
        let flaky = seed_author(&db, "Flaky Writer");
        let fine = seed_author(&db, "Fine Writer");

        let source = FakeSource::default()
            .with_author("Flaky Writer", "OL2A")
            .with_catalog("OL2A", vec![raw("/works/OL21W", "First", None), raw("/works/OL22W", "Second", None)])
            .with_page_failure("OL2A", 1)
            .with_author("Fine Writer", "OL3A")
            .with_catalog("OL3A", vec![raw("/works/OL31W", "Only", None)]);

        let report = SyncEngine::new(&db, &source).run_sync(&opts()).await.unwrap();

        let reasons: Vec<(i64, SkipReason)> = report.skipped.iter().map(|s| (s.author_id, s.reason)).collect();
        assert_eq!(reasons, vec![(missing, SkipReason::NotFound), (flaky, SkipReason::Error)]);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].author_id, fine);

        // partial catalog kept, every attempt stamped
        assert_eq!(active_titles(&db, flaky), vec!["first"]);
        for id in [missing, flaky, fine] {
            assert_eq!(author(&db, id).last_catalog_check, Some(now()));
        }
    }

    #[tokio::test]
    async fn breaker_aborts_after_consecutive_transient_failures() {
        let db = Database::open_in_memory().unwrap();
        seed_author(&db, "Alpha Writer");
        seed_author(&db, "Beta Writer");
        let gamma = seed_author(&db, "Gamma Writer");

        let source = FakeSource::default()
            .failing_author("Alpha Writer")
            .failing_author("Beta Writer")
            .with_author("Gamma Writer", "OL3A");

        let mut options = opts();
        options.max_consecutive_failures = 2;
        let report = SyncEngine::new(&db, &source).run_sync(&options).await.unwrap();

        let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::Error, SkipReason::Error, SkipReason::Aborted]);
        assert_eq!(author(&db, gamma).last_catalog_check, None);
    }

    #[tokio::test]
    async fn skips_filtered_group_and_credential_rows() {
        let db = Database::open_in_memory().unwrap();
        seed_author(&db, "Jane Doe");
        seed_author(&db, "John Smith, Mary Jones");
        seed_author(&db, "PhD");
        let source = FakeSource::default().with_author("Jane Doe", "OL1A");

        let report = SyncEngine::new(&db, &source).run_sync(&opts()).await.unwrap();
        let reasons: Vec<SkipReason> = report.skipped.iter().map(|s| s.reason).collect();
        assert_eq!(reasons, vec![SkipReason::AuthorGroup, SkipReason::CredentialOnly]);

        let mut options = opts();
        options.force = true;
        options.author_filter = Some("john smith, mary jones".to_string());
        let report = SyncEngine::new(&db, &source).run_sync(&options).await.unwrap();
        assert_eq!(report.skipped[0].reason, SkipReason::ForcedSkip);
    }

    #[tokio::test]
    async fn candidates_surface_without_auto_merge() {
        let db = Database::open_in_memory().unwrap();
        let short = seed_author(&db, "L. M. Montgomery");
        let long = seed_author(&db, "L. M. (Lucy Maud) Montgomery");
        seed_entry(&db, short, "/works/OL1W", "Anne of Green Gables", Some("eng"));
        seed_entry(&db, long, "/works/OL2W", "Emily of New Moon", Some("eng"));
        seed_entry(&db, long, "/works/OL3W", "The Blue Castle", Some("eng"));
        {
            let conn = db.connection();
            let repo = SqliteAuthorRepository::new(&conn);
            repo.stamp_checked(short, now()).unwrap();
            repo.stamp_checked(long, now()).unwrap();
        }
        let source = FakeSource::default();

        let report = SyncEngine::new(&db, &source).run_sync(&opts()).await.unwrap();
        assert_eq!(report.merge_candidates.len(), 1);
        assert!(report.merges_applied.is_empty());
        assert!(!author(&db, short).is_superseded());

        let mut options = opts();
        options.auto_merge = true;
        let report = SyncEngine::new(&db, &source).run_sync(&options).await.unwrap();
        assert_eq!(report.merges_applied.len(), 1);
        assert_eq!(report.merges_applied[0].survivor_id, long);
        assert!(report.merge_candidates.is_empty());
        assert_eq!(active_titles(&db, long).len(), 3);
    }

    #[tokio::test]
    async fn auto_cleanup_removes_non_english() {
        let db = Database::open_in_memory().unwrap();
        let jane = seed_author(&db, "Jane Doe");
        let source = FakeSource::default().with_author("Jane Doe", "OL1A").with_catalog(
            "OL1A",
            vec![raw("/works/OL1W", "The Quiet Shore", None), raw("/works/OL2W", "La Mer (French Edition)", None)],
        );

        let mut options = opts();
        options.auto_cleanup = true;
        let report = SyncEngine::new(&db, &source).run_sync(&options).await.unwrap();
        assert_eq!(report.non_english_removed, 1);
        assert_eq!(active_titles(&db, jane), vec!["quiet shore"]);

        let conn = db.connection();
        let removed = SqliteCatalogRepository::new(&conn)
            .list_for_author(jane)
            .unwrap()
            .into_iter()
            .filter(|e| e.status == EntryStatus::RemovedNonEnglish)
            .count();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn cancellation_stops_and_resumes() {
        let db = Database::open_in_memory().unwrap();
        let first = seed_author(&db, "Alpha Writer");
        let second = seed_author(&db, "Beta Writer");

        let engine_cancel = Arc::new(AtomicBool::new(false));
        let source = FakeSource::default()
            .with_author("Alpha Writer", "OL1A")
            .with_catalog("OL1A", vec![raw("/works/OL11W", "One", None), raw("/works/OL12W", "Two", None)])
            .with_author("Beta Writer", "OL2A")
            .with_catalog("OL2A", vec![raw("/works/OL21W", "Three", None)])
            .cancel_after_details(1, Arc::clone(&engine_cancel));

        let engine = SyncEngine::new(&db, &source).with_cancel(Arc::clone(&engine_cancel));
        let report = engine.run_sync(&opts()).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(author(&db, first).last_catalog_check, None);
        assert_eq!(author(&db, second).last_catalog_check, None);
        assert_eq!(active_titles(&db, first), vec!["one"]);
        assert!(source.releases().is_empty());
        {
            let conn = db.connection();
            assert!(SqliteMetadataRepository::new(&conn).get(LAST_CATALOG_RUN_AT).unwrap().is_none());
        }

        // Resume picks the interrupted author up where it stopped.
        engine_cancel.store(false, Ordering::Relaxed);
        let report = engine.run_sync(&opts()).await.unwrap();
        assert!(!report.interrupted);
        assert!(report.skipped.is_empty());
        let resumed: Vec<i64> = report.succeeded.iter().map(|o| o.author_id).collect();
        assert_eq!(resumed, vec![first, second]);
        assert_eq!(report.succeeded[0].skipped_existing, 1);
        assert_eq!(
            source.detail_calls(),
            vec!["/works/OL11W".to_string(), "/works/OL12W".to_string(), "/works/OL21W".to_string()]
        );
        assert_eq!(active_titles(&db, first), vec!["one", "two"]);
        assert_eq!(author(&db, first).last_catalog_check, Some(now()));
        assert_eq!(source.releases()[0], ("OL1A".to_string(), ListingCycle::after_check(None)));
    }
}
