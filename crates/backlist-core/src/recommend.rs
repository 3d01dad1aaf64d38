//! Eligible-unread computation, grouping, snapshot persistence and user feedback.

use std::collections::{HashMap, HashSet};

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::error::{BacklistError, Result};
use crate::models::{Author, CatalogEntry, FeedbackState, FormatFilter, FormatHint, GroupOrder};
use crate::storage::{
    AuthorRepository, CatalogRepository, Database, ReadBookRepository, RecommendationRepository,
    Repository, SqliteAuthorRepository, SqliteCatalogRepository, SqliteReadBookRepository,
    SqliteRecommendationRepository,
};

const NON_FICTION_KEYWORDS: &[&str] = &[
    "biography",
    "autobiography",
    "memoir",
    "history",
    "science",
    "self-help",
    "business",
    "cooking",
    "cookbook",
    "travel",
    "religion",
    "philosophy",
    "psychology",
    "politics",
    "economics",
    "health",
    "true crime",
    "essays",
    "reference",
    "education",
];

#[derive(Debug, Clone, Default)]
pub struct RecommendationQuery {
    pub format: FormatFilter,
    /// Case-insensitive category match; `fiction` and `non-fiction` classify instead.
    pub category: Option<String>,
    pub order: GroupOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendedBook {
    pub entry_id: i64,
    pub title: String,
    pub work_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish_year: Option<i32>,
    pub format_hint: FormatHint,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub series_position: Option<u32>,
    pub feedback: FeedbackState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecommendationGroup {
    pub author_id: i64,
    pub author_name: String,
    pub author_key: String,
    pub books_read: usize,
    pub books: Vec<RecommendedBook>,
}

impl RecommendationGroup {
    pub fn eligible_count(&self) -> usize {
        self.books.len()
    }
}

/// Non-fiction wins only on an explicit marker or a known non-fiction subject.
pub fn is_non_fiction(categories: &[String]) -> bool {
    let lowered: Vec<String> = categories.iter().map(|c| c.to_lowercase()).collect();
    if lowered
        .iter()
        .any(|c| c.contains("nonfiction") || c.contains("non-fiction"))
    {
        return true;
    }
    if lowered.iter().any(|c| c.contains("fiction")) {
        return false;
    }
    lowered
        .iter()
        .any(|c| NON_FICTION_KEYWORDS.iter().any(|k| c.contains(k)))
}

pub fn matches_category(entry: &CatalogEntry, filter: &str) -> bool {
    let filter = filter.trim().to_lowercase();
    match filter.as_str() {
        "" => true,
        "fiction" => !is_non_fiction(&entry.categories),
        "non-fiction" | "nonfiction" => is_non_fiction(&entry.categories),
        other => entry
            .categories
            .iter()
            .any(|c| c.to_lowercase().contains(other)),
    }
}

/// One author's eligible-unread set: active, not read under the same author key,
/// no excluding feedback, and matching the requested format and category.
pub fn eligible_unread<'e>(
    author_key: &str,
    entries: &'e [CatalogEntry],
    read_titles: &HashSet<(String, String)>,
    feedback: &HashMap<i64, FeedbackState>,
    query: &RecommendationQuery,
) -> Vec<&'e CatalogEntry> {
    entries
        .iter()
        .filter(|e| e.is_active())
        .filter(|e| !read_titles.contains(&(author_key.to_string(), e.normalized_title.clone())))
        .filter(|e| !feedback.get(&e.id).is_some_and(FeedbackState::excludes))
        .filter(|e| query.format.matches(e.format_hint))
        .filter(|e| query.category.as_deref().is_none_or(|c| matches_category(e, c)))
        .collect()
}

fn to_book(entry: &CatalogEntry, feedback: &HashMap<i64, FeedbackState>) -> RecommendedBook {
    RecommendedBook {
        entry_id: entry.id,
        title: entry.title.clone(),
        work_id: entry.work_id.clone(),
        publish_year: entry.publish_year,
        format_hint: entry.format_hint,
        categories: entry.categories.clone(),
        series_name: entry.series_name.clone(),
        series_position: entry.series_position,
        feedback: feedback.get(&entry.id).copied().unwrap_or_default(),
    }
}

/// Stable total orders: ties always fall back to the author key.
pub fn order_groups(groups: &mut [RecommendationGroup], order: GroupOrder) {
    match order {
        GroupOrder::Count => groups.sort_by(|a, b| {
            b.eligible_count()
                .cmp(&a.eligible_count())
                .then_with(|| a.author_key.cmp(&b.author_key))
        }),
        GroupOrder::Alpha => groups.sort_by(|a, b| {
            a.author_name
                .to_lowercase()
                .cmp(&b.author_name.to_lowercase())
                .then_with(|| a.author_key.cmp(&b.author_key))
        }),
    }
}

fn build_groups(
    authors: &[Author],
    entries: &[CatalogEntry],
    read_titles: &HashSet<(String, String)>,
    read_counts: &HashMap<String, usize>,
    feedback: &HashMap<i64, FeedbackState>,
    query: &RecommendationQuery,
) -> Vec<RecommendationGroup> {
    let mut by_author: HashMap<i64, Vec<CatalogEntry>> = HashMap::new();
    for entry in entries {
        by_author.entry(entry.author_id).or_default().push(entry.clone());
    }

    let mut groups = Vec::new();
    for author in authors.iter().filter(|a| !a.hidden && !a.is_superseded()) {
        let Some(author_entries) = by_author.get(&author.id) else {
            continue;
        };

        let mut eligible = eligible_unread(
            &author.normalized_name,
            author_entries,
            read_titles,
            feedback,
            query,
        );
        if eligible.is_empty() {
            continue;
        }
        eligible.sort_by(|a, b| {
            b.publish_year
                .cmp(&a.publish_year)
                .then_with(|| a.normalized_title.cmp(&b.normalized_title))
                .then_with(|| a.id.cmp(&b.id))
        });

        let marked_read = author_entries
            .iter()
            .filter(|e| feedback.get(&e.id) == Some(&FeedbackState::AlreadyRead))
            .count();
        groups.push(RecommendationGroup {
            author_id: author.id,
            author_name: author.name.clone(),
            author_key: author.normalized_name.clone(),
            books_read: read_counts.get(&author.normalized_name).copied().unwrap_or(0)
                + marked_read,
            books: eligible.into_iter().map(|e| to_book(e, feedback)).collect(),
        });
    }

    order_groups(&mut groups, query.order);
    groups
}

/// Computes grouped recommendations. With `persist` the snapshot is written: each
/// eligible entry's row is refreshed and feedback is carried forward. Stale neutral rows
/// are dropped only within the query's format and category, so saving an audiobook
/// snapshot leaves an earlier ebook one intact.
pub fn generate_recommendations(
    db: &Database,
    query: &RecommendationQuery,
    persist: bool,
) -> Result<Vec<RecommendationGroup>> {
    db.with_transaction(|tx| {
        let authors = SqliteAuthorRepository::new(tx).list_live()?;
        let entries = SqliteCatalogRepository::new(tx).list_active()?;
        let read_books = SqliteReadBookRepository::new(tx).list_all()?;
        let recs = SqliteRecommendationRepository::new(tx);
        let feedback = recs.feedback_by_entry()?;

        let mut read_counts: HashMap<String, usize> = HashMap::new();
        let read_titles: HashSet<(String, String)> = read_books
            .into_iter()
            .map(|b| {
                *read_counts.entry(b.author_key.clone()).or_default() += 1;
                (b.author_key, b.normalized_title)
            })
            .collect();

        let groups = build_groups(&authors, &entries, &read_titles, &read_counts, &feedback, query);

        if persist {
            let now = Utc::now();
            let keep: HashSet<i64> = groups
                .iter()
                .flat_map(|g| g.books.iter().map(|b| b.entry_id))
                .collect();
            for entry_id in &keep {
                recs.upsert_snapshot(*entry_id, query.format, now)?;
            }
            // A neutral row is stale when its entry is gone or falls inside this query's
            // category yet was not recommended. Other categories keep their rows.
            let active: HashMap<i64, &CatalogEntry> = entries.iter().map(|e| (e.id, e)).collect();
            let is_stale = |id: i64| {
                !keep.contains(&id)
                    && active.get(&id).is_none_or(|e| {
                        query.category.as_deref().is_none_or(|c| matches_category(e, c))
                    })
            };
            let dropped = recs.delete_stale_neutral(query.format, &is_stale)?;
            info!(saved = keep.len(), dropped, "saved recommendation snapshot");
        }
        Ok(groups)
    })
}

/// Records feedback on a catalog entry, creating its recommendation row when missing.
pub fn set_feedback(db: &Database, catalog_entry_id: i64, state: FeedbackState) -> Result<()> {
    let conn = db.connection();
    if SqliteCatalogRepository::new(&conn)
        .find_by_id(&catalog_entry_id)?
        .is_none()
    {
        return Err(BacklistError::EntryNotFound(catalog_entry_id));
    }
    SqliteRecommendationRepository::new(&conn).set_feedback(catalog_entry_id, state)?;
    info!(entry = catalog_entry_id, feedback = %state, "recorded feedback");
    Ok(())
}

pub fn hide_author(db: &Database, author_id: i64) -> Result<()> {
    set_hidden(db, author_id, true)
}

pub fn unhide_author(db: &Database, author_id: i64) -> Result<()> {
    set_hidden(db, author_id, false)
}

fn set_hidden(db: &Database, author_id: i64, hidden: bool) -> Result<()> {
    let conn = db.connection();
    if !SqliteAuthorRepository::new(&conn).set_hidden(author_id, hidden)? {
        return Err(BacklistError::AuthorNotFound(author_id.to_string()));
    }
    info!(author = author_id, hidden, "updated author visibility");
    Ok(())
}
