use std::collections::{HashMap, HashSet};

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::{CatalogEntry, EntryStatus};
use crate::storage::{AuthorRepository, CatalogRepository, Database, SqliteAuthorRepository, SqliteCatalogRepository};

/// What a duplicate group has in common.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DuplicateKey {
    /// Normalized title, or the work id for a title that normalizes to nothing.
    Title(String),
    /// ISBN-13 form of the entry's ISBN.
    Isbn(String),
}

impl std::fmt::Display for DuplicateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Title(title) => write!(f, "{title}"),
            Self::Isbn(isbn) => write!(f, "isbn {isbn}"),
        }
    }
}

/// Active entries of one author that are the same book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub author_id: i64,
    pub key: DuplicateKey,
    pub survivor: i64,
    pub removed: Vec<i64>,
}

/// Canonical ISBN-13 digits. ISBN-10s are lifted into the 978 prefix so both
/// spellings of one edition meet.
pub fn isbn_key(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    match cleaned.len() {
        13 if cleaned.bytes().all(|b| b.is_ascii_digit()) => Some(cleaned),
        10 if cleaned[..9].bytes().all(|b| b.is_ascii_digit())
            && matches!(cleaned.as_bytes()[9], b'0'..=b'9' | b'X') =>
        {
            let body = format!("978{}", &cleaned[..9]);
            let sum: u32 = body
                .bytes()
                .enumerate()
                .map(|(i, b)| u32::from(b - b'0') * if i % 2 == 0 { 1 } else { 3 })
                .sum();
            Some(format!("{body}{}", (10 - sum % 10) % 10))
        }
        _ => None,
    }
}

fn title_key(entry: &CatalogEntry) -> DuplicateKey {
    if entry.normalized_title.is_empty() {
        DuplicateKey::Title(entry.work_id.clone())
    } else {
        DuplicateKey::Title(entry.normalized_title.clone())
    }
}

fn group_by(
    entries: &[CatalogEntry],
    candidates: impl Iterator<Item = usize>,
    key_of: impl Fn(&CatalogEntry) -> Option<DuplicateKey>,
) -> Vec<DuplicateGroup> {
    let mut buckets: HashMap<(i64, DuplicateKey), Vec<usize>> = HashMap::new();
    for idx in candidates {
        if let Some(key) = key_of(&entries[idx]) {
            buckets.entry((entries[idx].author_id, key)).or_default().push(idx);
        }
    }

    buckets
        .into_iter()
        .filter(|(_, indexes)| indexes.len() > 1)
        .map(|((author_id, key), indexes)| {
            let survivor_idx = choose_survivor(&indexes, entries);
            let mut removed: Vec<i64> = indexes
                .iter()
                .copied()
                .filter(|idx| *idx != survivor_idx)
                .map(|idx| entries[idx].id)
                .collect();
            removed.sort_unstable();
            DuplicateGroup {
                author_id,
                key,
                survivor: entries[survivor_idx].id,
                removed,
            }
        })
        .collect()
}

/// Groups active entries of the same author, first by title key, then whatever
/// survives that pass by ISBN.
///
/// Inactive rows never participate. Groups come back sorted by `(author_id, key)`
/// with every title group ahead of the ISBN groups.
pub fn find_duplicates(entries: &[CatalogEntry]) -> Vec<DuplicateGroup> {
    let active = move || (0..entries.len()).filter(move |idx| entries[*idx].is_active());

    let mut groups = group_by(entries, active(), |e| Some(title_key(e)));
    let title_losers: HashSet<i64> = groups.iter().flat_map(|g| g.removed.iter().copied()).collect();

    groups.extend(group_by(
        entries,
        active().filter(|idx| !title_losers.contains(&entries[*idx].id)),
        |e| e.isbn.as_deref().and_then(isbn_key).map(DuplicateKey::Isbn),
    ));

    groups.sort_by(|a, b| (a.author_id, &a.key).cmp(&(b.author_id, &b.key)));
    groups
}

/// Highest completeness wins; ties go to the earliest fetch, then the lowest id.
fn choose_survivor(indexes: &[usize], entries: &[CatalogEntry]) -> usize {
    let mut best = indexes[0];
    for idx in indexes.iter().copied().skip(1) {
        let (cand, cur) = (&entries[idx], &entries[best]);
        let better = cand
            .completeness_score()
            .cmp(&cur.completeness_score())
            .then_with(|| cur.fetched_at.cmp(&cand.fetched_at))
            .then_with(|| cur.id.cmp(&cand.id))
            .is_gt();
        if better {
            best = idx;
        }
    }
    best
}

/// Soft-deletes duplicate entries for one author. Returns how many rows were removed.
pub fn dedupe_author_titles(conn: &Connection, author_id: i64) -> Result<usize> {
    let catalog = SqliteCatalogRepository::new(conn);
    let entries = catalog.list_active_for_author(author_id)?;

    let mut removed = 0;
    for group in find_duplicates(&entries) {
        for id in &group.removed {
            catalog.set_status(*id, EntryStatus::RemovedDuplicate)?;
            removed += 1;
        }
        info!(
            author_id,
            key = %group.key,
            survivor = group.survivor,
            removed = group.removed.len(),
            "removed duplicate entries"
        );
    }
    Ok(removed)
}

/// Runs title dedup over every live author in one transaction.
pub fn dedupe_all_titles(db: &Database) -> Result<usize> {
    db.with_transaction(|tx| {
        let authors = SqliteAuthorRepository::new(tx).list_live()?;
        let mut removed = 0;
        for author in authors {
            removed += dedupe_author_titles(tx, author.id)?;
        }
        Ok(removed)
    })
}
