use std::collections::HashSet;

use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use super::authors::MergeCandidate;
use super::titles::{dedupe_author_titles, find_duplicates};
use crate::error::{BacklistError, Result};
use crate::models::{Author, CatalogEntry, EntryStatus};
use crate::storage::{
    AuthorRepository, CatalogRepository, Database, ReadBookRepository, Repository,
    SqliteAuthorRepository, SqliteCatalogRepository, SqliteReadBookRepository,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorSummary {
    pub id: i64,
    pub name: String,
    pub active_entries: usize,
}

/// What a merge would do, computed without writing anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergePreview {
    pub survivor: AuthorSummary,
    pub loser: AuthorSummary,
    pub entries_to_move: usize,
    pub read_books_to_move: usize,
    /// Active loser entries whose work id the survivor already holds.
    pub work_id_collisions: usize,
    /// Title or ISBN keys that will collide once the catalogs are combined.
    pub title_collisions: Vec<String>,
    pub resulting_active_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeResult {
    pub survivor_id: i64,
    pub loser_id: i64,
    pub entries_moved: usize,
    pub read_books_moved: usize,
    pub duplicates_removed: usize,
    pub survivor_active_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeOutcome {
    Preview(MergePreview),
    Applied(MergeResult),
}

struct MergePlan {
    work_id_collisions: Vec<i64>,
    title_collisions: Vec<String>,
    resulting_active_entries: usize,
}

/// Active loser entries duplicating a survivor work id are dropped first; title dedup
/// then runs over what is left of both catalogs.
fn plan_merge(survivor: &[CatalogEntry], loser: &[CatalogEntry], survivor_id: i64) -> MergePlan {
    let survivor_works: HashSet<&str> = survivor.iter().map(|e| e.work_id.as_str()).collect();
    let work_id_collisions: Vec<i64> = loser
        .iter()
        .filter(|e| survivor_works.contains(e.work_id.as_str()))
        .map(|e| e.id)
        .collect();

    let combined: Vec<CatalogEntry> = survivor
        .iter()
        .cloned()
        .chain(
            loser
                .iter()
                .filter(|e| !work_id_collisions.contains(&e.id))
                .cloned()
                .map(|mut e| {
                    e.author_id = survivor_id;
                    e
                }),
        )
        .collect();

    let groups = find_duplicates(&combined);
    let removed: usize = groups.iter().map(|g| g.removed.len()).sum();
    MergePlan {
        work_id_collisions,
        title_collisions: groups.into_iter().map(|g| g.key.to_string()).collect(),
        resulting_active_entries: combined.len() - removed,
    }
}

fn load_side(authors: &SqliteAuthorRepository<'_>, id: i64) -> Result<Author> {
    let author = authors
        .find_by_id(&id)?
        .ok_or_else(|| BacklistError::AuthorNotFound(id.to_string()))?;
    if let Some(target) = author.merged_into {
        return Err(BacklistError::DataIntegrity(format!(
            "author {id} was already merged into {target}"
        )));
    }
    Ok(author)
}

fn summary(author: &Author, active_entries: usize) -> AuthorSummary {
    AuthorSummary {
        id: author.id,
        name: author.name.clone(),
        active_entries,
    }
}

fn preview(conn: &Connection, survivor: &Author, loser: &Author) -> Result<MergePreview> {
    let catalog = SqliteCatalogRepository::new(conn);
    let survivor_entries = catalog.list_active_for_author(survivor.id)?;
    let loser_entries = catalog.list_active_for_author(loser.id)?;
    let plan = plan_merge(&survivor_entries, &loser_entries, survivor.id);

    Ok(MergePreview {
        survivor: summary(survivor, survivor_entries.len()),
        loser: summary(loser, loser_entries.len()),
        entries_to_move: catalog.list_for_author(loser.id)?.len(),
        read_books_to_move: SqliteReadBookRepository::new(conn)
            .list_for_author_key(&loser.normalized_name)?
            .len(),
        work_id_collisions: plan.work_id_collisions.len(),
        title_collisions: plan.title_collisions,
        resulting_active_entries: plan.resulting_active_entries,
    })
}

/// Reassigns every reference from `loser` to `survivor`. Must run inside a transaction.
fn apply_merge(conn: &Connection, survivor: &Author, loser: &Author) -> Result<MergeResult> {
    let authors = SqliteAuthorRepository::new(conn);
    let catalog = SqliteCatalogRepository::new(conn);
    let books = SqliteReadBookRepository::new(conn);

    let survivor_entries = catalog.list_active_for_author(survivor.id)?;
    let loser_entries = catalog.list_active_for_author(loser.id)?;
    let plan = plan_merge(&survivor_entries, &loser_entries, survivor.id);

    for id in &plan.work_id_collisions {
        catalog.set_status(*id, EntryStatus::RemovedDuplicate)?;
    }
    let entries_moved = catalog.reassign_author(loser.id, survivor.id)?;
    let read_books_moved = books.reassign_author_key(&loser.normalized_name, &survivor.normalized_name)?;

    if survivor.external_id.is_none()
        && let Some(external_id) = loser.external_id.as_deref()
    {
        authors.set_external_id(survivor.id, external_id)?;
    }

    let duplicates_removed = plan.work_id_collisions.len() + dedupe_author_titles(conn, survivor.id)?;
    authors.mark_merged(loser.id, survivor.id)?;

    if !catalog.list_for_author(loser.id)?.is_empty()
        || !books.list_for_author_key(&loser.normalized_name)?.is_empty()
    {
        return Err(BacklistError::DataIntegrity(format!(
            "references to author {} remain after merge",
            loser.id
        )));
    }
    books.refresh_matched(&survivor.normalized_name, survivor.id)?;

    Ok(MergeResult {
        survivor_id: survivor.id,
        loser_id: loser.id,
        entries_moved,
        read_books_moved,
        duplicates_removed,
        survivor_active_entries: catalog.count_active_for_author(survivor.id)?,
    })
}

/// Merges `id_b` into `id_a`. With `dry_run` nothing is written.
///
/// The applied merge is a single transaction: on any error every reference still points
/// at the loser and the loser is not superseded.
pub fn merge_authors(db: &Database, id_a: i64, id_b: i64, dry_run: bool) -> Result<MergeOutcome> {
    if id_a == id_b {
        return Err(BacklistError::IdentityConflict(format!(
            "cannot merge author {id_a} into itself"
        )));
    }

    if dry_run {
        let conn = db.connection();
        let authors = SqliteAuthorRepository::new(&conn);
        let survivor = load_side(&authors, id_a)?;
        let loser = load_side(&authors, id_b)?;
        return Ok(MergeOutcome::Preview(preview(&conn, &survivor, &loser)?));
    }

    let result = db.with_transaction(|tx| {
        let authors = SqliteAuthorRepository::new(tx);
        let survivor = load_side(&authors, id_a)?;
        let loser = load_side(&authors, id_b)?;
        apply_merge(tx, &survivor, &loser)
    });

    match result {
        Ok(result) => {
            info!(
                survivor = result.survivor_id,
                loser = result.loser_id,
                entries_moved = result.entries_moved,
                read_books_moved = result.read_books_moved,
                duplicates_removed = result.duplicates_removed,
                "merged authors"
            );
            Ok(MergeOutcome::Applied(result))
        }
        Err(e) => {
            warn!(survivor = id_a, loser = id_b, error = %e, "merge aborted, nothing changed");
            Err(e)
        }
    }
}

/// Applies every candidate pair. The survivor is the side with more active entries
/// (lower id on ties); pairs touching an author merged earlier in the batch are skipped.
pub fn auto_merge(db: &Database, candidates: &[MergeCandidate]) -> Result<Vec<MergeResult>> {
    let mut results = Vec::new();
    for candidate in candidates {
        let (first, second) = {
            let conn = db.connection();
            let authors = SqliteAuthorRepository::new(&conn);
            let catalog = SqliteCatalogRepository::new(&conn);
            let first = authors.find_by_id(&candidate.first_id)?;
            let second = authors.find_by_id(&candidate.second_id)?;
            match (first, second) {
                (Some(a), Some(b)) if !a.is_superseded() && !b.is_superseded() => (
                    (a.id, catalog.count_active_for_author(a.id)?),
                    (b.id, catalog.count_active_for_author(b.id)?),
                ),
                _ => continue,
            }
        };

        let (survivor, loser) = if second.1 > first.1 || (second.1 == first.1 && second.0 < first.0) {
            (second.0, first.0)
        } else {
            (first.0, second.0)
        };

        match merge_authors(db, survivor, loser, false) {
            Ok(MergeOutcome::Applied(result)) => results.push(result),
            Ok(MergeOutcome::Preview(_)) => {}
            Err(e) if matches!(e, BacklistError::Database(_)) => return Err(e),
            // one bad pair does not stop the rest
            Err(e) => warn!(survivor, loser, error = %e, "skipping merge candidate"),
        }
    }
    Ok(results)
}
