use serde::Serialize;

use crate::error::Result;
use crate::models::Author;
use crate::normalize::author_match_form;
use crate::storage::{AuthorRepository, Database, SqliteAuthorRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateReason {
    /// Both resolved to the same catalog author.
    SameExternalId,
    /// Keys agree once parenthetical asides are dropped.
    SameMatchForm,
    /// One key appears inside the other on word boundaries.
    BoundedSubstring,
}

impl std::fmt::Display for CandidateReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SameExternalId => "same-external-id",
            Self::SameMatchForm => "same-match-form",
            Self::BoundedSubstring => "bounded-substring",
        };
        f.write_str(name)
    }
}

/// A pair of live authors suspected to be the same person. Never merged implicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeCandidate {
    pub first_id: i64,
    pub first_name: String,
    pub second_id: i64,
    pub second_name: String,
    pub reason: CandidateReason,
}

/// Decides whether two authors look like the same person.
///
/// A shared external id settles it. Otherwise display names are compared in match form
/// (parenthetical asides dropped), normalized keys by the word-bounded substring rule.
pub fn candidate_reason(a: &Author, b: &Author) -> Option<CandidateReason> {
    if let (Some(x), Some(y)) = (&a.external_id, &b.external_id)
        && x == y
    {
        return Some(CandidateReason::SameExternalId);
    }
    let form_a = author_match_form(&a.name);
    if !form_a.is_empty() && form_a == author_match_form(&b.name) {
        return Some(CandidateReason::SameMatchForm);
    }
    is_bounded_substring(&a.normalized_name, &b.normalized_name)
        .then_some(CandidateReason::BoundedSubstring)
}

/// The shorter key must have at least two tokens so a bare surname never pairs with
/// everyone who shares it.
pub fn is_bounded_substring(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    if short.is_empty() || short == long || short.split_whitespace().count() < 2 {
        return false;
    }
    format!(" {long} ").contains(&format!(" {short} "))
}

/// Pairwise comparison over non-superseded authors, ordered by id pair.
pub fn find_author_candidates(authors: &[Author]) -> Vec<MergeCandidate> {
    let mut live: Vec<&Author> = authors.iter().filter(|a| !a.is_superseded()).collect();
    live.sort_by_key(|a| a.id);

    let mut candidates = Vec::new();
    for (i, first) in live.iter().enumerate() {
        for second in live.iter().skip(i + 1) {
            if let Some(reason) = candidate_reason(first, second) {
                candidates.push(MergeCandidate {
                    first_id: first.id,
                    first_name: first.name.clone(),
                    second_id: second.id,
                    second_name: second.name.clone(),
                    reason,
                });
            }
        }
    }
    candidates
}

pub fn merge_candidates(db: &Database) -> Result<Vec<MergeCandidate>> {
    let conn = db.connection();
    let authors = SqliteAuthorRepository::new(&conn).list_live()?;
    Ok(find_author_candidates(&authors))
}
