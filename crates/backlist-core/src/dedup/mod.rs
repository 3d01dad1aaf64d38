//! Duplicate-entry and duplicate-author detection, plus transactional author merges.

pub mod authors;
pub mod merge;
pub mod titles;

pub use authors::{CandidateReason, MergeCandidate, find_author_candidates, merge_candidates};
pub use merge::{
    AuthorSummary, MergeOutcome, MergePreview, MergeResult, auto_merge, merge_authors,
};
pub use titles::{
    DuplicateGroup, DuplicateKey, dedupe_all_titles, dedupe_author_titles, find_duplicates, isbn_key,
};
