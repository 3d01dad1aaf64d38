//! Non-English filtering.
//!
//! A title heuristic settles most entries for free. Whatever it cannot decide costs
//! one paced language lookup against the catalog source. Only entries with no stored
//! language are ever examined, so repeated runs issue no repeat lookups.

use std::sync::atomic::{AtomicBool, Ordering};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use backlist_core::storage::{CatalogRepository, SqliteCatalogRepository};
use backlist_core::{CatalogEntry, Database, EntryStatus};

use crate::error::Result;
use crate::sources::CatalogSource;

pub const ENGLISH: &str = "eng";
/// Stored for entries the heuristic rejected without knowing the actual language.
pub const UNDETERMINED: &str = "und";

const LANGUAGE_NAMES: &str = "french|russian|spanish|german|italian|portuguese|chinese|japanese|\
    korean|arabic|hebrew|polish|dutch|swedish|norwegian|danish|finnish|greek|turkish|hindi|thai|\
    vietnamese|indonesian|malay|tagalog|romanian|hungarian|czech|slovak|croatian|serbian|\
    bulgarian|ukrainian|persian|urdu|bengali|tamil|telugu|marathi|gujarati|kannada|malayalam|\
    punjabi|nepali|sinhala|khmer|mongolian|georgian|armenian|kazakh|uzbek|afrikaans|swahili|\
    zulu|amharic|somali|maltese|icelandic|basque|catalan|galician|welsh|irish|breton";

static NON_LATIN_SCRIPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"[\u{4e00}-\u{9fff}\u{3040}-\u{30ff}\u{ac00}-\u{d7af}\u{0400}-\u{04ff}\u{0600}-\u{06ff}\u{0590}-\u{05ff}\u{0370}-\u{03ff}\u{0e00}-\u{0e7f}\u{0900}-\u{097f}]",
    )
    .expect("valid regex")
});

static HEBREW_TRANSLITERATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bsheloshah\b|\bshel\b|\bbe-|\bve-").expect("valid regex"));

static LANGUAGE_EDITION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\([^)]*\b(?:{LANGUAGE_NAMES})\b[^)]*\)|\[[^\]]*\b(?:{LANGUAGE_NAMES})\b[^\]]*\]|\b(?:{LANGUAGE_NAMES})\s+(?:edition|version|translation)\b"
    ))
    .expect("valid regex")
});

static SPANISH_INDICATOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:edici[oó]n|colecci[oó]n|estuche|libros?|misterio|pr[ií]ncipe)\b")
        .expect("valid regex")
});

/// A foreign article followed by a capitalized word.
static FOREIGN_ARTICLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?i:le|la|les|un|une|des|du|el|los|las|una|uno|der|die|das|ein|eine)\s+[A-Z]")
        .expect("valid regex")
});

const ENGLISH_STOPWORDS: &[&str] = &[
    "the", "of", "and", "a", "an", "in", "on", "to", "for", "with", "from", "by", "at", "my",
    "your", "his", "her", "our", "their", "is", "are", "was", "how", "what", "why", "who",
    "when", "where", "you", "i", "me", "we", "it", "this", "that", "not", "no", "be", "all",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LanguageVerdict {
    English,
    NonEnglish(&'static str),
    Inconclusive,
}

/// Cheap classification from the title alone.
pub fn classify_title(title: &str) -> LanguageVerdict {
    let title = title.trim();
    if title.is_empty() {
        return LanguageVerdict::Inconclusive;
    }
    if NON_LATIN_SCRIPT.is_match(title) {
        return LanguageVerdict::NonEnglish("non-latin script");
    }
    if HEBREW_TRANSLITERATION.is_match(title) {
        return LanguageVerdict::NonEnglish("hebrew transliteration");
    }
    if LANGUAGE_EDITION.is_match(title) {
        return LanguageVerdict::NonEnglish("language edition marker");
    }
    if !title.to_lowercase().contains("house edition") && SPANISH_INDICATOR.is_match(title) {
        return LanguageVerdict::NonEnglish("spanish indicator");
    }
    if title.contains(['¿', '¡', 'ß']) {
        return LanguageVerdict::NonEnglish("non-english punctuation");
    }

    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() > 2 {
        let hits = FOREIGN_ARTICLE.find_iter(title).count();
        if hits as f64 / words.len() as f64 > 0.3 {
            return LanguageVerdict::NonEnglish("foreign articles");
        }
    }

    let ascii = title
        .chars()
        .all(|c| c.is_ascii() || matches!(c, '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}' | '\u{2013}' | '\u{2014}'));
    let has_stopword = title
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| ENGLISH_STOPWORDS.contains(&w.to_lowercase().as_str()));
    if ascii && has_stopword {
        LanguageVerdict::English
    } else {
        LanguageVerdict::Inconclusive
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageReport {
    /// Entries examined this run.
    pub checked: usize,
    pub removed: usize,
    pub lookups: usize,
    /// Lookups that failed; those entries stay unclassified for the next run.
    pub lookup_failures: usize,
    pub interrupted: bool,
}

fn remove_entry(
    repo: &SqliteCatalogRepository<'_>,
    entry: &CatalogEntry,
    reason: &str,
) -> backlist_core::Result<()> {
    repo.set_status(entry.id, EntryStatus::RemovedNonEnglish)?;
    info!(entry_id = entry.id, title = %entry.title, reason, "removed non-English entry");
    Ok(())
}

/// Classify unclassified active entries and soft-remove the non-English ones.
///
/// Active entries already carrying a non-English tag (from the detail step) are
/// removed without any call.
pub async fn filter_non_english(
    db: &Database,
    source: &dyn CatalogSource,
    cancel: &AtomicBool,
) -> Result<LanguageReport> {
    let mut report = LanguageReport::default();

    let pending = db.with_transaction(|tx| {
        let repo = SqliteCatalogRepository::new(tx);
        for entry in repo.list_active()? {
            if let Some(lang) = entry.language.as_deref()
                && lang != ENGLISH
            {
                remove_entry(&repo, &entry, "tagged language")?;
                report.removed += 1;
            }
        }

        let mut pending = Vec::new();
        for entry in repo.list_unclassified(None)? {
            report.checked += 1;
            match classify_title(&entry.title) {
                LanguageVerdict::English => repo.set_language(entry.id, ENGLISH)?,
                LanguageVerdict::NonEnglish(reason) => {
                    repo.set_language(entry.id, UNDETERMINED)?;
                    remove_entry(&repo, &entry, reason)?;
                    report.removed += 1;
                }
                LanguageVerdict::Inconclusive => pending.push(entry),
            }
        }
        Ok(pending)
    })?;

    for entry in pending {
        if cancel.load(Ordering::Relaxed) {
            report.interrupted = true;
            break;
        }
        report.lookups += 1;
        let language = match source.work_language(&entry.work_id).await {
            // The source has no opinion: assume English, like untagged entries elsewhere.
            Ok(language) => language.unwrap_or_else(|| ENGLISH.to_string()),
            Err(e) => {
                warn!(entry_id = entry.id, work_id = %entry.work_id, error = %e, "language lookup failed");
                report.lookup_failures += 1;
                continue;
            }
        };
        debug!(entry_id = entry.id, language = %language, "language lookup");

        let conn = db.connection();
        let repo = SqliteCatalogRepository::new(&conn);
        repo.set_language(entry.id, &language)?;
        if language != ENGLISH {
            remove_entry(&repo, &entry, "language lookup")?;
            report.removed += 1;
        }
    }

    Ok(report)
}
