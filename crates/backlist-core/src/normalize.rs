//! Identity normalization for titles and author names.
//!
//! Every function here is pure, total and idempotent: feeding an output back in
//! returns it unchanged. Keys are compared with plain string equality.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::BookFormat;

static TRAILING_ANNOTATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*([\(\[])([^()\[\]]*)[\)\]]\s*$").expect("valid regex"));

static SERIES_OR_EDITION_CUE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?ix)
        \bseries\b
        | \bbook\s*\#?\s*\d+
        | \#\s*\d+
        | \bvol(?:ume)?\.?\s*\d+
        | \b\d+\s+of\s+\d+\b
        | \bedition\b
        | \bversion\b
        | \btranslation\b
        | \bed\.",
    )
    .expect("valid regex")
});

static SPLIT_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\s*/\s*\d+\s*$").expect("valid regex"));

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));

static SERIES_ANNOTATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(.+?)(?:,)?(?:\s+book)?\s*#?\s*(\d+)\s*$").expect("valid regex")
});

const ARTICLES: &[&str] = &["the", "a", "an"];

/// Closed denylist of credential suffixes, compared after punctuation is removed.
const CREDENTIALS: &[&str] = &[
    "phd", "md", "dds", "dvm", "do", "rn", "np", "mba", "msw", "lcsw", "lpc", "psyd", "edd",
    "jd", "esq", "cpa", "mph", "mft",
];

const HONORIFICS: &[&str] = &["dr", "prof", "professor", "rev", "reverend", "mr", "mrs", "ms"];

const AUDIOBOOK_PUBLISHERS: &[&str] = &[
    "books on tape",
    "tantor media",
    "simon & schuster audio",
    "hachette audio",
    "penguin audio",
    "harperaudio",
    "random house audio",
    "macmillan audio",
    "recorded books",
    "blackstone audio",
    "brilliance audio",
    "audible",
];

// ─── Titles ─────────────────────────────────────────────────────────────────

/// Canonical comparison key for a title.
///
/// Drops trailing series/edition annotations ("(Sunrise at Normandy Book #1)",
/// "(French Edition)", "[1/2]"), apostrophes and other punctuation, case, and a single
/// leading article.
pub fn normalize_title(raw: &str) -> String {
    let mut title = raw.trim();
    while let Some(stripped) = strip_trailing_annotation(title) {
        title = stripped;
    }

    let tokens = title_tokens(title);
    let skip = usize::from(
        tokens.len() >= 2 && is_article(&tokens[0]) && !is_article(&tokens[1]),
    );
    tokens[skip..].join(" ")
}

fn strip_trailing_annotation(title: &str) -> Option<&str> {
    let caps = TRAILING_ANNOTATION.captures(title)?;
    let whole = caps.get(0)?;
    let opener = caps.get(1)?.as_str();
    let content = caps.get(2)?.as_str();

    let is_annotation = SERIES_OR_EDITION_CUE.is_match(content)
        || (opener == "[" && SPLIT_MARKER.is_match(content));
    let rest = title[..whole.start()].trim_end();
    if is_annotation && !rest.is_empty() {
        Some(rest)
    } else {
        None
    }
}

fn title_tokens(title: &str) -> Vec<String> {
    let lowered = title.to_lowercase();
    let cleaned: String = lowered
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{2018}' | '\u{2019}' | '`'))
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    cleaned.split_whitespace().map(str::to_string).collect()
}

fn is_article(token: &str) -> bool {
    ARTICLES.contains(&token)
}

// ─── Authors ────────────────────────────────────────────────────────────────

/// Canonical comparison key for an author name.
///
/// Lowercases, drops punctuation, strips trailing credentials ("PhD", "M.D.") and
/// drops middle initials, so "Julia R. Kelly" and "Julia Kelly" share a key.
pub fn normalize_author(raw: &str) -> String {
    let mut tokens = name_tokens(raw);
    loop {
        let next = author_step(&tokens);
        if next == tokens {
            break;
        }
        tokens = next;
    }
    tokens.join(" ")
}

/// Form used for duplicate-author detection: parenthetical asides such as
/// "(Lucy Maud)" are removed before normalizing.
pub fn author_match_form(raw: &str) -> String {
    normalize_author(&PARENTHETICAL.replace_all(raw, " "))
}

fn name_tokens(raw: &str) -> Vec<String> {
    raw.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn author_step(tokens: &[String]) -> Vec<String> {
    let mut out = tokens.to_vec();

    loop {
        let n = out.len();
        if n > 2 && is_credential(&format!("{}{}", out[n - 2], out[n - 1])) {
            out.truncate(n - 2);
        } else if n > 1 && is_credential(&out[n - 1]) {
            out.truncate(n - 1);
        } else {
            break;
        }
    }

    if out.len() > 2 {
        let last = out.len() - 1;
        out = out
            .into_iter()
            .enumerate()
            .filter(|(idx, token)| *idx == 0 || *idx == last || token.chars().count() > 1)
            .map(|(_, token)| token)
            .collect();
    }
    out
}

fn is_credential(token: &str) -> bool {
    CREDENTIALS.contains(&token)
}

/// True when a name is nothing but credentials or honorifics, e.g. "PhD" or "Dr.".
pub fn is_credential_only(raw: &str) -> bool {
    let tokens = name_tokens(raw);
    if tokens.is_empty() {
        return false;
    }
    let joined = tokens.concat();
    let known = |t: &str| CREDENTIALS.contains(&t) || HONORIFICS.contains(&t);
    known(&joined) || tokens.iter().all(|t| known(t))
}

/// Splits a comma-joined group like "Jane Doe, John Smith" into its members.
///
/// Returns `None` for single names, "Doe, Jane" style inversions and trailing
/// credentials ("Jane Doe, PhD").
pub fn split_author_group(raw: &str) -> Option<Vec<String>> {
    if !raw.contains(',') {
        return None;
    }

    let members: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|part| part.chars().count() > 2)
        .filter(|part| !is_credential_only(part))
        .map(str::to_string)
        .collect();

    let all_full_names = members.iter().all(|m| name_tokens(m).len() >= 2);
    if members.len() >= 2 && all_full_names {
        Some(members)
    } else {
        None
    }
}

// ─── Series / format ────────────────────────────────────────────────────────

/// Parses "Title (Series Name Book #3)" style annotations into `(series, position)`.
pub fn extract_series(title: &str) -> Option<(String, u32)> {
    let open = title.find('(')?;
    let close = open + title[open..].find(')')?;
    let inner = &title[open + 1..close];

    let caps = SERIES_ANNOTATION.captures(inner.trim())?;
    let mut name = caps.get(1)?.as_str().trim().trim_end_matches(',').trim().to_string();
    if name.to_lowercase().ends_with(" book") {
        name.truncate(name.len() - " book".len());
    }
    let position = caps.get(2)?.as_str().parse::<u32>().ok()?;

    if name.chars().count() > 2 {
        Some((name, position))
    } else {
        None
    }
}

/// Derives the reading format from the lending publisher.
pub fn detect_format(publisher: Option<&str>) -> BookFormat {
    let Some(publisher) = publisher.map(str::trim).filter(|p| !p.is_empty()) else {
        return BookFormat::Unknown;
    };
    let lowered = publisher.to_lowercase();
    if AUDIOBOOK_PUBLISHERS.iter().any(|p| lowered.contains(p)) {
        BookFormat::Audiobook
    } else {
        BookFormat::Ebook
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_series_suffix_and_article_share_a_key() {
        assert_eq!(
            normalize_title("The Sea Before Us"),
            normalize_title("Sea Before Us (Sunrise at Normandy Book #1)")
        );
        assert_eq!(normalize_title("The Sea Before Us"), "sea before us");
    }

    #[test]
    fn title_strips_exactly_one_article() {
        assert_eq!(normalize_title("A Tale of Two Cities"), "tale of two cities");
        assert_eq!(normalize_title("An Echo in the Bone"), "echo in the bone");
        assert_eq!(normalize_title("The A-Team"), "the a team");
        assert_eq!(normalize_title("The"), "the");
    }

    #[test]
    fn title_keeps_non_series_parentheticals() {
        assert_eq!(normalize_title("Emma (Illustrated)"), "emma illustrated");
        assert_eq!(normalize_title("Persuasion (Penguin Classics Edition)"), "persuasion");
        assert_eq!(normalize_title("Dune [1/2]"), "dune");
        assert_eq!(normalize_title("(Book 1)"), "book 1");
    }

    #[test]
    fn title_punctuation_and_apostrophes() {
        assert_eq!(normalize_title("Don't  Look   Back!"), "dont look back");
        assert_eq!(normalize_title("Don\u{2019}t Look Back"), "dont look back");
        assert_eq!(normalize_title("Anne of Green Gables: A Novel"), "anne of green gables a novel");
    }

    #[test]
    fn title_normalization_is_idempotent() {
        let samples = [
            "The Sea Before Us",
            "Sea Before Us (Sunrise at Normandy Book #1)",
            "A A Milne Stories",
            "The A-Team",
            "An",
            "  Rilla of Ingleside (Anne of Green Gables, #8) [1/2] ",
            "La Casa de los Espíritus (Spanish Edition)",
            "İstanbul",
            "",
        ];
        for raw in samples {
            let once = normalize_title(raw);
            assert_eq!(normalize_title(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn author_middle_initials_collapse() {
        assert_eq!(normalize_author("Julia R. Kelly"), normalize_author("Julia Kelly"));
        assert_eq!(normalize_author("Julia R. Kelly"), "julia kelly");
        assert_eq!(normalize_author("L. M. Montgomery"), "l montgomery");
    }

    #[test]
    fn author_credentials_are_stripped() {
        assert_eq!(normalize_author("Jane Doe, PhD"), "jane doe");
        assert_eq!(normalize_author("Jane Doe Ph.D."), "jane doe");
        assert_eq!(normalize_author("John Smith M.D."), "john smith");
        assert_eq!(normalize_author("John Smith MD PhD"), "john smith");
        assert_eq!(normalize_author("PhD"), "phd");
    }

    #[test]
    fn author_keys_keep_parenthetical_names() {
        assert_eq!(
            normalize_author("L. M. (Lucy Maud) Montgomery"),
            "l lucy maud montgomery"
        );
        assert_eq!(
            author_match_form("L. M. (Lucy Maud) Montgomery"),
            author_match_form("L. M. Montgomery")
        );
    }

    #[test]
    fn author_normalization_is_idempotent() {
        let samples = [
            "Julia R. Kelly",
            "L. M. (Lucy Maud) Montgomery",
            "John Ph X D",
            "J. R. R. Tolkien",
            "Dr. Seuss",
            "md phd",
            "   ",
        ];
        for raw in samples {
            let once = normalize_author(raw);
            assert_eq!(normalize_author(&once), once, "not idempotent for {raw:?}");
            let form = author_match_form(raw);
            assert_eq!(author_match_form(&form), form);
        }
    }

    #[test]
    fn credential_only_names() {
        assert!(is_credential_only("PhD"));
        assert!(is_credential_only("Ph.D."));
        assert!(is_credential_only("M. D."));
        assert!(is_credential_only("Dr."));
        assert!(!is_credential_only("Dr. Seuss"));
        assert!(!is_credential_only(""));
    }

    #[test]
    fn author_groups() {
        assert_eq!(
            split_author_group("Jane Doe, John Smith, Ann Lee"),
            Some(vec![
                "Jane Doe".to_string(),
                "John Smith".to_string(),
                "Ann Lee".to_string()
            ])
        );
        assert_eq!(split_author_group("Jane Doe, PhD"), None);
        assert_eq!(split_author_group("Doe, Jane"), None);
        assert_eq!(split_author_group("Jane Doe"), None);
    }

    #[test]
    fn series_extraction() {
        assert_eq!(
            extract_series("Sea Before Us (Sunrise at Normandy Book #1)"),
            Some(("Sunrise at Normandy".to_string(), 1))
        );
        assert_eq!(
            extract_series("Rilla of Ingleside (Anne of Green Gables, #8)"),
            Some(("Anne of Green Gables".to_string(), 8))
        );
        assert_eq!(extract_series("Emma (Illustrated)"), None);
        assert_eq!(extract_series("Emma"), None);
    }

    #[test]
    fn format_from_publisher() {
        assert_eq!(detect_format(Some("Tantor Media, Inc.")), BookFormat::Audiobook);
        assert_eq!(detect_format(Some("HarperCollins")), BookFormat::Ebook);
        assert_eq!(detect_format(None), BookFormat::Unknown);
        assert_eq!(detect_format(Some("  ")), BookFormat::Unknown);
    }
}
