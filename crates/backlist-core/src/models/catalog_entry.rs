use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatHint {
    Audiobook,
    Ebook,
    Both,
    #[default]
    Unknown,
}

impl std::fmt::Display for FormatHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audiobook => write!(f, "audiobook"),
            Self::Ebook => write!(f, "ebook"),
            Self::Both => write!(f, "both"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for FormatHint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audiobook" => Ok(Self::Audiobook),
            "ebook" => Ok(Self::Ebook),
            "both" => Ok(Self::Both),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid FormatHint: {s}")),
        }
    }
}

/// Soft-delete state. Removed rows stay in the table for audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryStatus {
    #[default]
    Active,
    RemovedDuplicate,
    RemovedNonEnglish,
}

impl std::fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::RemovedDuplicate => write!(f, "removed-duplicate"),
            Self::RemovedNonEnglish => write!(f, "removed-non-english"),
        }
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "removed-duplicate" => Ok(Self::RemovedDuplicate),
            "removed-non-english" => Ok(Self::RemovedNonEnglish),
            _ => Err(format!("Invalid EntryStatus: {s}")),
        }
    }
}

/// One work attributed to an author by the external catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: i64,
    pub author_id: i64,
    pub title: String,
    pub normalized_title: String,
    /// External work identifier, the idempotency key for skip-if-exists.
    pub work_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_year: Option<i32>,
    pub format_hint: FormatHint,
    /// ISO 639-2 code such as `eng`; `None` until classified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub has_cover: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<u32>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_position: Option<u32>,
    pub status: EntryStatus,
    pub fetched_at: DateTime<Utc>,
}

impl CatalogEntry {
    pub fn is_active(&self) -> bool {
        self.status == EntryStatus::Active
    }

    /// Heuristic richness used to pick the survivor among duplicate titles.
    pub fn completeness_score(&self) -> u32 {
        let mut score = 0;
        if self.isbn.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            score += 10;
        }
        if self.description.as_deref().is_some_and(|s| !s.trim().is_empty()) {
            score += 5;
        }
        if self.has_cover {
            score += 3;
        }
        if self.page_count.is_some_and(|p| p > 0) {
            score += 2;
        }
        if self.publish_year.is_some() {
            score += 1;
        }
        score
    }
}

/// Fields needed to insert a freshly fetched entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewCatalogEntry {
    pub author_id: i64,
    pub title: String,
    pub normalized_title: String,
    pub work_id: String,
    pub publish_year: Option<i32>,
    pub format_hint: FormatHint,
    pub language: Option<String>,
    pub isbn: Option<String>,
    pub description: Option<String>,
    pub has_cover: bool,
    pub page_count: Option<u32>,
    pub categories: Vec<String>,
    pub series_name: Option<String>,
    pub series_position: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> CatalogEntry {
        CatalogEntry {
            id: 1,
            author_id: 1,
            title: "Emily of New Moon".to_string(),
            normalized_title: "emily of new moon".to_string(),
            work_id: "/works/OL1W".to_string(),
            publish_year: None,
            format_hint: FormatHint::Unknown,
            language: None,
            isbn: None,
            description: None,
            has_cover: false,
            page_count: None,
            categories: Vec::new(),
            series_name: None,
            series_position: None,
            status: EntryStatus::Active,
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn test_completeness_prefers_isbn_over_cover_and_pages() {
        let mut with_isbn = entry();
        with_isbn.isbn = Some("9780553213133".to_string());

        let mut with_cover_and_pages = entry();
        with_cover_and_pages.has_cover = true;
        with_cover_and_pages.page_count = Some(320);
        with_cover_and_pages.publish_year = Some(1923);

        assert_eq!(entry().completeness_score(), 0);
        assert!(with_isbn.completeness_score() > with_cover_and_pages.completeness_score());
    }

    #[test]
    fn test_blank_fields_do_not_score() {
        let mut e = entry();
        e.isbn = Some("  ".to_string());
        e.description = Some(String::new());
        e.page_count = Some(0);
        assert_eq!(e.completeness_score(), 0);
    }

    #[test]
    fn test_status_display_matches_storage_form() {
        assert_eq!(EntryStatus::RemovedDuplicate.to_string(), "removed-duplicate");
        assert_eq!(
            "removed-non-english".parse::<EntryStatus>().unwrap(),
            EntryStatus::RemovedNonEnglish
        );
    }
}
