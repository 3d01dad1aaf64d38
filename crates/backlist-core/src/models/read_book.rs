use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookFormat {
    Audiobook,
    Ebook,
    #[default]
    Unknown,
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audiobook => write!(f, "audiobook"),
            Self::Ebook => write!(f, "ebook"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for BookFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audiobook" => Ok(Self::Audiobook),
            "ebook" => Ok(Self::Ebook),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid BookFormat: {s}")),
        }
    }
}

/// One entry of the reading history. Immutable after ingest except `matched`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadBook {
    pub id: i64,
    pub title: String,
    pub normalized_title: String,
    /// Weak reference to `Author::normalized_name`.
    pub author_key: String,
    pub format: BookFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_at: Option<DateTime<Utc>>,
    pub source_row_id: String,
    /// Set when a catalog entry of the same author has the same title key.
    #[serde(default)]
    pub matched: bool,
}

/// Fields needed to insert a read book.
#[derive(Debug, Clone, PartialEq)]
pub struct NewReadBook {
    pub title: String,
    pub normalized_title: String,
    pub author_key: String,
    pub format: BookFormat,
    pub read_at: Option<DateTime<Utc>>,
    pub source_row_id: String,
}

/// Candidate record handed over by the history importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadBookRecord {
    pub title: String,
    pub author_name: String,
    /// When absent the format is derived from `publisher`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<BookFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loan_date: Option<DateTime<Utc>>,
    pub source_row_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_format_roundtrip() {
        for format in [BookFormat::Audiobook, BookFormat::Ebook, BookFormat::Unknown] {
            assert_eq!(format.to_string().parse::<BookFormat>().unwrap(), format);
        }
        assert!("vinyl".parse::<BookFormat>().is_err());
    }

    #[test]
    fn test_record_accepts_missing_optionals() {
        let record: ReadBookRecord = serde_json::from_str(
            r#"{"title": "Anne of Green Gables", "author_name": "L. M. Montgomery", "source_row_id": "r1"}"#,
        )
        .unwrap();
        assert_eq!(record.format, None);
        assert_eq!(record.loan_date, None);
    }
}
