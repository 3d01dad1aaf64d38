use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::FormatHint;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackState {
    #[default]
    Neutral,
    ThumbsUp,
    ThumbsDown,
    AlreadyRead,
    Duplicate,
    NonEnglish,
}

impl FeedbackState {
    /// Feedback that removes an entry from the eligible-unread set.
    pub fn excludes(&self) -> bool {
        matches!(
            self,
            Self::ThumbsDown | Self::AlreadyRead | Self::Duplicate | Self::NonEnglish
        )
    }
}

impl std::fmt::Display for FeedbackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Neutral => write!(f, "neutral"),
            Self::ThumbsUp => write!(f, "thumbs_up"),
            Self::ThumbsDown => write!(f, "thumbs_down"),
            Self::AlreadyRead => write!(f, "already_read"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::NonEnglish => write!(f, "non_english"),
        }
    }
}

impl std::str::FromStr for FeedbackState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "neutral" => Ok(Self::Neutral),
            "thumbs_up" => Ok(Self::ThumbsUp),
            "thumbs_down" => Ok(Self::ThumbsDown),
            "already_read" => Ok(Self::AlreadyRead),
            "duplicate" => Ok(Self::Duplicate),
            "non_english" => Ok(Self::NonEnglish),
            _ => Err(format!("Invalid FeedbackState: {s}")),
        }
    }
}

/// Format requested from the scorer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatFilter {
    Audiobook,
    Ebook,
    #[default]
    Any,
}

impl FormatFilter {
    /// Entries with an unknown format are offered for every filter.
    pub fn matches(&self, hint: FormatHint) -> bool {
        match self {
            Self::Any => true,
            Self::Audiobook => matches!(
                hint,
                FormatHint::Audiobook | FormatHint::Both | FormatHint::Unknown
            ),
            Self::Ebook => matches!(hint, FormatHint::Ebook | FormatHint::Both | FormatHint::Unknown),
        }
    }
}

impl std::fmt::Display for FormatFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Audiobook => write!(f, "audiobook"),
            Self::Ebook => write!(f, "ebook"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl std::str::FromStr for FormatFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audiobook" => Ok(Self::Audiobook),
            "ebook" => Ok(Self::Ebook),
            "any" => Ok(Self::Any),
            _ => Err(format!("Invalid FormatFilter: {s}")),
        }
    }
}

/// Ordering of recommendation groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOrder {
    /// Descending eligible count, ties by author key.
    #[default]
    Count,
    /// Display name, ties by author key.
    Alpha,
}

impl std::str::FromStr for GroupOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "count" => Ok(Self::Count),
            "alpha" => Ok(Self::Alpha),
            _ => Err(format!("Invalid GroupOrder: {s}")),
        }
    }
}

/// Persisted snapshot of one eligible entry plus the user's feedback on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: i64,
    pub catalog_entry_id: i64,
    /// Filter of the snapshot that last saved this row.
    pub format: FormatFilter,
    pub feedback: FeedbackState,
    pub generated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_at: Option<DateTime<Utc>>,
}
