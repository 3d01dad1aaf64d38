use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical person behind one or more read books and a fetched catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    /// Comparison key from `normalize::normalize_author`; unique among live authors.
    pub normalized_name: String,
    /// External catalog identifier, e.g. `OL23919A`. Unset until resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_catalog_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hidden: bool,
    /// Set once this author has been merged into another one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merged_into: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Author {
    pub fn is_superseded(&self) -> bool {
        self.merged_into.is_some()
    }
}

/// Fields needed to create an author row.
#[derive(Debug, Clone)]
pub struct NewAuthor {
    pub name: String,
    pub normalized_name: String,
}
