use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const LAST_INGEST_AT: &str = "last_ingest_at";
pub const LAST_CATALOG_RUN_AT: &str = "last_catalog_run_at";

/// One row of process-wide key/value state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetadata {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}
