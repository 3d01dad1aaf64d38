pub mod config;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod models;
pub mod normalize;
pub mod recommend;
pub mod status;
pub mod storage;

pub use config::AppConfig;
pub use dedup::{MergeCandidate, MergeOutcome, MergePreview, MergeResult, merge_authors};
pub use error::{BacklistError, ExitCode, Result};
pub use ingest::{IngestReport, ingest_read_books};
pub use models::*;
pub use recommend::{
    RecommendationGroup, RecommendationQuery, RecommendedBook, generate_recommendations,
    hide_author, set_feedback, unhide_author,
};
pub use status::{StatusReport, status};
pub use storage::Database;
