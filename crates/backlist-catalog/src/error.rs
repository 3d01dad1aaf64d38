use backlist_core::BacklistError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Network, TLS or timeout failure from the HTTP layer.
    #[error("HTTP error: {0}")]
    Transient(#[from] reqwest::Error),

    #[error("server error from {url}: HTTP {status}")]
    ServerError { url: String, status: u16 },

    #[error("rate limit from {0}, retry after {1}s")]
    RateLimit(String, u64),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("API error from {0}: {1}")]
    Api(String, String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cache error: {0}")]
    Cache(String),

    #[error(transparent)]
    Storage(#[from] BacklistError),
}

impl CatalogError {
    /// Failures worth retrying on a later run; these feed the consecutive-failure breaker.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CatalogError::Transient(_) | CatalogError::ServerError { .. } | CatalogError::RateLimit(..)
        )
    }
}

pub type Result<T> = std::result::Result<T, CatalogError>;
