use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, warn};

use backlist_core::config::HttpConfig;

use crate::error::{CatalogError, Result};

/// Longest we honour a server's `Retry-After` before giving up on the call.
const MAX_RETRY_AFTER_SECS: u64 = 30;

// ─── RateLimiter ──────────────────────────────────────────────────────────────

/// Process-wide spacing between outbound calls. Share one instance via `Arc`.
pub struct RateLimiter {
    min_interval: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request: Mutex::new(None),
        }
    }

    /// No spacing at all, for tests.
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(t) = *last {
            let elapsed = t.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

// ─── RateLimitedClient ────────────────────────────────────────────────────────

pub struct RateLimitedClient {
    client: reqwest::Client,
    limiter: Arc<RateLimiter>,
    max_retries: u32,
}

impl RateLimitedClient {
    pub fn new(
        limiter: Arc<RateLimiter>,
        max_retries: u32,
        timeout: Duration,
        user_agent: &str,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .gzip(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            limiter,
            max_retries,
        })
    }

    pub fn from_config(config: &HttpConfig, limiter: Arc<RateLimiter>) -> Result<Self> {
        Self::new(
            limiter,
            config.max_retries,
            Duration::from_secs(config.timeout_secs),
            &config.user_agent,
        )
    }

    /// GET with pacing and a bounded retry budget.
    ///
    /// 404 maps to `NotFound`. 429, 5xx and network errors are retried up to
    /// `max_retries` times and then surface as transient errors.
    pub async fn get(&self, url: &str) -> Result<String> {
        let mut attempt = 0u32;
        loop {
            self.limiter.wait().await;
            debug!(url, attempt, "GET");
            let resp = self.client.get(url).send().await;
            match resp {
                Ok(r) if r.status() == StatusCode::NOT_FOUND => {
                    return Err(CatalogError::NotFound(url.to_string()));
                }
                Ok(r) if r.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let wait = r
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|s| s.parse::<u64>().ok())
                        .unwrap_or(MAX_RETRY_AFTER_SECS);
                    if attempt >= self.max_retries || wait > MAX_RETRY_AFTER_SECS {
                        return Err(CatalogError::RateLimit(url.to_string(), wait));
                    }
                    warn!(url, wait, "rate limited, backing off");
                    sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Ok(r) if r.status().is_server_error() => {
                    let status = r.status().as_u16();
                    if attempt >= self.max_retries {
                        return Err(CatalogError::ServerError {
                            url: url.to_string(),
                            status,
                        });
                    }
                    sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    attempt += 1;
                }
                Ok(r) if !r.status().is_success() => {
                    let status = r.status().as_u16();
                    let body = r.text().await.unwrap_or_default();
                    return Err(CatalogError::Api(
                        url.to_string(),
                        format!("HTTP {status}: {body}"),
                    ));
                }
                Ok(r) => return r.text().await.map_err(CatalogError::Transient),
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(CatalogError::Transient(e));
                    }
                    sleep(Duration::from_secs(2u64.pow(attempt))).await;
                    attempt += 1;
                }
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let text = self.get(url).await?;
        serde_json::from_str(&text).map_err(|e| CatalogError::Parse(e.to_string()))
    }
}

// ─── DiskCache ────────────────────────────────────────────────────────────────

/// Content-addressed response store. Entries never expire; invalidation belongs to
/// the caller.
pub struct DiskCache {
    dir: PathBuf,
}

fn cache_key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

impl DiskCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let hash = cache_key_hash(key);
        self.dir.join(&hash[..2]).join(format!("{hash}.json"))
    }

    /// A missing or unreadable entry is a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let data = tokio::fs::read(&path).await.ok()?;
        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "ignoring corrupt cache entry");
                None
            }
        }
    }

    /// Writes to a temp file and renames it into place, so readers never see a
    /// half-written entry.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let path = self.path_for(key);
        let parent = path
            .parent()
            .ok_or_else(|| CatalogError::Cache(format!("bad cache path for {key}")))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| CatalogError::Cache(e.to_string()))?;

        let data = serde_json::to_vec(value).map_err(|e| CatalogError::Cache(e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| CatalogError::Cache(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CatalogError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Drops one entry. Returns whether anything was cached under `key`.
    pub async fn invalidate(&self, key: &str) -> bool {
        tokio::fs::remove_file(self.path_for(key)).await.is_ok()
    }
}
