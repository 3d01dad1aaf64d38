use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{FormatFilter, GroupOrder};

/// Root application configuration, loaded from `~/.config/backlist/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub sync: SyncConfig,
    pub http: HttpConfig,
    pub recommend: RecommendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Authors checked more recently than this are not refetched.
    pub freshness_days: i64,
    pub recent_years: i32,
    /// Consecutive transient author failures before the batch stops. 0 disables.
    pub max_consecutive_failures: u32,
    pub page_size: usize,
    pub editions_per_work: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: String,
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecommendConfig {
    pub default_format: FormatFilter,
    pub order: GroupOrder,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("backlist");
        Self {
            data_dir: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            freshness_days: 7,
            recent_years: 3,
            max_consecutive_failures: 5,
            page_size: 50,
            editions_per_work: 10,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openlibrary.org".to_string(),
            min_interval_ms: 500,
            max_retries: 2,
            timeout_secs: 10,
            user_agent: concat!("backlist/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for RecommendConfig {
    fn default() -> Self {
        Self {
            default_format: FormatFilter::Any,
            order: GroupOrder::Count,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/backlist/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("BACKLIST_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("backlist")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    pub fn set_data_dir(&mut self, dir: PathBuf) {
        self.core.data_dir = dir.to_string_lossy().to_string();
    }

    // ─── Derived paths ─────────────────────────────────────

    /// Path to the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.core.data_dir).join("backlist.db")
    }

    /// Root of the on-disk HTTP response cache.
    pub fn cache_dir(&self) -> PathBuf {
        PathBuf::from(&self.core.data_dir).join("cache")
    }
}
