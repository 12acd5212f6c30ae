//! Configuration management for vigild.
//!
//! Loads settings from `--config`, `$VIGIL_CONFIG`, or /etc/vigil/config.toml,
//! falling back to defaults. Every field has a default so partial files are
//! valid.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use vigil_common::HealthConfig;

/// System config file path
pub const CONFIG_PATH: &str = "/etc/vigil/config.toml";

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "VIGIL_CONFIG";

/// Environment variable holding the upstream API token
pub const TOKEN_ENV: &str = "VIGIL_API_TOKEN";

// ============================================================================
// Collection
// ============================================================================

/// Knowledge base collection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Concurrent metric fetches per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches, to stay under the upstream rate limit
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,

    /// Timeout for each upstream call
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Timer-driven refresh interval
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,

    /// Window metrics are aggregated over, e.g. "2h"
    #[serde(default = "default_metrics_window")]
    pub metrics_window: String,

    /// Extra problem hops walked when marking related problems (0 disables)
    #[serde(default = "default_related_max_depth")]
    pub related_max_depth: usize,
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    500
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_refresh_interval() -> u64 {
    300 // 5 minutes
}

fn default_metrics_window() -> String {
    "2h".to_string()
}

fn default_related_max_depth() -> usize {
    1
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout(),
            refresh_interval_secs: default_refresh_interval(),
            metrics_window: default_metrics_window(),
            related_max_depth: default_related_max_depth(),
        }
    }
}

impl CollectionConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

// ============================================================================
// Source
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Dynatrace,
    Fixture,
}

/// Upstream data source settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    /// Environment URL, e.g. https://abc12345.live.dynatrace.com
    #[serde(default)]
    pub base_url: String,

    /// API token; `$VIGIL_API_TOKEN` is used when empty
    #[serde(default)]
    pub api_token: String,

    /// Page size for paginated list calls
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// JSON document read by the fixture source
    #[serde(default)]
    pub fixture_path: Option<PathBuf>,
}

fn default_source_kind() -> SourceKind {
    SourceKind::Dynatrace
}

fn default_page_size() -> u32 {
    200
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            base_url: String::new(),
            api_token: String::new(),
            page_size: default_page_size(),
            fixture_path: None,
        }
    }
}

impl SourceConfig {
    /// Configured token, or the environment token when none is configured
    pub fn resolved_token(&self) -> Option<String> {
        if !self.api_token.is_empty() {
            return Some(self.api_token.clone());
        }
        std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty())
    }
}

// ============================================================================
// Server
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:7870".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

// ============================================================================
// Full config
// ============================================================================

/// Full daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Health score cutoffs and weights
    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Resolve the config file and load it.
    ///
    /// An explicit path (flag or environment) that fails to load is an error;
    /// a missing system file falls back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let config = match explicit.map(Path::to_path_buf).or(env_path) {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::load_or_default(Path::new(CONFIG_PATH))?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults when `path` does not exist; a file that exists must parse
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config {} not found, using defaults", path.display());
            return Ok(Config::default());
        }
        Self::load_from_path(path)
    }

    /// Load config from specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Reject settings the knowledge base cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.collection.batch_size == 0 {
            return Err(anyhow!("collection.batch_size must be at least 1"));
        }
        if self.collection.refresh_interval_secs == 0 {
            return Err(anyhow!("collection.refresh_interval_secs must be at least 1"));
        }
        if self.collection.fetch_timeout_secs == 0 {
            return Err(anyhow!("collection.fetch_timeout_secs must be at least 1"));
        }
        self.health
            .validate()
            .map_err(|e| anyhow!("invalid [health] section: {}", e))?;
        if self.source.kind == SourceKind::Fixture && self.source.fixture_path.is_none() {
            return Err(anyhow!("source.fixture_path is required for the fixture source"));
        }
        Ok(())
    }
}
