//! Application-level configuration
//!
//! Storage location, cache bound, sync timing, remote endpoint, and logging.

use crate::cache::DEFAULT_MAX_ENTRIES;
use crate::sync::session::{SessionSettings, DEFAULT_DEBOUNCE, DEFAULT_FETCH_TIMEOUT};
use crate::sync::ConflictPolicy;
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Embedded default configuration file
const DEFAULT_CONFIG: &str = include_str!("../../canvas-sync.config.toml");

/// Configuration file name
const CONFIG_FILE_NAME: &str = "canvas-sync.config.toml";

/// Top-level application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from the first file found, or the embedded default
    pub fn load() -> Result<Self> {
        // ./canvas-sync.config.toml
        if let Ok(content) = std::fs::read_to_string(CONFIG_FILE_NAME) {
            return toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", CONFIG_FILE_NAME, e));
        }

        // ~/.canvas-sync/canvas-sync.config.toml
        if let Some(base_dirs) = BaseDirs::new() {
            let home_config = base_dirs
                .home_dir()
                .join(".canvas-sync")
                .join(CONFIG_FILE_NAME);
            if let Ok(content) = std::fs::read_to_string(&home_config) {
                return toml::from_str(&content).map_err(|e| {
                    anyhow::anyhow!("Failed to parse {}: {}", home_config.display(), e)
                });
            }
        }

        if let Ok(config_path) = std::env::var("CONFIG_PATH") {
            if let Ok(content) = std::fs::read_to_string(&config_path) {
                return toml::from_str(&content)
                    .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e));
            }
        }

        Self::embedded_default()
    }

    /// The configuration shipped inside the binary
    pub fn embedded_default() -> Result<Self> {
        toml::from_str(DEFAULT_CONFIG)
            .map_err(|e| anyhow::anyhow!("Failed to parse embedded default config: {}", e))
    }

    /// Load configuration from a specific file path.
    /// If the file doesn't exist, creates it with default settings.
    pub fn load_from_file(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                anyhow::anyhow!("Failed to parse config file {}: {}", path.display(), e)
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                eprintln!(
                    "Configuration file not found at {}. Creating with default settings...",
                    path.display()
                );

                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .context(format!("Failed to create directory {}", parent.display()))?;
                }

                std::fs::write(path, DEFAULT_CONFIG).context(format!(
                    "Failed to create config file at {}",
                    path.display()
                ))?;

                Self::embedded_default()
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            )),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.cache.max_entries == 0 {
            return Err(anyhow::anyhow!("cache.max_entries must be at least 1"));
        }

        if self.sync.fetch_timeout_ms == 0 {
            return Err(anyhow::anyhow!("sync.fetch_timeout_ms must be positive"));
        }

        if self.remote.user_id.trim().is_empty() {
            return Err(anyhow::anyhow!("remote.user_id cannot be empty"));
        }

        if let Some(url) = &self.remote.base_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(anyhow::anyhow!("Invalid remote base_url: {}", url));
            }
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(anyhow::anyhow!("Invalid log level: {}", self.logging.level)),
        }

        Ok(())
    }

    /// Apply CANVAS_SYNC_* environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        fn var(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if let Some(path) = var("CANVAS_SYNC_DB_PATH") {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(max) = var("CANVAS_SYNC_CACHE_MAX_ENTRIES") {
            if let Ok(max) = max.parse::<usize>() {
                self.cache.max_entries = max;
            }
        }
        if let Some(ms) = var("CANVAS_SYNC_DEBOUNCE_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.sync.debounce_ms = ms;
            }
        }
        if let Some(ms) = var("CANVAS_SYNC_FETCH_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.sync.fetch_timeout_ms = ms;
            }
        }
        if let Some(policy) = var("CANVAS_SYNC_CONFLICT_POLICY") {
            if let Ok(policy) = policy.parse::<ConflictPolicy>() {
                self.sync.conflict_policy = policy;
            }
        }
        if let Some(url) = var("CANVAS_SYNC_REMOTE_URL") {
            self.remote.base_url = Some(url);
        }
        if let Some(user_id) = var("CANVAS_SYNC_USER_ID") {
            self.remote.user_id = user_id;
        }
        if let Some(level) = var("CANVAS_SYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
    }

    /// Settings handed to each workspace session
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            user_id: self.remote.user_id.clone(),
            debounce: Duration::from_millis(self.sync.debounce_ms),
            fetch_timeout: Duration::from_millis(self.sync.fetch_timeout_ms),
            conflict_policy: self.sync.conflict_policy,
        }
    }

    /// Get a summary of the configuration
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str("Configuration loaded:\n");
        summary.push_str(&format!("Storage: {}\n", self.storage.path.display()));
        summary.push_str(&format!("Cache Entries: {}\n", self.cache.max_entries));
        summary.push_str(&format!("Debounce: {} ms\n", self.sync.debounce_ms));
        summary.push_str(&format!("Fetch Timeout: {} ms\n", self.sync.fetch_timeout_ms));
        summary.push_str(&format!("Conflict Policy: {}\n", self.sync.conflict_policy));
        match &self.remote.base_url {
            Some(url) => summary.push_str(&format!("Remote: {}\n", url)),
            None => summary.push_str("Remote: in-memory\n"),
        }
        summary.push_str(&format!("User: {}\n", self.remote.user_id));
        summary.push_str(&format!("Logging Level: {}\n", self.logging.level));
        summary
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the DuckDB file
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("canvas-sync.duckdb"),
        }
    }
}

/// Snapshot cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

/// Save and hydration timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
}

fn default_debounce_ms() -> u64 {
    DEFAULT_DEBOUNCE.as_millis() as u64
}

fn default_fetch_timeout_ms() -> u64 {
    DEFAULT_FETCH_TIMEOUT.as_millis() as u64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

/// Remote document store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// REST endpoint; `None` selects the in-memory store
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_user_id")]
    pub user_id: String,
}

fn default_user_id() -> String {
    "local".to_string()
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            user_id: default_user_id(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_is_valid() {
        let config = AppConfig::embedded_default().unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_entries, DEFAULT_MAX_ENTRIES);
        assert_eq!(config.sync.debounce_ms, 2000);
        assert_eq!(config.sync.conflict_policy, ConflictPolicy::LastWriterWins);
        assert_eq!(config.remote.base_url, None);
    }

    #[test]
    fn session_settings_convert_milliseconds() {
        let mut config = AppConfig::default();
        config.sync.debounce_ms = 750;
        config.sync.fetch_timeout_ms = 3000;
        config.remote.user_id = "alice".to_string();

        let settings = config.session_settings();
        assert_eq!(settings.debounce, Duration::from_millis(750));
        assert_eq!(settings.fetch_timeout, Duration::from_secs(3));
        assert_eq!(settings.user_id, "alice");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = AppConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.remote.base_url = Some("ftp://nope".to_string());
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }
}
