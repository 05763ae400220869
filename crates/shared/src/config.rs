//! Configuration management for the stream-scraper workspace.
//!
//! This module handles loading and parsing configuration from TOML files,
//! with sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory settings
    pub data: DataConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Origin site settings
    pub origin: OriginConfig,

    /// Scraper timing settings
    #[serde(default)]
    pub scraper: ScraperConfig,

    /// Browser launch settings
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Data directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Root data directory path
    pub root_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log directory path (relative to data directory or absolute)
    pub log_dir: String,

    /// Default log level (trace, debug, info, warn, error)
    pub default_level: String,

    /// Enable console output
    pub console: bool,

    /// Enable file output
    pub file: bool,

    /// Enable JSON formatting for file logs
    pub json_format: bool,
}

/// Origin site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OriginConfig {
    /// Catalog site base URL (no trailing slash)
    pub base_url: String,

    /// User agent presented by the browser
    pub user_agent: String,
}

/// Scraper timing and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Minimum spacing between queued browser operations
    pub min_spacing_ms: u64,

    /// Page navigation timeout
    pub navigation_timeout_secs: u64,

    /// How long to wait for a JSON body to render
    pub json_wait_timeout_secs: u64,

    /// How long to wait for the player resolution menu
    pub menu_wait_timeout_secs: u64,

    /// Polling interval for DOM waits
    pub poll_interval_ms: u64,

    /// Maximum retries when the origin rate-limits us
    pub max_retries: u32,

    /// Base retry delay in milliseconds (linear backoff)
    pub retry_delay_ms: u64,
}

/// Browser launch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Run without a visible window
    pub headless: bool,

    /// Explicit Chrome/Chromium executable
    #[serde(default)]
    pub executable: Option<String>,

    /// Remote DevTools endpoint (e.g. "http://127.0.0.1:9222").
    /// If set, connects to an existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Additional Chrome arguments
    #[serde(default)]
    pub chrome_args: Vec<String>,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the durable (on-disk) tier
    pub durable_enabled: bool,

    /// Durable document database path (relative to data directory)
    pub durable_path: String,

    /// TTL for search results in seconds
    pub search_ttl_secs: u64,

    /// TTL for episode listings in seconds
    pub episodes_ttl_secs: u64,

    /// TTL for resolved streams in seconds
    pub streams_ttl_secs: u64,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            min_spacing_ms: 1500,
            navigation_timeout_secs: 30,
            json_wait_timeout_secs: 15,
            menu_wait_timeout_secs: 15,
            poll_interval_ms: 250,
            max_retries: 3,
            retry_delay_ms: 2000,
        }
    }
}

impl ScraperConfig {
    pub fn min_spacing(&self) -> Duration {
        Duration::from_millis(self.min_spacing_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn json_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.json_wait_timeout_secs)
    }

    pub fn menu_wait_timeout(&self) -> Duration {
        Duration::from_secs(self.menu_wait_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            remote_url: None,
            chrome_args: Vec::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            durable_enabled: true,
            durable_path: "cache.db".to_string(),
            search_ttl_secs: 10 * 60,
            episodes_ttl_secs: 6 * 60 * 60,
            streams_ttl_secs: 30 * 60,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data: DataConfig {
                root_dir: "data".to_string(),
            },
            logging: LoggingConfig {
                log_dir: "logs".to_string(),
                default_level: "info".to_string(),
                console: true,
                file: true,
                json_format: false,
            },
            origin: OriginConfig {
                base_url: "https://animepahe.ru".to_string(),
                user_agent: concat!(
                    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 ",
                    "(KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36"
                )
                .to_string(),
            },
            scraper: ScraperConfig::default(),
            browser: BrowserConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// If the file doesn't exist, returns the default configuration.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::warn!(
                path = %path.display(),
                "Config file not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            "Configuration saved successfully"
        );

        Ok(())
    }

    /// Get the path for the data directory
    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.data.root_dir)
    }

    /// Get the absolute path for the log directory
    pub fn log_dir(&self) -> PathBuf {
        self.resolve(&self.logging.log_dir)
    }

    /// Get the path for the durable cache database
    pub fn cache_db_path(&self) -> PathBuf {
        self.resolve(&self.cache.durable_path)
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        let path = Path::new(relative);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir().join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.data.root_dir, "data");
        assert_eq!(config.scraper.min_spacing_ms, 1500);
        assert!(config.cache.streams_ttl_secs < config.cache.episodes_ttl_secs);
        assert!(config.cache.search_ttl_secs < config.cache.episodes_ttl_secs);
    }

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let config_path = temp_dir.path().join("config.toml");

        let mut original_config = Config::default();
        original_config.browser.remote_url = Some("http://127.0.0.1:9222".to_string());
        original_config.save(&config_path)?;

        assert!(config_path.exists());

        let loaded_config = Config::from_file(&config_path)?;
        assert_eq!(loaded_config.data.root_dir, original_config.data.root_dir);
        assert_eq!(loaded_config.origin.base_url, original_config.origin.base_url);
        assert_eq!(
            loaded_config.browser.remote_url.as_deref(),
            Some("http://127.0.0.1:9222")
        );

        Ok(())
    }

    #[test]
    fn test_optional_sections_default() -> Result<()> {
        let content = r#"
            [data]
            root_dir = "/tmp/scraper"

            [logging]
            log_dir = "logs"
            default_level = "debug"
            console = true
            file = false
            json_format = false

            [origin]
            base_url = "https://origin.test"
            user_agent = "test-agent"
        "#;
        let config: Config = toml::from_str(content)?;
        assert_eq!(config.scraper.max_retries, 3);
        assert!(config.browser.headless);
        assert!(config.cache.durable_enabled);
        assert_eq!(config.cache_db_path(), PathBuf::from("/tmp/scraper/cache.db"));
        Ok(())
    }

    #[test]
    fn test_load_nonexistent_config() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.data.root_dir, "data");
    }

    #[test]
    fn test_path_resolution() {
        let config = Config::default();

        assert!(config.log_dir().ends_with("data/logs"));
        assert!(config.cache_db_path().ends_with("data/cache.db"));
    }
}
