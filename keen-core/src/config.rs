//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/keen/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/keen/` (~/.config/keen/)
//! - Cache (pending events): `$XDG_CACHE_HOME/` (~/.cache/), the file store adds `keen/`
//! - State/Logs: `$XDG_STATE_HOME/keen/` (~/.local/state/keen/)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name of the log written under the state directory
pub const LOG_FILE_NAME: &str = "keen.log";

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_CACHE_HOME or ~/.cache
fn xdg_cache_home() -> PathBuf {
    std::env::var("XDG_CACHE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".cache"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Client and queue configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backend holds pending events
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Volatile, bounded in-memory map
    Ram,
    /// One file per event under the cache directory
    #[default]
    File,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Client configuration consumed by the queue and publisher
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Project the events belong to; also namespaces attempt bookkeeping
    pub project_id: Option<String>,

    /// Write key sent as the `Authorization` header
    pub write_key: Option<String>,

    /// Ingestion API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API version path segment
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// HTTP request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Flushes an event may be part of before it is dropped
    #[serde(default = "default_max_attempts")]
    pub max_attempts: i32,

    /// Pending events kept per collection before eviction
    #[serde(default = "default_max_events_per_collection")]
    pub max_events_per_collection: usize,

    /// Oldest events deleted from a full collection directory
    #[serde(default = "default_forget_count")]
    pub forget_count: usize,

    /// Storage backend for pending events
    #[serde(default)]
    pub store: StoreKind,

    /// Override for the cache root (file store only)
    pub cache_dir: Option<PathBuf>,

    /// Properties merged into every event
    #[serde(default)]
    pub global_properties: serde_json::Map<String, serde_json::Value>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            write_key: None,
            base_url: default_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            max_events_per_collection: default_max_events_per_collection(),
            forget_count: default_forget_count(),
            store: StoreKind::default(),
            cache_dir: None,
            global_properties: serde_json::Map::new(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.keen.io".to_string()
}

fn default_api_version() -> String {
    "3.0".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_max_attempts() -> i32 {
    3
}

fn default_max_events_per_collection() -> usize {
    10_000
}

fn default_forget_count() -> usize {
    100
}

impl ClientConfig {
    /// Check if the client has everything it needs to publish
    pub fn is_ready(&self) -> bool {
        self.project_id.is_some() && self.write_key.is_some()
    }

    /// Validate queue limits, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.max_events_per_collection == 0 {
            return Err(Error::Config(
                "client.max_events_per_collection must be at least 1".to_string(),
            ));
        }
        if self.forget_count == 0 {
            return Err(Error::Config(
                "client.forget_count must be at least 1".to_string(),
            ));
        }
        if self.timeout_secs == 0 {
            return Err(Error::Config(
                "client.timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.max_attempts < 0 {
            return Err(Error::Config(
                "client.max_attempts must not be negative".to_string(),
            ));
        }
        if let Some(project_id) = &self.project_id {
            // Used as a directory name for attempt files
            if project_id.is_empty()
                || project_id.len() > 255
                || project_id.contains(['/', '\\'])
                || project_id.starts_with('.')
            {
                return Err(Error::Config(format!(
                    "client.project_id {:?} is not a valid project id",
                    project_id
                )));
            }
        }
        Ok(())
    }

    /// Validate configuration for publishing
    pub fn validate_for_publish(&self) -> Result<()> {
        self.validate()?;
        if self.project_id.is_none() {
            return Err(Error::Config(
                "client.project_id is required to publish".to_string(),
            ));
        }
        if self.write_key.is_none() {
            return Err(Error::Config(
                "client.write_key is required to publish".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the root handed to the file store
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(Config::cache_dir)
    }
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.client.validate()?;
        Ok(config)
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/keen/config.toml` (~/.config/keen/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("keen").join("config.toml")
    }

    /// Returns the default cache root
    ///
    /// `$XDG_CACHE_HOME` (~/.cache); pending events live under its `keen/` child
    pub fn cache_dir() -> PathBuf {
        xdg_cache_home()
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/keen/` (~/.local/state/keen/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("keen")
    }

    /// Returns the log file path
    pub fn log_path() -> PathBuf {
        Self::state_dir().join(LOG_FILE_NAME)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.base_url, "https://api.keen.io");
        assert_eq!(config.api_version, "3.0");
        assert_eq!(config.timeout_secs, 30);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_events_per_collection, 10_000);
        assert_eq!(config.forget_count, 100);
        assert_eq!(config.store, StoreKind::File);
        assert!(!config.is_ready());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[client]
project_id = "5011efa95f546f2ce2000000"
write_key = "wk_test"
max_attempts = 5
store = "ram"

[client.global_properties]
app = "demo"
build = 42

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(
            config.client.project_id.as_deref(),
            Some("5011efa95f546f2ce2000000")
        );
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.client.store, StoreKind::Ram);
        assert_eq!(config.client.global_properties["app"], "demo");
        assert_eq!(config.client.global_properties["build"], 42);
        assert_eq!(config.logging.level, "debug");
        assert!(config.client.is_ready());
    }

    #[test]
    fn test_client_config_validation() {
        let config = ClientConfig {
            forget_count: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            max_events_per_collection: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            project_id: Some("../escape".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ClientConfig {
            project_id: Some("p".repeat(256)),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        // Queueing works without credentials, publishing does not
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.validate_for_publish().is_err());

        let config = ClientConfig {
            project_id: Some("p1".to_string()),
            write_key: Some("wk".to_string()),
            ..Default::default()
        };
        assert!(config.validate_for_publish().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nproject_id = \"p1\"\nforget_count = 5\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.client.forget_count, 5);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_rejects_invalid_limits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[client]\nmax_events_per_collection = 0\n").unwrap();

        assert!(matches!(Config::load_from(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_cache_root_override() {
        let config = ClientConfig {
            cache_dir: Some(PathBuf::from("/tmp/keen-cache")),
            ..Default::default()
        };
        assert_eq!(config.cache_root(), PathBuf::from("/tmp/keen-cache"));
    }
}
