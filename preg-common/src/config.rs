//! Bootstrap configuration loading and root folder resolution
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `PREG_CONFIG` environment variable
//! 3. Per-user config file (`<config_dir>/preg/config.toml`)
//! 4. Compiled defaults (fallback)
//!
//! A missing or unreadable config file never stops startup: a warning is
//! logged and compiled defaults are used.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "PREG_CONFIG";
/// Environment variable overriding `root_folder`
pub const ROOT_FOLDER_ENV: &str = "PREG_ROOT_FOLDER";
/// Environment variable overriding `port`
pub const PORT_ENV: &str = "PREG_PORT";
/// Environment variable overriding `location_api.api_key`
pub const LOCATION_API_KEY_ENV: &str = "PREG_LOCATION_API_KEY";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "preg.db";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Folder holding the database; compiled default when absent
    pub root_folder: Option<PathBuf>,
    pub port: u16,
    pub bind_host: String,
    pub logging: LoggingConfig,
    pub location_api: LocationApiConfig,
    pub listing: ListingConfig,
    pub outbox: OutboxConfig,
    pub session: SessionConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: 5780,
            bind_host: "127.0.0.1".to_string(),
            logging: LoggingConfig::default(),
            location_api: LocationApiConfig::default(),
            listing: ListingConfig::default(),
            outbox: OutboxConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
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

/// Remote administrative-location API
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocationApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Value of the `X-RapidAPI-Host` header
    pub host_header: String,
    /// Fixed province every lookup is scoped to
    pub province: String,
    pub timeout_secs: u64,
}

impl Default for LocationApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://rwanda.p.rapidapi.com".to_string(),
            api_key: String::new(),
            host_header: "rwanda.p.rapidapi.com".to_string(),
            province: "Kigali City".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Dashboard listing
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Records per page; 0 selects a single unpaginated fetch
    pub page_size: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self { page_size: 25 }
    }
}

/// Durable submission outbox
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub create_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_backoff_ms: 500,
            max_backoff_ms: 60_000,
            create_timeout_secs: 30,
            poll_interval_ms: 1_000,
        }
    }
}

/// Sign-in sessions
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub ttl_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_minutes: 720 }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Resolve, load and apply environment overrides
    ///
    /// Never fails: problems are logged and defaults used.
    pub fn load(cli_path: Option<&Path>) -> Self {
        let mut config = match resolve_config_path(cli_path) {
            Some(path) => match Self::load_from(&path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("{}; using compiled defaults", e);
                    Self::default()
                }
            },
            None => {
                info!("No configuration file found, using compiled defaults");
                Self::default()
            }
        };

        config.apply_env_overrides();
        config
    }

    /// Apply `PREG_ROOT_FOLDER`, `PREG_PORT` and `PREG_LOCATION_API_KEY`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(root) = std::env::var(ROOT_FOLDER_ENV) {
            if !root.trim().is_empty() {
                self.root_folder = Some(PathBuf::from(root));
            }
        }

        if let Ok(port) = std::env::var(PORT_ENV) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => warn!("Invalid {} value '{}': {}", PORT_ENV, port, e),
            }
        }

        if let Ok(key) = std::env::var(LOCATION_API_KEY_ENV) {
            self.location_api.api_key = key.trim().to_string();
        }
    }

    /// Root folder, falling back to the OS default
    pub fn root_folder(&self) -> PathBuf {
        self.root_folder.clone().unwrap_or_else(default_root_folder)
    }

    /// Database path inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder().join(DATABASE_FILE)
    }

    /// `host:port` the HTTP server binds to
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }
}

/// Locate the config file per the priority order above
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Per-user config file
    dirs::config_dir()
        .map(|d| d.join("preg").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("preg"))
        .unwrap_or_else(|| PathBuf::from("./preg_data"))
}
