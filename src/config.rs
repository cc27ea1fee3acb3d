//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::source::AcyclicaConfig;
use crate::store::Retention;
use crate::sync::{SyncSettings, WeekdayConvention};
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Travel-time source configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key used directly when set
    #[serde(default)]
    pub api_key: Option<String>,

    /// `Username,API_Key` CSV consulted when `api_key` is not set
    #[serde(default)]
    pub api_key_file: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://cr.acyclica.com/datastream/route/csv/time".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_file: None,
            username: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Table storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Series registry CSV; defaults to `{data_dir}/routes.csv`
    #[serde(default)]
    pub registry_path: Option<String>,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("travelsync").to_string_lossy().to_string())
        .unwrap_or_else(|| "./travelsync_data".to_string())
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            registry_path: None,
        }
    }
}

impl StorageConfig {
    /// Data directory with a leading `~/` expanded
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    pub fn registry_path(&self) -> PathBuf {
        match &self.registry_path {
            Some(path) => expand_home(path),
            None => self.data_dir().join("routes.csv"),
        }
    }
}

fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Sync cycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// IANA zone for calendar columns and the daily cycle end
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[serde(default = "default_retention_months")]
    pub retention_months: u32,

    #[serde(default)]
    pub weekday_convention: WeekdayConvention,

    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_series: usize,
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_retention_months() -> u32 {
    24
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            retention_months: default_retention_months(),
            weekday_convention: WeekdayConvention::default(),
            max_concurrent_series: default_max_concurrent(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Parse { error, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: PathBuf::new(),
            error: e.to_string(),
        })
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    ///
    /// The first existing file wins; a file that exists but cannot be loaded
    /// is an error rather than a fallback to defaults.
    pub fn load_default() -> Result<Self, ConfigError> {
        let config_paths: Vec<PathBuf> = [
            dirs::config_dir().map(|p| p.join("travelsync").join("config.toml")),
            Some(PathBuf::from("/etc/travelsync/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ]
        .into_iter()
        .flatten()
        .collect();

        Self::load_first(&config_paths)
    }

    /// Load the first of `paths` that exists, or defaults with env overrides
    pub fn load_first(paths: &[PathBuf]) -> Result<Self, ConfigError> {
        match paths.iter().find(|p| p.exists()) {
            Some(path) => {
                let config = Self::load_with_env(path)?;
                tracing::info!("Loaded config from {:?}", path);
                Ok(config)
            }
            None => {
                tracing::info!("Using default config with environment overrides");
                Ok(Self::from_env())
            }
        }
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Source overrides
        if let Ok(url) = std::env::var("TRAVELSYNC_BASE_URL") {
            self.source.base_url = url;
        }
        if let Ok(key) = std::env::var("TRAVELSYNC_API_KEY") {
            self.source.api_key = Some(key);
        }
        if let Ok(user) = std::env::var("TRAVELSYNC_USERNAME") {
            self.source.username = Some(user);
        }

        // Storage overrides
        if let Ok(data_dir) = std::env::var("TRAVELSYNC_DATA_DIR") {
            self.storage.data_dir = data_dir;
        }
        if let Ok(registry) = std::env::var("TRAVELSYNC_REGISTRY") {
            self.storage.registry_path = Some(registry);
        }

        // Sync overrides
        if let Ok(tz) = std::env::var("TRAVELSYNC_TIMEZONE") {
            self.sync.timezone = tz;
        }

        // Logging overrides
        if let Ok(level) = std::env::var("TRAVELSYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("TRAVELSYNC_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.sync
            .timezone
            .parse::<Tz>()
            .map_err(|e| ConfigError::Invalid(format!("timezone '{}': {}", self.sync.timezone, e)))
    }

    /// Settings handed to the sync controller
    pub fn sync_settings(&self) -> Result<SyncSettings, ConfigError> {
        if self.sync.max_concurrent_series == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_series must be at least 1".to_string(),
            ));
        }

        Ok(SyncSettings {
            timezone: self.timezone()?,
            retention: Retention::months(self.sync.retention_months),
            weekday: self.sync.weekday_convention,
            max_concurrent_series: self.sync.max_concurrent_series,
        })
    }

    /// Resolve the API key, directly or from the key file
    pub fn api_key(&self) -> Result<String, ConfigError> {
        if let Some(key) = self.source.api_key.as_ref().filter(|k| !k.is_empty()) {
            return Ok(key.clone());
        }

        let (Some(file), Some(user)) = (&self.source.api_key_file, &self.source.username) else {
            return Err(ConfigError::Invalid(
                "no api_key, and no api_key_file + username to look one up".to_string(),
            ));
        };

        lookup_api_key(Path::new(file), user)
    }

    /// Client configuration for the Acyclica source
    pub fn acyclica(&self) -> Result<AcyclicaConfig, ConfigError> {
        Ok(AcyclicaConfig {
            base_url: self.source.base_url.clone(),
            api_key: self.api_key()?,
            request_timeout_secs: self.source.request_timeout_secs,
        })
    }
}

/// Find the key for `username` (case-insensitive) in a `Username,API_Key` CSV
pub fn lookup_api_key(path: &Path, username: &str) -> Result<String, ConfigError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

    let wanted = username.to_lowercase();
    let mut matches = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        if record.get(0).map(str::to_lowercase).as_deref() == Some(wanted.as_str()) {
            if let Some(key) = record.get(1) {
                matches.push(key.to_string());
            }
        }
    }

    match matches.len() {
        1 => Ok(matches.remove(0)),
        0 => Err(ConfigError::Invalid(format!(
            "no API key for user '{}' in {:?}",
            username, path
        ))),
        n => Err(ConfigError::Invalid(format!(
            "{} API keys for user '{}' in {:?}",
            n, username, path
        ))),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Travelsync Configuration
#
# Environment variables override these settings:
# - TRAVELSYNC_BASE_URL
# - TRAVELSYNC_API_KEY
# - TRAVELSYNC_USERNAME
# - TRAVELSYNC_DATA_DIR
# - TRAVELSYNC_REGISTRY
# - TRAVELSYNC_TIMEZONE
# - TRAVELSYNC_LOG_LEVEL
# - TRAVELSYNC_LOG_FORMAT

[source]
# Datastream base URL (key, route and window are appended)
base_url = "https://cr.acyclica.com/datastream/route/csv/time"

# API key; alternatively set api_key_file + username
# api_key = ""
# api_key_file = "/etc/travelsync/api_keys.csv"
# username = ""

# Per-request timeout in seconds
request_timeout_secs = 60

[storage]
# Directory holding one folder per route
data_dir = "~/.local/share/travelsync"

# Route registry (id,name per line); defaults to {data_dir}/routes.csv
# registry_path = "/etc/travelsync/routes.csv"

[sync]
# Zone used for DateTime/Date/Time columns and the daily cutoff
timezone = "America/Chicago"

# Months of data kept behind the newest record
retention_months = 24

# DayOfWeek numbering: "sunday-first" (Sunday=1) or "iso" (Monday=1)
weekday_convention = "sunday-first"

# Routes synced concurrently
max_concurrent_series = 4

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}
