//! Configuration management for the cloudfleet control plane
//!
//! Settings are resolved in this order:
//! 1. Environment variables (highest priority)
//! 2. Configuration file (TOML format)
//! 3. Default values (lowest priority)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::encryption::EncryptionConfig;
use crate::logging::LoggingConfig;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Credential encryption
    pub encryption: EncryptionConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Health monitor timing
    pub monitor: MonitorConfig,
    /// Cloud lifecycle settings
    pub clouds: CloudsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite:///var/lib/cloudfleet/cloudfleet.db")
    pub url: String,
    /// Maximum number of connections in the pool
    pub max_connections: u32,
}

/// Health monitor timing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Pause between two sweeps
    pub interval_secs: u64,
    /// Upper bound of a single cluster probe
    pub probe_timeout_secs: u64,
}

/// Cloud lifecycle settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudsConfig {
    /// Namespace ensured on every registered cluster
    pub system_namespace: String,
    /// Namespace read by the ping check
    pub ping_namespace: String,
    /// Page size used when a listing asks for none
    pub default_page_size: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:///var/lib/cloudfleet/cloudfleet.db".to_string(),
            max_connections: 10,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            probe_timeout_secs: 2,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

impl Default for CloudsConfig {
    fn default() -> Self {
        Self {
            system_namespace: "cloudfleet-system".to_string(),
            ping_namespace: "kube-system".to_string(),
            default_page_size: 10,
        }
    }
}

impl FleetConfig {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::find_config_file() {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.clone(), e.to_string()))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let paths = [
            std::env::var("CLOUDFLEET_CONFIG").ok().map(PathBuf::from),
            Some(PathBuf::from("/etc/cloudfleet/config.toml")),
            Some(PathBuf::from("./cloudfleet.toml")),
        ];

        paths.into_iter().flatten().find(|p| p.exists())
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Server
        if let Some(host) = var("CLOUDFLEET_HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("CLOUDFLEET_PORT").and_then(|p| p.parse().ok()) {
            self.server.port = port;
        }

        // Database
        if let Some(url) = var("CLOUDFLEET_DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(max) = var("CLOUDFLEET_DATABASE_MAX_CONNECTIONS").and_then(|m| m.parse().ok())
        {
            self.database.max_connections = max;
        }

        // Encryption
        if let Some(key) = var("CLOUDFLEET_ENCRYPTION_KEY") {
            self.encryption.master_key = Some(key);
        }
        if let Some(path) = var("CLOUDFLEET_ENCRYPTION_KEY_FILE") {
            self.encryption.key_file = Some(path);
        }

        // Logging
        if let Some(level) = var("CLOUDFLEET_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(dir) = var("CLOUDFLEET_LOG_DIR") {
            self.logging.log_dir = Some(PathBuf::from(dir));
        }
        if let Some(enabled) = var("CLOUDFLEET_FILE_LOGGING") {
            if !enabled.parse().unwrap_or(true) {
                self.logging.log_dir = None;
            }
        }

        // Monitor
        if let Some(secs) = var("CLOUDFLEET_MONITOR_INTERVAL").and_then(|s| s.parse().ok()) {
            self.monitor.interval_secs = secs;
        }
        if let Some(secs) = var("CLOUDFLEET_PROBE_TIMEOUT").and_then(|s| s.parse().ok()) {
            self.monitor.probe_timeout_secs = secs;
        }

        // Clouds
        if let Some(ns) = var("CLOUDFLEET_SYSTEM_NAMESPACE") {
            self.clouds.system_namespace = ns;
        }
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("Port cannot be 0".to_string()));
        }

        if self.database.url.is_empty() {
            return Err(ConfigError::Validation(
                "Database URL cannot be empty".to_string(),
            ));
        }

        if self.monitor.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "Monitor interval must be at least 1 second".to_string(),
            ));
        }

        if self.monitor.probe_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "Probe timeout must be at least 1 second".to_string(),
            ));
        }

        if self.clouds.system_namespace.is_empty() || self.clouds.ping_namespace.is_empty() {
            return Err(ConfigError::Validation(
                "Cloud namespaces cannot be empty".to_string(),
            ));
        }

        if self.clouds.default_page_size <= 0 {
            return Err(ConfigError::Validation(
                "Default page size must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// Failed to read configuration file
    FileRead(PathBuf, String),
    /// Failed to parse configuration
    Parse(String),
    /// Configuration validation failed
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, err) => {
                write!(f, "Failed to read config file {:?}: {}", path, err)
            }
            ConfigError::Parse(err) => write!(f, "Failed to parse config: {}", err),
            ConfigError::Validation(err) => write!(f, "Config validation failed: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}
