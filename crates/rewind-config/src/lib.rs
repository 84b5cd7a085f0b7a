//! # Rewind Configuration
//!
//! YAML-based configuration for the rewind back/forward cache.
//!
//! Every section has sensible defaults, so an empty file is a valid
//! configuration. JSON and TOML files are accepted as well; the format is
//! chosen by file extension.
//!
//! ```yaml
//! cache:
//!   cache_size: 6
//!   foreground_cache_size: 2
//!   time_to_live_secs: 3600
//! policy:
//!   allowed_websites: "https://a.com, https://b.com/path"
//!   blocked_cgi_params: "ibp=1|tbm=1"
//! logging:
//!   level: debug
//! ```

use arc_swap::ArcSwap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub mod policy;
pub mod watch;

pub use policy::{PolicyConfig, StringList};

/// Configuration error.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Invalid policy: {0}")]
    Policy(#[from] rewind_filter::FilterError),

    #[error("File not found: {0}")]
    NotFound(PathBuf),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cache sizing and timing.
    pub cache: CacheConfig,

    /// Website allow/block lists and blocked query parameters.
    pub policy: PolicyConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Metrics and observability.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path)?;

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)?,
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            _ => serde_yaml::from_str(&content)?, // Default to YAML
        };

        Ok(config)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        self.cache.validate()?;
        self.policy.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Builds the cache configuration, parsing the website policy.
    pub fn cache_config(&self) -> Result<rewind_cache::CacheConfig> {
        self.validate()?;
        Ok(rewind_cache::CacheConfig {
            enabled: self.cache.enabled,
            cache_size: self.cache.cache_size,
            foreground_cache_size: self.cache.foreground_cache_size,
            time_to_live: self.cache.time_to_live(),
            freeze_timeout: self.cache.freeze_timeout(),
            eviction_log_size: self.cache.eviction_log_size,
            domain_policy: self.policy.domain_policy()?,
        })
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching. When false every page is rejected as unsupported.
    pub enabled: bool,

    /// Maximum number of cached pages.
    pub cache_size: usize,

    /// Maximum number of cached pages whose processes are foregrounded.
    pub foreground_cache_size: usize,

    /// Lifetime of a cached page (seconds).
    pub time_to_live_secs: u64,

    /// Grace period for documents to acknowledge freezing (milliseconds).
    pub freeze_timeout_ms: u64,

    /// Number of not-restored reasons remembered for diagnostics.
    pub eviction_log_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_size: 6,
            foreground_cache_size: 2,
            time_to_live_secs: 3600,
            freeze_timeout_ms: 3000,
            eviction_log_size: 1000,
        }
    }
}

impl CacheConfig {
    fn validate(&self) -> Result<()> {
        if self.cache_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.cache_size".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.foreground_cache_size > self.cache_size {
            return Err(ConfigError::InvalidValue {
                field: "cache.foreground_cache_size".to_string(),
                message: "foreground_cache_size cannot be greater than cache_size".to_string(),
            });
        }

        if self.time_to_live_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.time_to_live_secs".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(())
    }

    /// Entry lifetime.
    pub fn time_to_live(&self) -> Duration {
        Duration::from_secs(self.time_to_live_secs)
    }

    /// Freeze grace period.
    pub fn freeze_timeout(&self) -> Duration {
        Duration::from_millis(self.freeze_timeout_ms)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level.
    pub level: String,

    /// Log format (text, json).
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        match self.format.to_ascii_lowercase().as_str() {
            "text" | "json" => Ok(()),
            other => Err(ConfigError::InvalidValue {
                field: "logging.format".to_string(),
                message: format!("unknown format '{}', expected text or json", other),
            }),
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics collection.
    pub enabled: bool,

    /// Prometheus endpoint.
    pub prometheus: Option<PrometheusConfig>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus: None,
        }
    }
}

/// Prometheus configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    /// Enable Prometheus endpoint.
    pub enabled: bool,

    /// Listen address.
    pub listen: SocketAddr,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9464),
        }
    }
}

/// Configuration holder with hot-reload support.
pub struct ConfigHolder {
    config: ArcSwap<Config>,
    path: RwLock<Option<PathBuf>>,
}

impl ConfigHolder {
    /// Creates a new configuration holder.
    pub fn new(config: Config) -> Self {
        Self {
            config: ArcSwap::new(Arc::new(config)),
            path: RwLock::new(None),
        }
    }

    /// Creates a holder from a file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config = Config::from_file(path)?;
        config.validate()?;
        Ok(Self {
            config: ArcSwap::new(Arc::new(config)),
            path: RwLock::new(Some(path.to_path_buf())),
        })
    }

    /// Returns the current configuration.
    pub fn get(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Returns the file this holder reloads from.
    pub fn path(&self) -> Option<PathBuf> {
        self.path.read().clone()
    }

    /// Reloads configuration from the file.
    ///
    /// An invalid file leaves the current configuration in place.
    pub fn reload(&self) -> Result<()> {
        let path = self.path.read();
        if let Some(p) = path.as_ref() {
            let config = Config::from_file(p)?;
            config.validate()?;
            self.config.store(Arc::new(config));
        }
        Ok(())
    }

    /// Updates the configuration.
    pub fn update(&self, config: Config) {
        self.config.store(Arc::new(config));
    }
}

impl Default for ConfigHolder {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let cache = config.cache_config().unwrap();
        assert_eq!(cache.cache_size, 6);
        assert_eq!(cache.foreground_cache_size, 2);
        assert_eq!(cache.time_to_live, Duration::from_secs(3600));
        assert_eq!(cache.freeze_timeout, Duration::from_millis(3000));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.cache.cache_size = 10;
        let yaml = config.to_yaml().unwrap();
        let parsed = Config::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.cache.cache_size, 10);
        assert_eq!(parsed.logging.level, "info");
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config = Config::from_yaml("cache:\n  cache_size: 3\n").unwrap();
        assert_eq!(config.cache.cache_size, 3);
        assert_eq!(config.cache.foreground_cache_size, 2);
        assert!(config.cache.enabled);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = Config::default();
        config.cache.foreground_cache_size = 7;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "cache.foreground_cache_size"
        ));

        let mut config = Config::default();
        config.cache.cache_size = 0;
        config.cache.foreground_cache_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.cache.time_to_live_secs = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("rewind.toml");
        std::fs::write(&toml_path, "[cache]\ncache_size = 4\n").unwrap();
        assert_eq!(Config::from_file(&toml_path).unwrap().cache.cache_size, 4);

        let json_path = dir.path().join("rewind.json");
        std::fs::write(&json_path, r#"{"cache": {"time_to_live_secs": 60}}"#).unwrap();
        assert_eq!(
            Config::from_file(&json_path).unwrap().cache.time_to_live(),
            Duration::from_secs(60)
        );

        assert!(matches!(
            Config::from_file(dir.path().join("missing.yaml")),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_config_holder() {
        let holder = ConfigHolder::new(Config::default());
        assert_eq!(holder.get().cache.cache_size, 6);
        assert!(holder.path().is_none());
        assert!(holder.reload().is_ok());
    }

    #[test]
    fn test_holder_reload_keeps_last_good_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "cache:\n  cache_size: 8").unwrap();

        let holder = ConfigHolder::from_file(file.path()).unwrap();
        assert_eq!(holder.get().cache.cache_size, 8);

        std::fs::write(file.path(), "cache:\n  cache_size: 5\n").unwrap();
        holder.reload().unwrap();
        assert_eq!(holder.get().cache.cache_size, 5);

        std::fs::write(file.path(), "cache:\n  cache_size: 0\n").unwrap();
        assert!(holder.reload().is_err());
        assert_eq!(holder.get().cache.cache_size, 5);
    }
}
