//! Outbox Processor Configuration
//!
//! Loaded from an optional TOML file, then overridden by environment variables.
//!
//! ## Environment Variables
//!
//! | Variable | Section key |
//! |----------|-------------|
//! | `AF_CONFIG_PATH` | path of the TOML file |
//! | `AF_DISPATCH_INTERVAL_SECS` | `dispatcher.tick_interval_secs` |
//! | `AF_DISPATCH_BATCH_SIZE` | `dispatcher.batch_size` |
//! | `AF_DISPATCH_MAX_ATTEMPTS` | `dispatcher.max_attempts` |
//! | `AF_NOTIFY_HOST` | `notifier.host` |
//! | `AF_NOTIFY_PORT` | `notifier.port` |
//! | `AF_STORE_KIND` | `store.kind` |
//! | `AF_STORE_URL` | `store.url` |
//! | `AF_BUS_REDIS_URL` | `bus.redis_url` |
//! | `AF_LOG_JSON` | `logging.json` |
//! | `AF_METRICS_ENABLED` | `server.enabled` |
//! | `AF_METRICS_PORT` | `server.metrics_port` |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "AF_CONFIG_PATH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub dispatcher: DispatcherSettings,
    pub notifier: NotifierSettings,
    pub store: StoreSettings,
    pub bus: BusSettings,
    pub logging: LoggingSettings,
    pub server: ServerSettings,
    /// File the configuration was read from; `None` when running on defaults.
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub tick_interval_secs: u64,
    pub batch_size: u32,
    /// Failed deliveries tolerated before a message is dead-lettered.
    pub max_attempts: u32,
    /// Backoff unit; the n-th requeue waits `2^n * backoff_base_secs`.
    pub backoff_base_secs: u64,
    pub notify_per_second: u32,
    pub panic_cooldown_ms: u64,
    pub max_consecutive_restarts: u32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            batch_size: 1000,
            max_attempts: 5,
            backoff_base_secs: 60,
            notify_per_second: 1,
            panic_cooldown_ms: 1000,
            max_consecutive_restarts: 10,
        }
    }
}

impl DispatcherSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    pub fn panic_cooldown(&self) -> Duration {
        Duration::from_millis(self.panic_cooldown_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifierSettings {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Request path; `{apply_id}` is replaced with the owning task id.
    pub path: String,
    pub timeout_secs: u64,
}

impl Default for NotifierSettings {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 8082,
            path: "/api/automation/v1/task/{apply_id}".to_string(),
            timeout_secs: 10,
        }
    }
}

impl NotifierSettings {
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Postgres,
    Mongo,
}

impl FromStr for StoreKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" => Ok(StoreKind::Postgres),
            "mongo" | "mongodb" => Ok(StoreKind::Mongo),
            other => Err(format!("unknown store kind: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub kind: StoreKind,
    pub url: String,
    pub mongo_database: String,
    pub mongo_collection: String,
    pub postgres_table: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            kind: StoreKind::Mongo,
            url: String::new(),
            mongo_database: "automation".to_string(),
            mongo_collection: "outbox".to_string(),
            postgres_table: "outbox".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub redis_url: String,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub json: bool,
}

/// Health, readiness and metrics endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub enabled: bool,
    pub metrics_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_port: 9090,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load from `AF_CONFIG_PATH` (if set), apply environment overrides, validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
        Self::load_from(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Same as [`AppConfig::load`] with an explicit file and key lookup.
    pub fn load_from<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => {
                let mut config = Self::from_file(path)?;
                config.source = Some(path.to_path_buf());
                config
            }
            None => Self::default(),
        };

        config.apply_overrides(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "AF_DISPATCH_INTERVAL_SECS", &mut self.dispatcher.tick_interval_secs)?;
        override_parsed(&lookup, "AF_DISPATCH_BATCH_SIZE", &mut self.dispatcher.batch_size)?;
        override_parsed(&lookup, "AF_DISPATCH_MAX_ATTEMPTS", &mut self.dispatcher.max_attempts)?;
        override_parsed(&lookup, "AF_NOTIFY_HOST", &mut self.notifier.host)?;
        override_parsed(&lookup, "AF_NOTIFY_PORT", &mut self.notifier.port)?;
        override_parsed(&lookup, "AF_STORE_KIND", &mut self.store.kind)?;
        override_parsed(&lookup, "AF_STORE_URL", &mut self.store.url)?;
        override_parsed(&lookup, "AF_BUS_REDIS_URL", &mut self.bus.redis_url)?;
        override_parsed(&lookup, "AF_LOG_JSON", &mut self.logging.json)?;
        override_parsed(&lookup, "AF_METRICS_ENABLED", &mut self.server.enabled)?;
        override_parsed(&lookup, "AF_METRICS_PORT", &mut self.server.metrics_port)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatcher.tick_interval_secs == 0 {
            return Err(ConfigError::Invalid("dispatcher.tick_interval_secs must be > 0".into()));
        }
        if self.dispatcher.batch_size == 0 {
            return Err(ConfigError::Invalid("dispatcher.batch_size must be > 0".into()));
        }
        if self.dispatcher.notify_per_second == 0 {
            return Err(ConfigError::Invalid("dispatcher.notify_per_second must be > 0".into()));
        }
        // 2^attempts must stay representable as a backoff multiplier.
        if self.dispatcher.max_attempts > 30 {
            return Err(ConfigError::Invalid("dispatcher.max_attempts must be <= 30".into()));
        }
        if !self.notifier.path.contains("{apply_id}") {
            return Err(ConfigError::Invalid("notifier.path must contain {apply_id}".into()));
        }
        if self.server.enabled && self.server.metrics_port == 0 {
            return Err(ConfigError::Invalid("server.metrics_port must be > 0".into()));
        }
        if self.notifier.host.is_empty() {
            return Err(ConfigError::Invalid("notifier.host must not be empty".into()));
        }
        Ok(())
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, target: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        *target = value.parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.dispatcher.tick_interval(), Duration::from_secs(30));
        assert_eq!(config.dispatcher.batch_size, 1000);
        assert_eq!(config.dispatcher.max_attempts, 5);
        assert_eq!(config.dispatcher.backoff_base(), Duration::from_secs(60));
        assert_eq!(config.store.kind, StoreKind::Mongo);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            [dispatcher]
            tick_interval_secs = 5

            [notifier]
            host = "flow-automation"
            port = 9101

            [store]
            kind = "postgres"
            url = "postgres://localhost/automation"
            "#,
        )
        .unwrap();

        assert_eq!(config.dispatcher.tick_interval_secs, 5);
        assert_eq!(config.dispatcher.batch_size, 1000);
        assert_eq!(config.notifier.base_url(), "http://flow-automation:9101");
        assert_eq!(config.store.kind, StoreKind::Postgres);
        assert_eq!(config.store.postgres_table, "outbox");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[bus]\nredis_url = \"redis://bus:6379\"").unwrap();

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bus.redis_url, "redis://bus:6379");
    }

    #[test]
    fn test_load_from_records_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nmetrics_port = 9191").unwrap();

        let config = AppConfig::load_from(Some(file.path()), |key| {
            (key == "AF_DISPATCH_BATCH_SIZE").then(|| "50".to_string())
        })
        .unwrap();
        assert_eq!(config.source.as_deref(), Some(file.path()));
        assert_eq!(config.server.metrics_port, 9191);
        assert_eq!(config.dispatcher.batch_size, 50);

        let config = AppConfig::load_from(None, |_| None).unwrap();
        assert!(config.source.is_none());
        assert!(config.server.enabled);
        assert_eq!(config.server.metrics_port, 9090);
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = AppConfig::from_file(Path::new("/nonexistent/af.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("AF_DISPATCH_INTERVAL_SECS", "12"),
            ("AF_NOTIFY_PORT", "7000"),
            ("AF_STORE_KIND", "mongodb"),
            ("AF_LOG_JSON", "true"),
            ("AF_METRICS_PORT", "9300"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.dispatcher.tick_interval_secs, 12);
        assert_eq!(config.notifier.port, 7000);
        assert_eq!(config.store.kind, StoreKind::Mongo);
        assert!(config.logging.json);
        assert_eq!(config.server.metrics_port, 9300);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(|key| (key == "AF_NOTIFY_PORT").then(|| "not-a-port".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.dispatcher.tick_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.notifier.path = "/task".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.dispatcher.max_attempts = 64;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.metrics_port = 0;
        assert!(config.validate().is_err());
        config.server.enabled = false;
        assert!(config.validate().is_ok());
    }
}
