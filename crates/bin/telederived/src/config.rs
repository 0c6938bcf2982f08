//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `telederive.toml` in the working directory, or the file named by
//! `TELEDERIVE_CONFIG`. Every field has a sensible default so the file is
//! optional. Environment variables take precedence over file values.

use std::time::Duration;

use serde::Deserialize;
use telederive_adapter_mqtt::MqttConfig;
use telederive_app::reconcile_worker::RetryBackoff;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Database settings.
    pub database: DatabaseConfig,
    /// Message bus settings.
    pub mqtt: MqttConfig,
    /// Worker and timeout settings.
    pub runtime: RuntimeConfig,
    /// Reconfiguration webhook settings.
    pub reconfigure: ReconfigureConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// TCP port.
    pub port: u16,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Upper bound for every configuration store call.
    pub store_timeout_ms: u64,
    /// Snapshots waiting to be persisted before new ones are dropped.
    pub write_through_capacity: usize,
    /// Pending reconcile requests before new ones are coalesced.
    pub reconcile_capacity: usize,
    /// Delay before the first retry of a failed reconcile, doubled each time.
    pub reconcile_retry_initial_ms: u64,
    /// Upper bound for the reconcile retry delay.
    pub reconcile_retry_max_ms: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReconfigureConfig {
    /// Shared HMAC secret. Unset means webhook requests are not verified.
    pub secret: Option<String>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

impl Config {
    /// Load configuration from `telederive.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var("TELEDERIVE_CONFIG").unwrap_or_else(|_| "telederive.toml".to_string());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("TELEDERIVE_HOST") {
            self.server.host = val;
        }
        if let Some(port) = var("TELEDERIVE_PORT").and_then(|val| val.parse().ok()) {
            self.server.port = port;
        }
        if let Some(val) = var("TELEDERIVE_BIND") {
            if let Some((host, port)) = val.rsplit_once(':') {
                self.server.host = host.to_string();
                if let Ok(port) = port.parse() {
                    self.server.port = port;
                }
            }
        }
        if let Some(val) = var("TELEDERIVE_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("TELEDERIVE_MQTT_HOST") {
            self.mqtt.broker_host = val;
        }
        if let Some(port) = var("TELEDERIVE_MQTT_PORT").and_then(|val| val.parse().ok()) {
            self.mqtt.broker_port = port;
        }
        if let Some(val) = var("TELEDERIVE_MQTT_USERNAME") {
            self.mqtt.username = Some(val);
        }
        if let Some(val) = var("TELEDERIVE_MQTT_PASSWORD") {
            self.mqtt.password = Some(val);
        }
        if let Some(val) = var("TELEDERIVE_RECONFIGURE_SECRET") {
            self.reconfigure.secret = Some(val);
        }
        if let Some(ms) = var("TELEDERIVE_STORE_TIMEOUT_MS").and_then(|val| val.parse().ok()) {
            self.runtime.store_timeout_ms = ms;
        }
        if let Some(val) = var("TELEDERIVE_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation("port must be non-zero".to_string()));
        }
        if self.mqtt.broker_port == 0 {
            return Err(ConfigError::Validation(
                "mqtt.broker_port must be non-zero".to_string(),
            ));
        }
        if self.runtime.store_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "runtime.store_timeout_ms must be non-zero".to_string(),
            ));
        }
        if self.runtime.reconcile_retry_initial_ms == 0
            || self.runtime.reconcile_retry_max_ms < self.runtime.reconcile_retry_initial_ms
        {
            return Err(ConfigError::Validation(
                "runtime.reconcile_retry_initial_ms must be non-zero and not above reconcile_retry_max_ms"
                    .to_string(),
            ));
        }
        for (name, capacity) in [
            ("mqtt.inbound_capacity", self.mqtt.inbound_capacity),
            ("mqtt.request_capacity", self.mqtt.request_capacity),
            ("runtime.write_through_capacity", self.runtime.write_through_capacity),
            ("runtime.reconcile_capacity", self.runtime.reconcile_capacity),
        ] {
            if capacity == 0 {
                return Err(ConfigError::Validation(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Return the `host:port` bind address.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    #[must_use]
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.store_timeout_ms)
    }

    #[must_use]
    pub fn reconcile_backoff(&self) -> RetryBackoff {
        RetryBackoff {
            initial: Duration::from_millis(self.runtime.reconcile_retry_initial_ms),
            max: Duration::from_millis(self.runtime.reconcile_retry_max_ms),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:telederive.db?mode=rwc".to_string(),
            max_connections: 5,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            store_timeout_ms: 5_000,
            write_through_capacity: 256,
            reconcile_capacity: 1,
            reconcile_retry_initial_ms: 500,
            reconcile_retry_max_ms: 30_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "telederived=info,telederive=info,tower_http=debug".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
