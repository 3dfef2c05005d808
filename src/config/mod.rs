//! Application configuration.
//!
//! Aggregates configuration for both binaries into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "COURIER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "COURIER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "COURIER_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// gRPC server configuration.
    pub server: ServerConfig,
    /// Identity of this gateway instance.
    pub instance: InstanceConfig,
    /// Relational storage configuration.
    pub storage: StorageConfig,
    /// Redis endpoint shared by the registry and the bus.
    pub redis: RedisConfig,
    /// Connection registry configuration.
    pub registry: RegistryConfig,
    /// Message bus configuration.
    pub bus: BusConfig,
    /// Delivery dispatch configuration.
    pub dispatch: DispatchConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in the current directory (if it exists)
    /// 2. File specified by the `path` argument (if provided)
    /// 3. File specified by `COURIER_CONFIG` (if set)
    /// 4. Environment variables with the `COURIER` prefix, `__` separator
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

/// gRPC listen address.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
        }
    }
}

impl ServerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Identity of this gateway instance. The streamer derives its routing
/// topic from it; every publisher addressing this instance must use the
/// same string.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub id: String,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            id: std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string()),
        }
    }
}

/// SQLite storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file path.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "courier.db".to_string(),
        }
    }
}

/// Redis endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Registry backend discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryKind {
    #[default]
    Redis,
    /// In-process map; single-instance deployments and tests only.
    Memory,
}

/// Connection registry configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub kind: RegistryKind,
    /// Namespace for presence keys.
    pub key_prefix: String,
    /// Presence TTL in seconds. The sole staleness bound for routing;
    /// size it against expected reconnect/rebalance intervals.
    pub ttl_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Redis,
            key_prefix: "courier".to_string(),
            ttl_secs: 86400,
        }
    }
}

/// Bus backend discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Redis,
    /// In-process broadcast channels; single-instance deployments and
    /// tests only.
    Channel,
}

/// Message bus configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Backend discriminator.
    #[serde(rename = "type")]
    pub kind: BusKind,
}

/// Delivery dispatch configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Background drain period in seconds.
    pub interval_secs: u64,
    /// Age a pending delivery must reach before the drain picks it up,
    /// so the drain does not race deliveries still being dispatched by
    /// their own send.
    pub grace_secs: i64,
    /// Attempt cap per delivery; rows at the cap are left for inspection.
    pub max_attempts: i64,
    /// Maximum deliveries fetched per drain pass.
    pub batch_size: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            grace_secs: 30,
            max_attempts: 10,
            batch_size: 100,
        }
    }
}
