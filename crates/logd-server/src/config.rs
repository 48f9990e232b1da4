//! Daemon configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// UDP transport and protocol settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Log store settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// HTTP status endpoint settings.
    #[serde(default)]
    pub status: StatusConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// UDP transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Host address to bind the UDP socket to.
    pub host: IpAddr,

    /// UDP port to listen on.
    pub port: u16,

    /// Secret authenticating TAIL and PING tokens.
    pub read_secret: String,

    /// Secret authenticating WRITE and QUERY commands.
    pub write_secret: String,

    /// Accepted clock skew / replay window for signed envelopes, in milliseconds.
    pub sig_ttl_ms: u64,

    /// Expected interval between subscriber pings, in milliseconds.
    pub ping_period_ms: u64,

    /// Number of ping periods a subscriber may stay silent before eviction.
    pub missed_pings_allowed: u32,

    /// Deadline for a single outbound datagram, in milliseconds.
    pub write_timeout_ms: u64,

    /// Capacity of the inbound data-plane queue.
    pub inbound_queue: usize,

    /// Capacity of the fan-out queue.
    pub fanout_queue: usize,

    /// Maximum concurrently running control and query handlers.
    pub max_inflight: usize,

    /// Maximum number of active subscribers.
    pub max_subscribers: usize,
}

/// Log store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    pub path: String,

    /// SQLite busy timeout, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    pub pool_max_size: u32,

    /// Records kept per partition; older records are pruned.
    pub max_records_per_partition: u64,

    /// Seconds between retention passes. `0` disables retention.
    pub retention_interval_secs: u64,

    /// Upper bound on records returned by a single query.
    pub query_max_results: u32,
}

/// HTTP status endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    /// Whether to serve the status endpoint at all.
    pub enabled: bool,

    /// Host address to bind to.
    pub host: IpAddr,

    /// Port to listen on.
    pub port: u16,

    /// Value of the `Access-Control-Allow-Origin` header (`*` for any).
    pub allow_origin: String,

    /// Requests allowed per client IP per minute.
    pub rate_limit_per_minute: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "logd_server=debug,info").
    pub level: String,

    /// Whether to output logs in JSON format.
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 6102,
            read_secret: String::new(),
            write_secret: String::new(),
            sig_ttl_ms: 200,
            ping_period_ms: 1_000,
            missed_pings_allowed: 10,
            write_timeout_ms: 100,
            inbound_queue: 1_024,
            fanout_queue: 1_024,
            max_inflight: 256,
            max_subscribers: 1_024,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "logd.db".to_string(),
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            max_records_per_partition: 100_000,
            retention_interval_secs: 60,
            query_max_results: logd_db::DEFAULT_QUERY_MAX_RESULTS,
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: 6101,
            allow_origin: "*".to_string(),
            rate_limit_per_minute: 120,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl TransportConfig {
    /// Socket address of the UDP listener.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn sig_ttl(&self) -> Duration {
        Duration::from_millis(self.sig_ttl_ms)
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl StatusConfig {
    /// Socket address of the HTTP listener.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl DatabaseConfig {
    /// Connection settings for the store pool.
    pub fn runtime_settings(&self) -> logd_db::DbRuntimeSettings {
        logd_db::DbRuntimeSettings {
            busy_timeout_ms: self.busy_timeout_ms,
            pool_max_size: self.pool_max_size,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required secret is empty.
    #[error("{0} must be set")]
    MissingSecret(&'static str),
}

impl Config {
    /// Checks settings the daemon cannot run without.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingSecret` if either secret is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.read_secret.is_empty() {
            return Err(ConfigError::MissingSecret("transport.read_secret"));
        }
        if self.transport.write_secret.is_empty() {
            return Err(ConfigError::MissingSecret("transport.write_secret"));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `LOGD_HOST` overrides `transport.host`
/// - `LOGD_PORT` overrides `transport.port`
/// - `LOGD_READ_SECRET` overrides `transport.read_secret`
/// - `LOGD_WRITE_SECRET` overrides `transport.write_secret`
/// - `LOGD_SIG_TTL` overrides `transport.sig_ttl_ms`
/// - `LOGD_DB_PATH` overrides `database.path`
/// - `LOGD_STATUS_PORT` overrides `status.port`
/// - `LOGD_LOG_LEVEL` overrides `logging.level`
/// - `LOGD_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(host) = var("LOGD_HOST") {
        if let Ok(parsed) = host.parse() {
            config.transport.host = parsed;
        }
    }
    if let Some(port) = var("LOGD_PORT") {
        if let Ok(parsed) = port.parse() {
            config.transport.port = parsed;
        }
    }
    if let Some(secret) = var("LOGD_READ_SECRET") {
        config.transport.read_secret = secret;
    }
    if let Some(secret) = var("LOGD_WRITE_SECRET") {
        config.transport.write_secret = secret;
    }
    if let Some(ttl) = var("LOGD_SIG_TTL") {
        if let Ok(parsed) = ttl.parse() {
            config.transport.sig_ttl_ms = parsed;
        }
    }
    if let Some(db_path) = var("LOGD_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(port) = var("LOGD_STATUS_PORT") {
        if let Ok(parsed) = port.parse() {
            config.status.port = parsed;
        }
    }
    if let Some(level) = var("LOGD_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("LOGD_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
