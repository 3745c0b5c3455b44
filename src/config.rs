//! Configuration management for the MongoDB Lens core.
//!
//! Configuration is loaded from environment variables following the 12-factor
//! app pattern, then optionally overridden by a positional connection string
//! and a JSON config file (`~/.mongodb-lens.json` by default). The file wins
//! over both.

use crate::constants::{
    APPLICATION_NAME, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_HEARTBEAT_FREQUENCY_MS,
    DEFAULT_MAX_POOL_SIZE, DEFAULT_MEMORY_CRITICAL_MB, DEFAULT_MEMORY_WARNING_MB,
    DEFAULT_MONGODB_URI, DEFAULT_SERVER_SELECTION_TIMEOUT_MS, DEFAULT_SOCKET_TIMEOUT_MS,
    DEFAULT_WATCHDOG_INTERVAL, DEFAULT_WATCHDOG_INTERVAL_SECS,
};
use crate::error::ServerError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error};

/// Server configuration.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Connection string and driver options
    pub connection: ConnectionConfig,

    /// Background watchdog configuration
    pub watchdog: WatchdogConfig,

    /// Log every operation, not only warnings and failures
    pub verbose_logging: bool,

    /// Location of the optional JSON config file
    pub config_path: PathBuf,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionConfig {
    /// MongoDB connection string
    pub uri: String,

    /// Driver options
    pub options: ConnectionOptions,
}

/// Options handed to the driver when connecting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionOptions {
    /// Maximum number of connections in the driver pool
    pub max_pool_size: u32,

    /// Timeout for establishing a connection
    pub connect_timeout: Duration,

    /// Per-operation I/O timeout
    pub socket_timeout: Duration,

    /// How long to wait for a suitable server
    pub server_selection_timeout: Duration,

    /// Interval between server monitoring checks
    pub heartbeat_frequency: Duration,

    /// Driver-level write retries
    pub retry_writes: bool,

    /// Driver-level read retries
    pub retry_reads: bool,

    /// Application name reported to the server
    pub application_name: String,
}

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchdogConfig {
    /// Tick interval
    pub interval: Duration,

    /// Memory usage (MB) above which a warning is logged
    pub memory_warning_mb: u64,

    /// Memory usage (MB) above which the cache is dropped
    pub memory_critical_mb: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// All optional:
    /// - `MONGODB_URI`: Connection string (default: `mongodb://localhost:27017`)
    /// - `MONGODB_MAX_POOL_SIZE`: Pool size cap (default: 20)
    /// - `MONGODB_CONNECT_TIMEOUT_MS`: Connect timeout (default: 30000)
    /// - `MONGODB_SOCKET_TIMEOUT_MS`: Per-operation timeout (default: 360000)
    /// - `MONGODB_SERVER_SELECTION_TIMEOUT_MS`: Server selection timeout (default: 30000)
    /// - `MONGODB_HEARTBEAT_FREQUENCY_MS`: Heartbeat interval (default: 10000)
    /// - `MONGODB_LENS_WATCHDOG_INTERVAL_SECS`: Watchdog tick (default: 30)
    /// - `MONGODB_LENS_MEMORY_WARNING_MB`: Warning threshold (default: 1500)
    /// - `MONGODB_LENS_MEMORY_CRITICAL_MB`: Critical threshold (default: 2000)
    /// - `VERBOSE_LOGGING`: `true` to log every operation
    /// - `CONFIG_PATH`: JSON config file (default: `$HOME/.mongodb-lens.json`)
    pub fn from_env() -> Result<Self, ServerError> {
        let uri = std::env::var("MONGODB_URI").unwrap_or_else(|_| DEFAULT_MONGODB_URI.to_string());

        let max_pool_size = env_parse("MONGODB_MAX_POOL_SIZE").unwrap_or(DEFAULT_MAX_POOL_SIZE);

        let connect_timeout_ms =
            env_parse("MONGODB_CONNECT_TIMEOUT_MS").unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        let socket_timeout_ms =
            env_parse("MONGODB_SOCKET_TIMEOUT_MS").unwrap_or(DEFAULT_SOCKET_TIMEOUT_MS);

        let server_selection_timeout_ms = env_parse("MONGODB_SERVER_SELECTION_TIMEOUT_MS")
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT_MS);

        let heartbeat_frequency_ms =
            env_parse("MONGODB_HEARTBEAT_FREQUENCY_MS").unwrap_or(DEFAULT_HEARTBEAT_FREQUENCY_MS);

        let watchdog_interval_secs = env_parse("MONGODB_LENS_WATCHDOG_INTERVAL_SECS")
            .unwrap_or(DEFAULT_WATCHDOG_INTERVAL_SECS);

        let memory_warning_mb =
            env_parse("MONGODB_LENS_MEMORY_WARNING_MB").unwrap_or(DEFAULT_MEMORY_WARNING_MB);

        let memory_critical_mb =
            env_parse("MONGODB_LENS_MEMORY_CRITICAL_MB").unwrap_or(DEFAULT_MEMORY_CRITICAL_MB);

        let verbose_logging = std::env::var("VERBOSE_LOGGING")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);

        let config_path = std::env::var("CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());

        let config = Config {
            connection: ConnectionConfig {
                uri,
                options: ConnectionOptions {
                    max_pool_size,
                    connect_timeout: Duration::from_millis(connect_timeout_ms),
                    socket_timeout: Duration::from_millis(socket_timeout_ms),
                    server_selection_timeout: Duration::from_millis(server_selection_timeout_ms),
                    heartbeat_frequency: Duration::from_millis(heartbeat_frequency_ms),
                    ..ConnectionOptions::default()
                },
            },
            watchdog: WatchdogConfig {
                interval: Duration::from_secs(watchdog_interval_secs),
                memory_warning_mb,
                memory_critical_mb,
            },
            verbose_logging,
            config_path,
        };

        config.validate()?;
        Ok(config)
    }

    /// Default settings for the given connection string; nothing is read
    /// from the environment.
    pub fn for_uri(uri: impl Into<String>) -> Self {
        Config {
            connection: ConnectionConfig {
                uri: uri.into(),
                options: ConnectionOptions::default(),
            },
            watchdog: WatchdogConfig::default(),
            verbose_logging: false,
            config_path: default_config_path(),
        }
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.connection.uri.trim().is_empty() {
            return Err(ServerError::config("MongoDB connection string is empty"));
        }
        if self.connection.options.max_pool_size == 0 {
            return Err(ServerError::config("MONGODB_MAX_POOL_SIZE must be at least 1"));
        }
        let options = &self.connection.options;
        for (name, timeout) in [
            ("connectTimeoutMS", options.connect_timeout),
            ("socketTimeoutMS", options.socket_timeout),
            ("serverSelectionTimeoutMS", options.server_selection_timeout),
            ("heartbeatFrequencyMS", options.heartbeat_frequency),
        ] {
            if timeout.is_zero() {
                return Err(ServerError::config(format!("{} must be at least 1", name)));
            }
        }
        if self.watchdog.interval.is_zero() {
            return Err(ServerError::config(
                "MONGODB_LENS_WATCHDOG_INTERVAL_SECS must be at least 1",
            ));
        }
        if self.watchdog.memory_critical_mb <= self.watchdog.memory_warning_mb {
            return Err(ServerError::config(
                "MONGODB_LENS_MEMORY_CRITICAL_MB must be greater than MONGODB_LENS_MEMORY_WARNING_MB",
            ));
        }
        Ok(())
    }

    /// Replace the connection string with one given on the command line.
    pub fn with_uri_override(mut self, uri: Option<String>) -> Self {
        if let Some(uri) = uri.filter(|u| !u.trim().is_empty()) {
            self.connection.uri = uri;
        }
        self
    }

    /// Apply a config file on top of the current values.
    pub fn apply_file(&mut self, file: &ConfigFile) {
        if let Some(uri) = file.mongo_uri.as_ref().filter(|u| !u.trim().is_empty()) {
            self.connection.uri = uri.clone();
        }
        if let Some(overrides) = &file.connection_options {
            overrides.apply(&mut self.connection.options);
        }
    }

    /// Load the config file at `config_path`, if any, and apply it.
    ///
    /// Errors are logged, so call this after logging is set up. A file that
    /// cannot be read, or whose values fail validation, is ignored as a
    /// whole.
    pub fn merge_config_file(self) -> Self {
        let Some(file) = ConfigFile::load(&self.config_path) else {
            return self;
        };

        let mut merged = self.clone();
        merged.apply_file(&file);
        match merged.validate() {
            Ok(()) => {
                debug!("Applied config file {}", self.config_path.display());
                merged
            }
            Err(e) => {
                error!(
                    "Ignoring config file {}: {}",
                    self.config_path.display(),
                    e
                );
                self
            }
        }
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            socket_timeout: Duration::from_millis(DEFAULT_SOCKET_TIMEOUT_MS),
            server_selection_timeout: Duration::from_millis(DEFAULT_SERVER_SELECTION_TIMEOUT_MS),
            heartbeat_frequency: Duration::from_millis(DEFAULT_HEARTBEAT_FREQUENCY_MS),
            retry_writes: false,
            retry_reads: false,
            application_name: APPLICATION_NAME.to_string(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_WATCHDOG_INTERVAL,
            memory_warning_mb: DEFAULT_MEMORY_WARNING_MB,
            memory_critical_mb: DEFAULT_MEMORY_CRITICAL_MB,
        }
    }
}

/// Contents of the optional JSON config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub mongo_uri: Option<String>,
    pub connection_options: Option<ConnectionOptionsOverride>,
}

/// Driver options that may be set from the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptionsOverride {
    pub max_pool_size: Option<u32>,
    #[serde(rename = "connectTimeoutMS")]
    pub connect_timeout_ms: Option<u64>,
    #[serde(rename = "socketTimeoutMS")]
    pub socket_timeout_ms: Option<u64>,
    #[serde(rename = "serverSelectionTimeoutMS")]
    pub server_selection_timeout_ms: Option<u64>,
    #[serde(rename = "heartbeatFrequencyMS")]
    pub heartbeat_frequency_ms: Option<u64>,
    pub retry_writes: Option<bool>,
}

impl ConnectionOptionsOverride {
    fn apply(&self, options: &mut ConnectionOptions) {
        if let Some(size) = self.max_pool_size.filter(|s| *s > 0) {
            options.max_pool_size = size;
        }
        if let Some(ms) = self.connect_timeout_ms {
            options.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.socket_timeout_ms {
            options.socket_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.server_selection_timeout_ms {
            options.server_selection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.heartbeat_frequency_ms {
            options.heartbeat_frequency = Duration::from_millis(ms);
        }
        if let Some(retry) = self.retry_writes {
            options.retry_writes = retry;
        }
    }
}

impl ConfigFile {
    /// Parse a config file body.
    pub fn parse(body: &str) -> Result<Self, ServerError> {
        serde_json::from_str(body)
            .map_err(|e| ServerError::config(format!("Invalid config file: {}", e)))
    }

    /// Read and parse the file at `path`.
    ///
    /// A missing file is not an error. A malformed one is logged and ignored.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        let result = std::fs::read_to_string(path)
            .map_err(|e| ServerError::config(format!("Cannot read config file: {}", e)))
            .and_then(|body| Self::parse(&body));

        match result {
            Ok(file) => Some(file),
            Err(e) => {
                error!("Error loading config file {}: {}", path.display(), e);
                None
            }
        }
    }
}

fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));
    home.join(".mongodb-lens.json")
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}
