//! # Configuration Management
//!
//! Configuration for the authentication daemon and its connections.
//!
//! ## Configuration Sources
//! - TOML files via [`AuthConfig::from_file`]
//! - `GLYPH_AUTH_*` environment overrides via [`AuthConfig::apply_env`]
//! - Direct instantiation with defaults
//!
//! Durations are written as milliseconds. Every section has serde defaults, so a file
//! only needs the keys it changes:
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:3724"
//! allowed_builds = [5875, 8606, 12340]
//!
//! [socket]
//! idle_timeout = 30000
//!
//! [[accounts]]
//! name = "test"
//! password = "test"
//! ```

use crate::error::{AuthError, Result};
use crate::protocol::command::{CHALLENGE_FIXED_BODY_LEN, CHALLENGE_HEADER_LEN};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default logon port
pub const DEFAULT_PORT: u16 = 3724;

/// Smallest input buffer that can hold a challenge with a 255-byte account name
pub const MIN_READ_BUFFER: usize = CHALLENGE_HEADER_LEN + CHALLENGE_FIXED_BODY_LEN + u8::MAX as usize;

/// Top-level daemon configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-connection socket settings
    #[serde(default)]
    pub socket: SocketConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Accounts seeded into the in-memory directory
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
}

impl AuthConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::ConfigError(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| AuthError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `GLYPH_AUTH_*` variables.
    ///
    /// A variable that is set but unparsable is an error rather than silently ignored.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("GLYPH_AUTH_ADDRESS") {
            self.server.address = addr;
        }
        if let Some(val) = env_parse::<usize>("GLYPH_AUTH_MAX_CONNECTIONS")? {
            self.server.max_connections = val;
        }
        if let Some(val) = env_parse::<u64>("GLYPH_AUTH_IDLE_TIMEOUT_MS")? {
            self.socket.idle_timeout = Duration::from_millis(val);
        }
        if let Ok(builds) = std::env::var("GLYPH_AUTH_ALLOWED_BUILDS") {
            self.server.allowed_builds = builds
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<u16>().map_err(|e| {
                        AuthError::ConfigError(format!("GLYPH_AUTH_ALLOWED_BUILDS: {e}"))
                    })
                })
                .collect::<Result<_>>()?;
        }
        if let Ok(level) = std::env::var("GLYPH_AUTH_LOG_LEVEL") {
            self.logging.log_level = level
                .parse::<Level>()
                .map_err(|_| AuthError::ConfigError(format!("Invalid log level: {level}")))?;
        }
        Ok(())
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.socket.validate());
        errors.extend(self.logging.validate());

        let mut seen = HashSet::new();
        for account in &self.accounts {
            errors.extend(account.validate());
            if !seen.insert(account.name.to_ascii_lowercase()) {
                errors.push(format!("Duplicate account name: '{}'", account.name));
            }
        }
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AuthError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| AuthError::ConfigError(format!("{key}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Listener and service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g., "0.0.0.0:3724")
    pub address: String,

    /// Maximum number of concurrent sessions
    pub max_connections: usize,

    /// Capacity of the accept event channel
    pub accept_queue: usize,

    /// Client builds allowed to log in. Empty allows every build.
    pub allowed_builds: Vec<u16>,

    /// Time given to open sessions after shutdown is requested
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,

    /// Period of the metrics log line. Zero disables it.
    #[serde(with = "duration_serde")]
    pub metrics_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_connections: 1000,
            accept_queue: 32,
            allowed_builds: Vec::new(),
            shutdown_timeout: Duration::from_secs(10),
            metrics_interval: Duration::from_secs(60),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:3724')",
                self.address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.accept_queue == 0 {
            errors.push("Accept queue must be greater than 0".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        if !self.metrics_interval.is_zero() && self.metrics_interval.as_secs() < 1 {
            errors.push("Metrics interval too short (minimum: 1s, or 0 to disable)".to_string());
        }

        errors
    }
}

/// Lower and upper byte thresholds of one direction of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Watermark {
    pub low: usize,
    pub high: usize,
}

impl Watermark {
    pub const fn new(low: usize, high: usize) -> Self {
        Self { low, high }
    }

    fn validate(&self, direction: &str) -> Vec<String> {
        let mut errors = Vec::new();
        if self.high == 0 {
            errors.push(format!("{direction} watermark high must be greater than 0"));
        }
        if self.low > self.high {
            errors.push(format!(
                "{direction} watermark low ({}) exceeds high ({})",
                self.low, self.high
            ));
        }
        errors
    }
}

/// Per-connection socket settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    /// `high` is the input buffer capacity, `low` the bytes needed for a data-ready event
    pub read_watermark: Watermark,

    /// `high` bounds each write and marks congestion, `low` ends it
    pub write_watermark: Watermark,

    /// Inactivity period before a timeout event
    #[serde(with = "duration_serde")]
    pub idle_timeout: Duration,

    /// Time spent flushing pending output on close
    #[serde(with = "duration_serde")]
    pub linger: Duration,

    /// Capacity of the per-connection event channel
    pub event_capacity: usize,

    /// Set TCP_NODELAY on accepted connections
    pub nodelay: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            read_watermark: Watermark::new(0, 4096),
            write_watermark: Watermark::new(0, 4096),
            idle_timeout: Duration::from_secs(30),
            linger: Duration::from_secs(1),
            event_capacity: 32,
            nodelay: true,
        }
    }
}

impl SocketConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.read_watermark.validate("Read"));
        errors.extend(self.write_watermark.validate("Write"));
        if self.read_watermark.high > 0 && self.read_watermark.high < MIN_READ_BUFFER {
            errors.push(format!(
                "Read watermark high too small: {} (minimum: {MIN_READ_BUFFER} bytes)",
                self.read_watermark.high
            ));
        }

        if self.idle_timeout.as_millis() < 100 {
            errors.push("Idle timeout too short (minimum: 100ms)".to_string());
        } else if self.idle_timeout.as_secs() > 300 {
            errors.push("Idle timeout too long (maximum: 300s)".to_string());
        }

        if self.linger.as_secs() > 30 {
            errors.push("Linger too long (maximum: 30s)".to_string());
        }

        if self.event_capacity == 0 {
            errors.push("Event capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Default level, overridden by `RUST_LOG` when set
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    pub log_to_console: bool,

    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("glyph-authd"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// One account seeded into the in-memory directory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccountEntry {
    pub name: String,
    pub password: String,
    #[serde(default)]
    pub banned: bool,
}

impl AccountEntry {
    fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.name.is_empty() {
            errors.push("Account name cannot be empty".to_string());
        } else if self.name.len() > u8::MAX as usize {
            errors.push(format!(
                "Account name too long: {} bytes (maximum: 255)",
                self.name.len()
            ));
        }
        if !self.name.is_ascii() || !self.password.is_ascii() {
            errors.push(format!("Account '{}' must use ASCII credentials", self.name));
        }
        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        level.as_str().to_ascii_lowercase().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
