//! Configuration management for the WebShell server.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/webshell/config.toml`.

use std::collections::BTreeMap;
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{normalize_level, LogFormat};
use crate::session::{BrokerConfig, DEFAULT_INIT_SEQUENCE, DEFAULT_MALFORMED_FRAME_THRESHOLD};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// `server.port` is zero.
    #[error("port must be non-zero")]
    InvalidPort,

    /// `server.bind_address` does not parse as an IP address.
    #[error("bind_address must be an IP address, got {0}")]
    InvalidBindAddress(String),

    /// `server.max_sessions` is out of range.
    #[error("max_sessions must be between 1 and 10000, got {0}")]
    InvalidMaxSessions(usize),

    /// `session.malformed_frame_threshold` is zero.
    #[error("malformed_frame_threshold must be at least 1")]
    InvalidMalformedThreshold,

    /// A default terminal dimension is zero.
    #[error("default dimensions must be non-zero, got {rows}x{cols}")]
    InvalidDimensions { rows: u16, cols: u16 },

    /// `session.shells` is empty.
    #[error("at least one shell must be configured")]
    NoShells,

    /// A local shell could not be found.
    #[error("shell not found in PATH: {0}")]
    InvalidShellPath(String),

    /// `session.exec_template` never mentions the shell.
    #[error("exec_template must contain a {{shell}} placeholder")]
    MissingShellPlaceholder,

    /// `log.level` is not a recognised level.
    #[error("log_level must be one of: trace, debug, info, warn (warning), error; got {0}")]
    InvalidLogLevel(String),
}

/// Main configuration structure for the WebShell server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Listener configuration.
    pub server: ServerConfig,

    /// Session and process configuration.
    pub session: SessionConfig,

    /// Logging configuration.
    pub log: LogConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_address: String,

    /// TCP port to listen on.
    pub port: u16,

    /// Time a client has to complete the WebSocket handshake.
    pub handshake_timeout_ms: u64,

    /// Maximum number of concurrent sessions.
    pub max_sessions: usize,
}

/// Session and process configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shells to try, in order.
    pub shells: Vec<String>,

    /// Command template run for each shell. Empty runs the shell locally.
    pub exec_template: Vec<String>,

    /// Terminal rows before the first resize.
    pub default_rows: u16,

    /// Terminal columns before the first resize.
    pub default_cols: u16,

    /// Write `init_sequence` to the shell after attaching.
    pub init_handshake: bool,

    /// Bytes written to the shell when `init_handshake` is set.
    pub init_sequence: String,

    /// Consecutive malformed frames tolerated before detaching.
    pub malformed_frame_threshold: u32,

    /// Time a process gets to exit after SIGHUP before it is killed.
    pub kill_grace_ms: u64,

    /// Upper bound on sending the close frame.
    pub close_timeout_ms: u64,

    /// Extra environment variables for the process.
    pub env: BTreeMap<String, String>,

    /// Working directory for the process.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LogConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Output format.
    pub format: LogFormat,

    /// Log file. Logs go to stderr when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            handshake_timeout_ms: 2000,
            max_sessions: 64,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shells: vec!["bash".to_string(), "sh".to_string()],
            exec_template: Vec::new(),
            default_rows: 24,
            default_cols: 80,
            init_handshake: true,
            init_sequence: DEFAULT_INIT_SEQUENCE.to_string(),
            malformed_frame_threshold: DEFAULT_MALFORMED_FRAME_THRESHOLD,
            kill_grace_ms: 500,
            close_timeout_ms: 1000,
            env: BTreeMap::new(),
            cwd: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            output: None,
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl SessionConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Returns the broker settings derived from this section.
    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            malformed_frame_threshold: self.malformed_frame_threshold,
            init_sequence: self
                .init_handshake
                .then(|| self.init_sequence.clone())
                .filter(|s| !s.is_empty()),
            close_timeout: Duration::from_millis(self.close_timeout_ms),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webshell")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - WEBSHELL_PORT: Override listen port
    /// - WEBSHELL_BIND_ADDRESS: Override bind address
    /// - WEBSHELL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WEBSHELL_LOG_FORMAT: Override log format (text, json)
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env_value("WEBSHELL_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!(port, "Overriding port from environment");
                    self.server.port = port;
                }
                Err(_) => tracing::warn!(value = %port, "Ignoring invalid WEBSHELL_PORT"),
            }
        }

        if let Some(address) = env_value("WEBSHELL_BIND_ADDRESS") {
            tracing::info!(bind_address = %address, "Overriding bind_address from environment");
            self.server.bind_address = address;
        }

        if let Some(level) = env_value("WEBSHELL_LOG_LEVEL") {
            tracing::info!(level = %level, "Overriding log level from environment");
            self.log.level = level;
        }

        if let Some(format) = env_value("WEBSHELL_LOG_FORMAT") {
            match format.parse::<LogFormat>() {
                Ok(format) => self.log.format = format,
                Err(_) => tracing::warn!(value = %format, "Ignoring invalid WEBSHELL_LOG_FORMAT"),
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if self.server.bind_address.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidBindAddress(
                self.server.bind_address.clone(),
            ));
        }

        if !(1..=10_000).contains(&self.server.max_sessions) {
            return Err(ConfigError::InvalidMaxSessions(self.server.max_sessions));
        }

        let session = &self.session;
        if session.malformed_frame_threshold == 0 {
            return Err(ConfigError::InvalidMalformedThreshold);
        }

        if session.default_rows == 0 || session.default_cols == 0 {
            return Err(ConfigError::InvalidDimensions {
                rows: session.default_rows,
                cols: session.default_cols,
            });
        }

        if session.shells.is_empty() {
            return Err(ConfigError::NoShells);
        }

        if session.exec_template.is_empty() {
            // Local shells must exist; at least one of them is enough.
            if !session.shells.iter().any(|shell| which::which(shell).is_ok()) {
                return Err(ConfigError::InvalidShellPath(session.shells.join(", ")));
            }
        } else if !session
            .exec_template
            .iter()
            .any(|part| part.contains("{shell}"))
        {
            return Err(ConfigError::MissingShellPlaceholder);
        }

        if normalize_level(&self.log.level).is_none() {
            return Err(ConfigError::InvalidLogLevel(self.log.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
