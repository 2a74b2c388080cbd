//! Tracing subscriber setup.
//!
//! Logs are written through a non-blocking writer to stderr or to the file
//! named in `[log] output`. `RUST_LOG` replaces the configured filter.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Dependencies that are capped at `info` unless `RUST_LOG` says otherwise.
const NOISY_TARGETS: &[&str] = &["tokio_tungstenite", "tungstenite", "mio"];

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Errors that can occur while installing the subscriber.
#[derive(Error, Debug)]
pub enum LogInitError {
    /// The log file could not be opened.
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The level or `RUST_LOG` directives did not parse.
    #[error("invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error("failed to install logger: {0}")]
    Install(String),
}

/// Installs the global subscriber.
///
/// The returned guard flushes buffered lines when dropped and must be held
/// for as long as the process logs.
pub fn init(config: &LogConfig) -> Result<WorkerGuard, LogInitError> {
    let filter = build_filter(&config.level)?;

    let (writer, guard) = match &config.output {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LogInitError::Io {
                    path: path.clone(),
                    source,
                })?;
            tracing_appender::non_blocking(file)
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_ansi(config.output.is_none())
        .with_writer(writer);

    let installed = match config.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| LogInitError::Install(e.to_string()))?;

    Ok(guard)
}

/// Returns the canonical lowercase name of a level, if it is one.
pub fn normalize_level(level: &str) -> Option<&'static str> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Some("trace"),
        "debug" => Some("debug"),
        "info" => Some("info"),
        "warn" | "warning" => Some("warn"),
        "error" => Some("error"),
        _ => None,
    }
}

fn build_filter(level: &str) -> Result<EnvFilter, LogInitError> {
    if let Ok(directives) = std::env::var(EnvFilter::DEFAULT_ENV) {
        if !directives.is_empty() {
            return EnvFilter::try_new(&directives)
                .map_err(|e| LogInitError::Filter(format!("{directives}: {e}")));
        }
    }

    EnvFilter::try_new(default_directives(level))
        .map_err(|e| LogInitError::Filter(e.to_string()))
}

fn default_directives(level: &str) -> String {
    let level = normalize_level(level).unwrap_or("info");
    let mut directives = level.to_string();
    if matches!(level, "trace" | "debug") {
        for target in NOISY_TARGETS {
            directives.push_str(&format!(",{target}=info"));
        }
    }
    directives
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_level() {
        assert_eq!(normalize_level("INFO"), Some("info"));
        assert_eq!(normalize_level(" warning "), Some("warn"));
        assert_eq!(normalize_level("loud"), None);
    }

    #[test]
    fn test_default_directives() {
        assert_eq!(default_directives("warn"), "warn");
        assert_eq!(default_directives("bogus"), "info");

        let trace = default_directives("trace");
        assert!(trace.starts_with("trace,"));
        assert!(trace.contains("tungstenite=info"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Text));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_init_reports_unwritable_file() {
        let config = LogConfig {
            output: Some(PathBuf::from("/nonexistent-dir/webshell.log")),
            ..LogConfig::default()
        };
        assert!(matches!(init(&config), Err(LogInitError::Io { .. })));
    }
}
