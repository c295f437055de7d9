//! Structured logging setup.

use crate::errors::ConfigurationError;
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

const REDACTED: &str = "[REDACTED]";

const SENSITIVE_KEYS: [&str; 9] = [
    "api_key",
    "api-key",
    "apikey",
    "authorization",
    "auth",
    "token",
    "secret",
    "password",
    "cookie",
];

/// Threshold for the executor's own events.
///
/// Retries, governor waits and terminal failures log at `debug` and `warn`;
/// `info` is quiet apart from the host application's events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Every dispatch, wait and retry decision
    Debug,
    /// Host application events only
    Info,
    /// Terminal failures and exhausted server quotas
    Warn,
    /// Errors only
    Error,
}

impl LogLevel {
    fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Output encoding of the installed subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per event, with span fields flattened in
    Json,
    /// Single-line human readable events
    Compact,
}

/// Subscriber settings for binaries and tests embedding the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level applied when `RUST_LOG` is not set
    pub level: LogLevel,
    /// Output encoding
    pub format: LogFormat,
    /// Print the module path of each event
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Compact output at `info`
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    /// Set the output encoding
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Print module paths
    pub fn with_target(mut self, include: bool) -> Self {
        self.include_target = include;
        self
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }
}

/// Install a global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), ConfigurationError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(config.env_filter())
        .with_target(config.include_target);

    let result = match config.format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };

    result.map_err(|e| ConfigurationError::invalid(format!("Failed to install logger: {}", e)))
}

/// Render headers for a debug log, masking credentials.
pub fn redact_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name.as_str().to_string();
            let lower = name.to_lowercase();
            let value = if value.is_sensitive() || SENSITIVE_KEYS.iter().any(|k| lower.contains(k)) {
                REDACTED.to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name, value)
        })
        .collect()
}
