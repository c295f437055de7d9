//! Error types for the request core.
//!
//! Failures of a single call are mapped onto [`ClassifiedError`]; the
//! executor wraps the final one in a [`RequestError`] that also reports how
//! many attempts were made.

mod classified;

pub use classified::{ClassifiedError, ErrorDetail, ErrorKind};

use std::fmt;
use thiserror::Error;

/// Result type for executor calls
pub type RequestResult<T> = Result<T, RequestError>;

/// Terminal outcome of a failed `execute` call.
#[derive(Error, Debug, Clone, PartialEq)]
pub struct RequestError {
    error: ClassifiedError,
    attempts: u32,
}

impl RequestError {
    /// Wrap a classified error together with the number of attempts made
    pub fn new(error: ClassifiedError, attempts: u32) -> Self {
        Self { error, attempts }
    }

    /// The classified cause
    pub fn error(&self) -> &ClassifiedError {
        &self.error
    }

    /// Consume and return the classified cause
    pub fn into_error(self) -> ClassifiedError {
        self.error
    }

    /// Number of dispatch attempts made, including the first
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Number of retries made after the first attempt
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Shortcut for `error().kind()`
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Shortcut for `error().status_code()`
    pub fn status_code(&self) -> Option<u16> {
        self.error.status_code()
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let noun = if self.attempts == 1 { "attempt" } else { "attempts" };
        write!(f, "{} (after {} {})", self.error, self.attempts, noun)
    }
}

impl From<RequestError> for ClassifiedError {
    fn from(err: RequestError) -> Self {
        err.error
    }
}

/// Failure of the transport before any status line was read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The call did not complete in time
    #[error("Request timed out: {message}")]
    Timeout {
        /// Error message
        message: String,
    },

    /// The connection could not be established
    #[error("Connection failed: {message}")]
    Connect {
        /// Error message
        message: String,
    },

    /// The request could not be built (bad URL, bad header...)
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
    },

    /// Any other I/O failure while sending or reading the response
    #[error("I/O error: {message}")]
    Io {
        /// Error message
        message: String,
    },
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_connect() {
            TransportError::Connect {
                message: err.to_string(),
            }
        } else if err.is_builder() {
            TransportError::InvalidRequest {
                message: err.to_string(),
            }
        } else {
            TransportError::Io {
                message: err.to_string(),
            }
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidRequest {
            message: format!("Invalid URL: {}", err),
        }
    }
}

/// Configuration errors, raised when building configs or executors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A required value was not provided
    #[error("Missing configuration value: {0}")]
    Missing(&'static str),

    /// A value was provided but is out of range or malformed
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// An environment variable could not be parsed
    #[error("Environment variable {name} has invalid value {value:?}")]
    EnvVar {
        /// Variable name
        name: String,
        /// Raw value
        value: String,
    },
}

impl ConfigurationError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigurationError::InvalidConfiguration {
            message: message.into(),
        }
    }
}

impl From<url::ParseError> for ConfigurationError {
    fn from(err: url::ParseError) -> Self {
        ConfigurationError::invalid(format!("Invalid URL: {}", err))
    }
}
