//! Error classification.
//!
//! Maps a transport outcome onto either a successful [`RawResponse`] or
//! exactly one [`ClassifiedError`]. Classification is a pure function of the
//! response: no state is kept between calls.

use crate::errors::{ClassifiedError, ConfigurationError, ErrorDetail, TransportError};
use crate::transport::RawResponse;
use chrono::{DateTime, Utc};
use http::header::{HeaderName, RETRY_AFTER};
use http::HeaderMap;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::warn;

/// Default name of the header carrying the server-requested wait
pub const DEFAULT_RETRY_AFTER_HEADER: &str = "Retry-After";

/// Classifies raw transport outcomes.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    retry_after_header: HeaderName,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self {
            retry_after_header: RETRY_AFTER,
        }
    }
}

impl ErrorClassifier {
    /// Create a classifier reading the standard `Retry-After` header
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier reading the retry-after hint from a custom header
    pub fn with_retry_after_header(name: &str) -> Result<Self, ConfigurationError> {
        let retry_after_header = name.parse::<HeaderName>().map_err(|_| {
            ConfigurationError::invalid(format!("Invalid retry-after header name: {:?}", name))
        })?;
        Ok(Self { retry_after_header })
    }

    /// The header consulted on 429 responses
    pub fn retry_after_header(&self) -> &HeaderName {
        &self.retry_after_header
    }

    /// Classify the outcome of one transport call
    pub fn classify(
        &self,
        outcome: Result<RawResponse, TransportError>,
    ) -> Result<RawResponse, ClassifiedError> {
        match outcome {
            Ok(response) => match self.classify_response(&response) {
                Some(error) => Err(error),
                None => Ok(response),
            },
            Err(error) => Err(self.classify_transport_error(&error)),
        }
    }

    /// Map a failure that happened before any status line was read
    pub fn classify_transport_error(&self, error: &TransportError) -> ClassifiedError {
        match error {
            TransportError::Timeout { message } => ClassifiedError::Timeout {
                message: message.clone(),
            },
            TransportError::InvalidRequest { message } => ClassifiedError::Validation {
                status: None,
                detail: ErrorDetail::Text(message.clone()),
            },
            TransportError::Connect { message } | TransportError::Io { message } => {
                ClassifiedError::NetworkError {
                    message: message.clone(),
                }
            }
        }
    }

    /// Map a received response; `None` means the status indicates success
    pub fn classify_response(&self, response: &RawResponse) -> Option<ClassifiedError> {
        let status = response.status;
        if status < 400 {
            return None;
        }

        let detail = ErrorDetail::from_body(&response.body);
        let error = match status {
            401 => ClassifiedError::Authentication {
                status: Some(status),
                detail,
            },
            404 => ClassifiedError::NotFound { status, detail },
            400 | 422 => ClassifiedError::Validation {
                status: Some(status),
                detail,
            },
            429 => ClassifiedError::RateLimited {
                status,
                retry_after: self.retry_after(&response.headers),
                detail,
            },
            500..=u16::MAX => ClassifiedError::ServerError { status, detail },
            _ => ClassifiedError::Unknown { status, detail },
        };

        Some(error)
    }

    /// Read the retry-after hint from `headers`, if present and parseable
    pub fn retry_after(&self, headers: &HeaderMap) -> Option<Duration> {
        headers
            .get(&self.retry_after_header)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()))
    }

    /// Decode a successful response body.
    ///
    /// An empty body, or one that does not match `T`, yields `T::default()`
    /// instead of an error: the status already told us the call succeeded.
    pub fn decode_payload<T>(&self, response: &RawResponse) -> T
    where
        T: DeserializeOwned + Default,
    {
        if response.body.iter().all(|b| b.is_ascii_whitespace()) {
            return T::default();
        }

        match serde_json::from_slice(&response.body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(
                    status = response.status,
                    error = %e,
                    "Successful response body did not match the expected payload, using default"
                );
                T::default()
            }
        }
    }
}

/// Parse a retry-after value: delta-seconds (integer or fractional) or an
/// HTTP-date. Dates in the past clamp to zero.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }

    if let Ok(secs) = value.parse::<f64>() {
        return seconds_to_duration(secs);
    }

    DateTime::parse_from_rfc2822(value).ok().map(|date| {
        date.with_timezone(&Utc)
            .signed_duration_since(now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    })
}

/// Negative values clamp to zero; values too large for a `Duration` are
/// discarded so the computed backoff applies instead.
fn seconds_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_nan() {
        return None;
    }
    if secs <= 0.0 {
        return Some(Duration::ZERO);
    }
    Duration::try_from_secs_f64(secs).ok()
}
