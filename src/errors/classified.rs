//! Classified error taxonomy produced by the error classifier.

use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Body of a failed response, kept for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorDetail {
    /// Body parsed as JSON
    Json(Value),
    /// Body that was not valid JSON, kept verbatim
    Text(String),
    /// No body
    Empty,
}

impl ErrorDetail {
    /// Build a detail from raw response bytes.
    ///
    /// A body that fails to parse as JSON falls back to its (lossy) text.
    pub fn from_body(body: &[u8]) -> Self {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return ErrorDetail::Empty;
        }

        match serde_json::from_slice::<Value>(body) {
            Ok(value) => ErrorDetail::Json(value),
            Err(_) => ErrorDetail::Text(String::from_utf8_lossy(body).into_owned()),
        }
    }

    /// Best-effort human readable message.
    ///
    /// Vendors disagree on where the message lives, so the common keys are
    /// tried in order before falling back to the compact JSON document.
    pub fn message(&self) -> String {
        match self {
            ErrorDetail::Json(value) => json_message(value).unwrap_or_else(|| value.to_string()),
            ErrorDetail::Text(text) => text.trim().to_string(),
            ErrorDetail::Empty => String::new(),
        }
    }

    /// The parsed JSON body, if any
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ErrorDetail::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns true if the response carried no body
    pub fn is_empty(&self) -> bool {
        matches!(self, ErrorDetail::Empty)
    }
}

fn json_message(value: &Value) -> Option<String> {
    const KEYS: [&str; 5] = ["message", "error_description", "detail", "error", "title"];

    let object = value.as_object()?;
    for key in KEYS {
        match object.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(nested @ Value::Object(_)) => {
                if let Some(message) = json_message(nested) {
                    return Some(message);
                }
            }
            _ => {}
        }
    }
    None
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorDetail::Empty => f.write_str("<empty body>"),
            other => f.write_str(&other.message()),
        }
    }
}

/// Discriminant of [`ClassifiedError`], handy for metrics and matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// 401, or a credential could not be acquired
    Authentication,
    /// 404
    NotFound,
    /// 400 / 422, or a request that could not be built
    Validation,
    /// 429
    RateLimited,
    /// 5xx
    ServerError,
    /// Connection-level failure before a status line was read
    NetworkError,
    /// The call timed out before a status line was read
    Timeout,
    /// Any other 4xx
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are transient
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::NetworkError
                | ErrorKind::Timeout
        )
    }

    /// Stable lowercase label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Validation => "validation",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure mapped onto the closed error taxonomy.
///
/// Constructed once by the classifier and never mutated afterwards. Every
/// variant keeps the original status code (when a response was received)
/// and the vendor's body so nothing diagnostic is lost.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifiedError {
    /// Credentials were rejected or could not be obtained
    #[error("Authentication error{}: {detail}", status_suffix(.status))]
    Authentication {
        /// HTTP status, absent when the credential could not be acquired
        status: Option<u16>,
        /// Vendor error body
        detail: ErrorDetail,
    },

    /// The addressed resource does not exist
    #[error("Not found ({status}): {detail}")]
    NotFound {
        /// HTTP status
        status: u16,
        /// Vendor error body
        detail: ErrorDetail,
    },

    /// The request payload or shape was rejected
    #[error("Validation error{}: {detail}", status_suffix(.status))]
    Validation {
        /// HTTP status, absent when the request could not be built
        status: Option<u16>,
        /// Vendor error body
        detail: ErrorDetail,
    },

    /// The vendor throttled the call
    #[error("Rate limited ({status}){}: {detail}", retry_after_suffix(.retry_after))]
    RateLimited {
        /// HTTP status
        status: u16,
        /// Server-provided wait, if the retry-after header was present
        retry_after: Option<Duration>,
        /// Vendor error body
        detail: ErrorDetail,
    },

    /// 5xx from the vendor
    #[error("Server error ({status}): {detail}")]
    ServerError {
        /// HTTP status
        status: u16,
        /// Vendor error body
        detail: ErrorDetail,
    },

    /// Connection refused, reset, DNS failure...
    #[error("Network error: {message}")]
    NetworkError {
        /// Transport error message
        message: String,
    },

    /// No response within the deadline
    #[error("Timeout: {message}")]
    Timeout {
        /// Transport error message
        message: String,
    },

    /// Any other error status
    #[error("Unexpected status ({status}): {detail}")]
    Unknown {
        /// HTTP status
        status: u16,
        /// Vendor error body
        detail: ErrorDetail,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

fn retry_after_suffix(retry_after: &Option<Duration>) -> String {
    retry_after
        .map(|d| format!(", retry after {:?}", d))
        .unwrap_or_default()
}

impl ClassifiedError {
    /// The discriminant of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClassifiedError::Authentication { .. } => ErrorKind::Authentication,
            ClassifiedError::NotFound { .. } => ErrorKind::NotFound,
            ClassifiedError::Validation { .. } => ErrorKind::Validation,
            ClassifiedError::RateLimited { .. } => ErrorKind::RateLimited,
            ClassifiedError::ServerError { .. } => ErrorKind::ServerError,
            ClassifiedError::NetworkError { .. } => ErrorKind::NetworkError,
            ClassifiedError::Timeout { .. } => ErrorKind::Timeout,
            ClassifiedError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Returns true if this error is worth retrying.
    ///
    /// Rate limits, 5xx, network failures and timeouts are transient;
    /// everything else is a caller or credential defect.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Server-provided wait, only ever present on `RateLimited`
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClassifiedError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// The original HTTP status code, if a response was received
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClassifiedError::Authentication { status, .. }
            | ClassifiedError::Validation { status, .. } => *status,
            ClassifiedError::NotFound { status, .. }
            | ClassifiedError::RateLimited { status, .. }
            | ClassifiedError::ServerError { status, .. }
            | ClassifiedError::Unknown { status, .. } => Some(*status),
            ClassifiedError::NetworkError { .. } | ClassifiedError::Timeout { .. } => None,
        }
    }

    /// The vendor body, if a response was received
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            ClassifiedError::Authentication { detail, .. }
            | ClassifiedError::NotFound { detail, .. }
            | ClassifiedError::Validation { detail, .. }
            | ClassifiedError::RateLimited { detail, .. }
            | ClassifiedError::ServerError { detail, .. }
            | ClassifiedError::Unknown { detail, .. } => Some(detail),
            ClassifiedError::NetworkError { .. } | ClassifiedError::Timeout { .. } => None,
        }
    }

    /// Vendor message, or the transport message for connection failures
    pub fn message(&self) -> String {
        match self {
            ClassifiedError::NetworkError { message } | ClassifiedError::Timeout { message } => {
                message.clone()
            }
            other => other.detail().map(ErrorDetail::message).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_detail_from_json_body() {
        let detail = ErrorDetail::from_body(br#"{"message": "Invalid email", "code": 42}"#);
        assert_eq!(
            detail,
            ErrorDetail::Json(json!({"message": "Invalid email", "code": 42}))
        );
        assert_eq!(detail.message(), "Invalid email");
    }

    #[test]
    fn test_detail_falls_back_to_text() {
        let detail = ErrorDetail::from_body(b"<html>Bad Gateway</html>");
        assert_eq!(detail, ErrorDetail::Text("<html>Bad Gateway</html>".to_string()));
        assert_eq!(detail.message(), "<html>Bad Gateway</html>");
    }

    #[test]
    fn test_detail_empty_body() {
        assert!(ErrorDetail::from_body(b"").is_empty());
        assert!(ErrorDetail::from_body(b"  \n").is_empty());
    }

    #[test]
    fn test_detail_nested_error_object() {
        let detail = ErrorDetail::from_body(br#"{"error": {"message": "quota exhausted"}}"#);
        assert_eq!(detail.message(), "quota exhausted");

        let opaque = ErrorDetail::from_body(br#"{"errors": [1, 2]}"#);
        assert_eq!(opaque.message(), r#"{"errors":[1,2]}"#);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::ServerError.is_retryable());
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());

        assert!(!ErrorKind::Authentication.is_retryable());
        assert!(!ErrorKind::NotFound.is_retryable());
        assert!(!ErrorKind::Validation.is_retryable());
        assert!(!ErrorKind::Unknown.is_retryable());
    }

    #[test]
    fn test_status_code_and_retry_after() {
        let limited = ClassifiedError::RateLimited {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
            detail: ErrorDetail::Empty,
        };
        assert_eq!(limited.status_code(), Some(429));
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));

        let timeout = ClassifiedError::Timeout {
            message: "deadline elapsed".to_string(),
        };
        assert_eq!(timeout.status_code(), None);
        assert_eq!(timeout.retry_after(), None);
        assert_eq!(timeout.message(), "deadline elapsed");
    }

    #[test]
    fn test_display_keeps_vendor_message() {
        let err = ClassifiedError::Validation {
            status: Some(422),
            detail: ErrorDetail::from_body(br#"{"detail": "email is required"}"#),
        };
        assert_eq!(err.to_string(), "Validation error (422): email is required");

        let limited = ClassifiedError::RateLimited {
            status: 429,
            retry_after: Some(Duration::from_secs(3)),
            detail: ErrorDetail::Empty,
        };
        assert_eq!(
            limited.to_string(),
            "Rate limited (429), retry after 3s: <empty body>"
        );
    }
}
