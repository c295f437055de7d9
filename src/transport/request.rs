//! Request and response values exchanged with the transport.

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Method};
use serde::Serialize;

/// Description of one logical API call.
///
/// Built once by the vendor client and never modified by the executor;
/// retries re-send the same descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// HTTP method
    pub method: Method,
    /// Path relative to the transport's base URL
    pub path: String,
    /// Query parameters, in order
    pub query: Vec<(String, String)>,
    /// Request headers
    pub headers: HeaderMap,
    /// Request body
    pub body: Option<Bytes>,
}

impl RequestDescriptor {
    /// Create a request with the given method and path
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Create a GET request
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Create a POST request
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Create a PUT request
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Create a PATCH request
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// Create a DELETE request
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Append a query parameter
    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Set a header
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set a raw body
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `payload` as the JSON body and set the content type
    pub fn json<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(payload)?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    /// `METHOD path` label used in logs and metrics
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// A response as read off the wire, before classification.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl RawResponse {
    /// Create a response with no headers
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Add a header, ignoring names or values that are not valid HTTP
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Whether the status is below 400
    pub fn is_success(&self) -> bool {
        self.status < 400
    }

    /// Body as lossy UTF-8
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_descriptor_builder() {
        let request = RequestDescriptor::get("/v3/contacts")
            .query("limit", 50)
            .query("after", "abc")
            .header(
                HeaderName::from_static("x-trace"),
                HeaderValue::from_static("1"),
            );

        assert_eq!(request.method, Method::GET);
        assert_eq!(request.path, "/v3/contacts");
        assert_eq!(
            request.query,
            vec![
                ("limit".to_string(), "50".to_string()),
                ("after".to_string(), "abc".to_string())
            ]
        );
        assert_eq!(request.headers.get("x-trace").unwrap(), "1");
        assert_eq!(request.endpoint(), "GET /v3/contacts");
    }

    #[test]
    fn test_json_body_sets_content_type() {
        let request = RequestDescriptor::post("/lists")
            .json(&json!({"name": "Newsletter"}))
            .unwrap();

        assert_eq!(
            request.headers.get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
        assert_eq!(
            request.body.as_deref(),
            Some(br#"{"name":"Newsletter"}"#.as_slice())
        );
    }

    #[test]
    fn test_raw_response_helpers() {
        let response = RawResponse::new(204, "").with_header("Retry-After", "3");
        assert!(response.is_success());
        assert_eq!(response.headers.get("retry-after").unwrap(), "3");

        let invalid = RawResponse::new(500, "boom").with_header("bad header", "x");
        assert!(invalid.headers.is_empty());
        assert!(!invalid.is_success());
        assert_eq!(invalid.text(), "boom");
    }
}
