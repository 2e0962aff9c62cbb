//! HTTP Client Abstraction
//!
//! Minimal request/response model shared by provider page fetches and the
//! image download cache. Retry decisions are made by the callers, so the
//! client only has to execute a single request and report what happened.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// HTTP method types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Head,
}

/// Outgoing HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Bytes>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Append a query parameter. Values are encoded by the client.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.header("Authorization", format!("Bearer {}", token.into()))
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn timeout(mut self, duration: Duration) -> Self {
        self.timeout = Some(duration);
        self
    }
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Parse response body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            BridgeError::OperationFailed(format!("JSON deserialization failed: {}", e))
        })
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// `Retry-After` expressed in whole seconds.
    ///
    /// HTTP-date values are not supported and yield `None`.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header("Retry-After")
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status)
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status)
    }
}

/// Async HTTP client provided by the host.
///
/// Implementations execute exactly one request per call. Non-2xx statuses
/// are returned as a normal [`HttpResponse`]; only transport failures map
/// to [`BridgeError`] (`Timeout`/`Connection` for the retryable ones).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::{HttpClient, HttpRequest};
///
/// async fn fetch_avatar(client: &dyn HttpClient, url: &str) -> Result<Bytes> {
///     let response = client.execute(HttpRequest::get(url)).await?;
///     Ok(response.body)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_request_builder() {
        let request = HttpRequest::get("https://api.vk.com/method/friends.get")
            .query("count", "100")
            .query("offset", "0")
            .bearer_token("secret")
            .timeout(Duration::from_secs(30));

        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.query.len(), 2);
        assert_eq!(request.query[0], ("count".to_string(), "100".to_string()));
        assert_eq!(
            request.headers.get("Authorization"),
            Some(&"Bearer secret".to_string())
        );
        assert_eq!(request.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_http_response_status_checks() {
        let ok = HttpResponse::new(200, "ok");
        assert!(ok.is_success());
        assert!(!ok.is_client_error());

        let missing = HttpResponse::new(404, "");
        assert!(missing.is_client_error());

        let unavailable = HttpResponse::new(503, "");
        assert!(unavailable.is_server_error());
    }

    #[test]
    fn test_retry_after_parsing() {
        let response = HttpResponse::new(429, "").with_header("retry-after", " 7 ");
        assert_eq!(response.retry_after(), Some(Duration::from_secs(7)));

        let dated = HttpResponse::new(429, "")
            .with_header("Retry-After", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(dated.retry_after(), None);

        assert_eq!(HttpResponse::new(429, "").retry_after(), None);
    }

    #[test]
    fn test_json_body() {
        #[derive(serde::Deserialize)]
        struct Body {
            count: u32,
        }

        let response = HttpResponse::new(200, r#"{"count": 3}"#);
        let body: Body = response.json().unwrap();
        assert_eq!(body.count, 3);

        let broken = HttpResponse::new(200, "{");
        assert!(broken.json::<Body>().is_err());
    }
}
