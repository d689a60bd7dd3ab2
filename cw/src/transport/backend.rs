//! HttpBackend trait and the reqwest implementation

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{DecodeError, NetworkError};
use crate::config::HttpConfig;

/// HTTP method used by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// A fully resolved request handed to the backend
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Absolute URL without query string
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Serialized JSON body
    pub body: Option<String>,
    /// Per-request header overrides
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// Look up a query parameter by name
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

/// Response as seen by callers of the transport
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Raw body text
    pub fn text(&self) -> &str {
        &self.body
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_str(&self.body).map_err(|source| DecodeError {
            len: self.body.len(),
            source,
        })
    }
}

/// Single-attempt HTTP round trip
///
/// Implementors perform exactly one network exchange per call and report
/// connection-level failures as `NetworkError`. Any status code, including
/// errors, is returned as a response; retry decisions belong to `Transport`.
#[async_trait]
pub trait HttpBackend: Send + Sync {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError>;
}

/// reqwest-backed implementation carrying the session cookie
pub struct ReqwestBackend {
    http: reqwest::Client,
}

impl ReqwestBackend {
    /// Build a client with browser-like default headers and the raw Cookie header
    pub fn new(config: &HttpConfig, cookie_header: Option<&str>) -> Result<Self, NetworkError> {
        debug!(timeout_ms = config.timeout_ms, has_cookie = cookie_header.is_some(), "ReqwestBackend::new: called");
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, header_value(&config.accept)?);
        headers.insert(reqwest::header::ACCEPT_LANGUAGE, header_value(&config.accept_language)?);
        if let Some(cookie) = cookie_header {
            headers.insert(reqwest::header::COOKIE, header_value(cookie)?);
        }

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self { http })
    }
}

fn header_value(value: &str) -> Result<HeaderValue, NetworkError> {
    HeaderValue::from_str(value).map_err(|e| NetworkError::InvalidRequest(format!("bad header value: {}", e)))
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn send(&self, request: &HttpRequest) -> Result<HttpResponse, NetworkError> {
        debug!(method = %request.method, url = %request.url, "ReqwestBackend::send: called");
        let mut builder = match request.method {
            Method::Get => self.http.get(&request.url),
            Method::Post => self.http.post(&request.url),
        };

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| NetworkError::InvalidRequest(format!("bad header name '{}': {}", name, e)))?;
            builder = builder.header(name, header_value(value)?);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, body_len = body.len(), "ReqwestBackend::send: response received");
        Ok(HttpResponse { status, body })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(302, "").is_success());
        assert!(!HttpResponse::new(503, "").is_success());
    }

    #[test]
    fn test_response_json_decode_error() {
        let resp = HttpResponse::new(200, "<html>login</html>");
        let err = resp.json::<serde_json::Value>().unwrap_err();
        assert_eq!(err.len, 18);

        let resp = HttpResponse::new(200, r#"[{"data": 1}]"#);
        let value: serde_json::Value = resp.json().unwrap();
        assert_eq!(value[0]["data"], 1);
    }

    #[test]
    fn test_query_param_lookup() {
        let req = HttpRequest {
            method: Method::Post,
            url: "https://example.com/lib/ajax/service.php".to_string(),
            query: vec![("sesskey".to_string(), "abc".to_string())],
            body: None,
            headers: vec![],
        };
        assert_eq!(req.query_param("sesskey"), Some("abc"));
        assert_eq!(req.query_param("timestamp"), None);
    }

    #[test]
    fn test_reqwest_backend_rejects_bad_cookie() {
        let config = HttpConfig::default();
        let result = ReqwestBackend::new(&config, Some("MoodleSession=abc\n"));
        assert!(matches!(result, Err(NetworkError::InvalidRequest(_))));
    }
}
