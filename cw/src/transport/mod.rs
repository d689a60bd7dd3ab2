//! Authenticated HTTP transport with bounded retry and linear backoff
//!
//! `Transport` is the leaf of the stack: every page fetch and RPC call goes
//! through `request`, which resolves relative paths against the site base URL
//! and retries 429/5xx responses and connection failures.

mod backend;
mod error;

pub use backend::{HttpBackend, HttpRequest, HttpResponse, Method, ReqwestBackend};
pub use error::{DecodeError, NetworkError, is_retryable_status};

#[cfg(test)]
pub use backend::mock;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpConfig;

/// Retry schedule: `max_attempts` tries, sleeping `backoff_base * attempt` between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_millis(800),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &HttpConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff_base: Duration::from_millis(config.backoff_ms),
        }
    }

    /// Delay before the next attempt, after `attempt` (1-indexed) failed
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

/// HTTP transport shared by the RPC gateway and page fetches
#[derive(Clone)]
pub struct Transport {
    backend: Arc<dyn HttpBackend>,
    base_url: String,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(backend: Arc<dyn HttpBackend>, base_url: impl Into<String>, policy: RetryPolicy) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(%base_url, ?policy, "Transport::new: called");
        Self {
            backend,
            base_url,
            policy,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Join a site-relative path onto the base URL; absolute URLs pass through
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// GET a page and return its body text
    pub async fn get_text(&self, path: &str) -> Result<String, NetworkError> {
        debug!(%path, "get_text: called");
        let response = self.request(Method::Get, path, &[], None, &[]).await?;
        Ok(response.body)
    }

    /// Issue a request with the retry policy applied
    ///
    /// 2xx returns immediately. 429 and 5xx responses, connection failures and
    /// timeouts sleep `backoff_base * attempt` and retry until `max_attempts`
    /// is reached. Any other status fails at once.
    pub async fn request(
        &self,
        method: Method,
        url: &str,
        params: &[(String, String)],
        body: Option<&Value>,
        headers: &[(String, String)],
    ) -> Result<HttpResponse, NetworkError> {
        let url = self.resolve_url(url);
        debug!(%method, %url, param_count = params.len(), has_body = body.is_some(), "request: called");

        let mut request_headers = headers.to_vec();
        let body = match body {
            Some(value) => {
                if !request_headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
                    request_headers.push(("Content-Type".to_string(), "application/json".to_string()));
                }
                Some(
                    serde_json::to_string(value)
                        .map_err(|e| NetworkError::InvalidRequest(format!("unserializable body: {}", e)))?,
                )
            }
            None => None,
        };

        let request = HttpRequest {
            method,
            url,
            query: params.to_vec(),
            body,
            headers: request_headers,
        };

        let mut last_error: Option<NetworkError> = None;
        for attempt in 1..=self.policy.max_attempts {
            let failure = match self.backend.send(&request).await {
                Ok(response) if response.is_success() => {
                    debug!(attempt, status = response.status, "request: success");
                    return Ok(response);
                }
                Ok(response) => {
                    let err = NetworkError::Status {
                        status: response.status,
                        url: request.url.clone(),
                        body: response.body,
                    };
                    if !err.is_retryable() {
                        debug!(attempt, status = ?err.status(), "request: non-retryable status");
                        return Err(err);
                    }
                    err
                }
                Err(err) if err.is_retryable() => err,
                Err(err) => {
                    debug!(attempt, error = %err, "request: non-retryable failure");
                    return Err(err);
                }
            };

            warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                url = %request.url,
                error = %failure,
                "request: transient failure"
            );
            last_error = Some(failure);

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff(attempt)).await;
            }
        }

        match last_error {
            Some(last) => Err(NetworkError::Exhausted {
                attempts: self.policy.max_attempts,
                last: Box::new(last),
            }),
            None => Err(NetworkError::NoAttempt),
        }
    }
}
