//! Transport error types

use thiserror::Error;

/// Errors raised by the HTTP transport
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}: {body}")]
    Status { status: u16, url: String, body: String },

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: Box<NetworkError> },

    #[error("Request failed without a recorded cause")]
    NoAttempt,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl NetworkError {
    /// Check if this error is retryable under the backoff schedule
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::Connection(_) => true,
            NetworkError::Timeout(_) => true,
            NetworkError::Status { status, .. } => is_retryable_status(*status),
            NetworkError::Exhausted { .. } => false,
            NetworkError::NoAttempt => false,
            NetworkError::InvalidRequest(_) => false,
        }
    }

    /// HTTP status behind this error, looking through exhaustion
    pub fn status(&self) -> Option<u16> {
        match self {
            NetworkError::Status { status, .. } => Some(*status),
            NetworkError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for NetworkError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            NetworkError::Timeout(e.to_string())
        } else if e.is_builder() {
            NetworkError::InvalidRequest(e.to_string())
        } else {
            NetworkError::Connection(e.to_string())
        }
    }
}

/// Response body could not be decoded as JSON
#[derive(Debug, Error)]
#[error("Failed to decode response body ({len} bytes): {source}")]
pub struct DecodeError {
    pub len: usize,
    #[source]
    pub source: serde_json::Error,
}

/// Check if an HTTP status code is retryable
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
