//! RPC error types

use serde_json::Value;
use thiserror::Error;

use crate::transport::{DecodeError, NetworkError};

/// Errors from the service endpoint
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Transport failed: {0}")]
    Network(#[from] NetworkError),

    #[error("Undecodable service response: {0}")]
    Decode(#[from] DecodeError),

    #[error("Server error: {message}")]
    Server { message: String, payload: Value },

    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RpcError {
    /// Raw text worth showing an operator
    pub fn detail(&self) -> String {
        match self {
            RpcError::Server { payload, .. } => payload.to_string(),
            RpcError::Network(NetworkError::Status { body, .. }) => body.clone(),
            other => other.to_string(),
        }
    }
}
