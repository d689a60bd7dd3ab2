//! JSON-RPC envelope and response types for the service endpoint

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::RpcError;

/// One call in an envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCall {
    pub index: u32,
    #[serde(rename = "methodname")]
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Ordered list of calls, sent verbatim as the request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RpcEnvelope(pub Vec<RpcCall>);

impl RpcEnvelope {
    /// Single-call envelope at index 0
    pub fn single(method: impl Into<String>, args: Map<String, Value>) -> Self {
        Self(vec![RpcCall {
            index: 0,
            method: method.into(),
            args,
        }])
    }

    pub fn calls(&self) -> &[RpcCall] {
        &self.0
    }

    pub fn first(&self) -> Option<&RpcCall> {
        self.0.first()
    }

    /// Arguments of the first call, for in-place field updates
    pub fn first_args_mut(&mut self) -> Option<&mut Map<String, Value>> {
        self.0.first_mut().map(|c| &mut c.args)
    }

    /// Overwrite `field` in the first call's arguments, only if already declared
    ///
    /// Returns whether the field was present.
    pub fn set_declared(&mut self, field: &str, value: Value) -> bool {
        match self.first_args_mut().and_then(|args| args.get_mut(field)) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn method_names(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.method.as_str()).collect()
    }
}

/// Result of one RPC call after unwrapping the response envelope
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResult {
    /// The `data` of entry 0, or the whole response when it was not a list
    Data(Value),
    /// Entry 0 carried an error indicator; the whole entry is kept
    Error(Value),
}

impl RpcResult {
    pub fn is_error(&self) -> bool {
        matches!(self, RpcResult::Error(_))
    }

    pub fn value(&self) -> &Value {
        match self {
            RpcResult::Data(v) | RpcResult::Error(v) => v,
        }
    }

    /// Data value, treating an error entry as a failure
    pub fn into_data(self) -> Result<Value, RpcError> {
        match self {
            RpcResult::Data(v) => Ok(v),
            RpcResult::Error(entry) => Err(RpcError::Server {
                message: server_error_message(&entry),
                payload: entry,
            }),
        }
    }
}

/// Unwrap a parsed service response
///
/// A non-empty list yields entry 0: its error indicator if set, else its
/// `data`. Anything else is returned unchanged.
pub fn unwrap_response(response: Value) -> RpcResult {
    match response {
        Value::Array(mut entries) if !entries.is_empty() => {
            let entry = entries.swap_remove(0);
            if entry.get("error").is_some_and(is_truthy) {
                RpcResult::Error(entry)
            } else {
                match entry {
                    Value::Object(mut map) => RpcResult::Data(map.remove("data").unwrap_or(Value::Null)),
                    other => RpcResult::Data(other),
                }
            }
        }
        other => RpcResult::Data(other),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Best human-readable message in an error entry
pub fn server_error_message(entry: &Value) -> String {
    entry
        .pointer("/exception/message")
        .or_else(|| entry.get("message"))
        .or_else(|| entry.get("error").filter(|e| e.is_string()))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| entry.to_string())
}
