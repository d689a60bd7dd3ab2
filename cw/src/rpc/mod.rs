//! RPC gateway for the site's AJAX service endpoint
//!
//! Requests are `POST {service_path}?sesskey=..&timestamp=..` with a JSON
//! array of `{index, methodname, args}` as the body. Responses are a JSON
//! array of `{data}` or `{error}` entries, one per call.

mod envelope;
mod error;

pub use envelope::{RpcCall, RpcEnvelope, RpcResult, server_error_message, unwrap_response};
pub use error::RpcError;

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::SiteConfig;
use crate::extract::{ContextExtractor, SessionContext, value_as_u64};
use crate::transport::{HttpResponse, Method, Transport};

/// Module-info method used to map a course module to its resource instance
pub const COURSE_MODULE_METHOD: &str = "core_course_get_course_module";

/// Enrolled-courses method backing the course overview block
pub const ENROLLED_COURSES_METHOD: &str = "core_course_get_enrolled_courses_by_timeline_classification";

/// Current time as milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Raw and parsed body of one service call, for diagnostics
#[derive(Debug, Clone)]
pub struct RpcCapture {
    pub status: u16,
    pub raw: String,
    /// `None` when the body was not JSON
    pub parsed: Option<Value>,
}

impl RpcCapture {
    /// Unwrapped view of the parsed body
    pub fn result(&self) -> Option<RpcResult> {
        self.parsed.clone().map(unwrap_response)
    }
}

/// JSON-RPC convention on top of the transport
#[derive(Clone)]
pub struct RpcGateway {
    transport: Transport,
    extractor: Arc<ContextExtractor>,
    entry_path: String,
    service_path: String,
}

impl RpcGateway {
    pub fn new(transport: Transport, site: &SiteConfig) -> Self {
        debug!(entry_path = %site.entry_path, service_path = %site.service_path, "RpcGateway::new: called");
        Self {
            transport,
            extractor: Arc::new(ContextExtractor::new()),
            entry_path: site.entry_path.clone(),
            service_path: site.service_path.clone(),
        }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn extractor(&self) -> &ContextExtractor {
        &self.extractor
    }

    pub fn entry_path(&self) -> &str {
        &self.entry_path
    }

    /// Session key from the context, or one lazy lookup on the entry page
    pub async fn resolve_security_token(&self, ctx: &SessionContext) -> Option<String> {
        if let Some(token) = ctx.security_token.as_ref().filter(|t| !t.is_empty()) {
            return Some(token.clone());
        }

        debug!(entry_path = %self.entry_path, "resolve_security_token: no token in context, fetching entry page");
        match self.transport.get_text(&self.entry_path).await {
            Ok(html) => {
                let token = self.extractor.extract_security_token(&html);
                debug!(found = token.is_some(), "resolve_security_token: entry page scanned");
                token
            }
            Err(e) => {
                warn!(error = %e, "resolve_security_token: entry page fetch failed");
                None
            }
        }
    }

    /// Call one method with `args` and unwrap entry 0
    ///
    /// `timestamp` defaults to the current epoch milliseconds.
    pub async fn call(
        &self,
        method: &str,
        args: Map<String, Value>,
        ctx: &SessionContext,
        timestamp: Option<i64>,
    ) -> Result<RpcResult, RpcError> {
        debug!(%method, arg_count = args.len(), ?timestamp, "call: called");
        let envelope = RpcEnvelope::single(method, args);
        let response = self.post(&envelope, ctx, timestamp, Some(method)).await?;
        let parsed: Value = response.json()?;
        Ok(unwrap_response(parsed))
    }

    /// Submit a prepared envelope and unwrap entry 0
    ///
    /// `timestamp` defaults to the current epoch milliseconds.
    pub async fn submit(
        &self,
        envelope: &RpcEnvelope,
        ctx: &SessionContext,
        timestamp: Option<i64>,
    ) -> Result<RpcResult, RpcError> {
        debug!(methods = ?envelope.method_names(), ?timestamp, "submit: called");
        let response = self.post(envelope, ctx, timestamp, None).await?;
        let parsed: Value = response.json()?;
        Ok(unwrap_response(parsed))
    }

    /// Submit a prepared envelope and keep the literal response body
    pub async fn submit_capture(
        &self,
        envelope: &RpcEnvelope,
        ctx: &SessionContext,
        timestamp: Option<i64>,
    ) -> Result<RpcCapture, RpcError> {
        debug!(methods = ?envelope.method_names(), ?timestamp, "submit_capture: called");
        let response = self.post(envelope, ctx, timestamp, None).await?;
        let parsed = response.json::<Value>().ok();
        Ok(RpcCapture {
            status: response.status,
            raw: response.body,
            parsed,
        })
    }

    /// Course-module record for `cmid`; failures degrade to an empty map
    pub async fn course_module_info(&self, cmid: u64, ctx: &SessionContext) -> Map<String, Value> {
        debug!(%cmid, "course_module_info: called");
        let mut args = Map::new();
        args.insert("cmid".to_string(), Value::from(cmid));

        match self.call(COURSE_MODULE_METHOD, args, ctx, None).await.and_then(RpcResult::into_data) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                debug!(?other, "course_module_info: unexpected data shape");
                Map::new()
            }
            Err(e) => {
                warn!(%cmid, error = %e, "course_module_info: lookup failed");
                Map::new()
            }
        }
    }

    /// Courses listed in the overview block for `classification` (all, inprogress, future, past)
    pub async fn enrolled_courses(&self, classification: &str, ctx: &SessionContext) -> Result<Vec<Value>, RpcError> {
        debug!(%classification, "enrolled_courses: called");
        let args = serde_json::json!({
            "offset": 0,
            "limit": 0,
            "classification": classification,
            "sort": "fullname",
            "customfieldname": "",
            "customfieldvalue": "",
        });
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        let data = self.call(ENROLLED_COURSES_METHOD, args, ctx, None).await?.into_data()?;
        Ok(data
            .get("courses")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn post(
        &self,
        envelope: &RpcEnvelope,
        ctx: &SessionContext,
        timestamp: Option<i64>,
        info: Option<&str>,
    ) -> Result<HttpResponse, RpcError> {
        let token = self.resolve_security_token(ctx).await.unwrap_or_default();
        if token.is_empty() {
            warn!("post: no session key available, sending empty sesskey");
        }

        let timestamp = timestamp.unwrap_or_else(now_millis);
        let mut params = vec![
            ("sesskey".to_string(), token),
            ("timestamp".to_string(), timestamp.to_string()),
        ];
        if let Some(method) = info {
            params.push(("info".to_string(), method.to_string()));
        }

        let body = serde_json::to_value(envelope)?;
        let headers = [("Accept".to_string(), "application/json".to_string())];
        let response = self
            .transport
            .request(Method::Post, &self.service_path, &params, Some(&body), &headers)
            .await?;
        debug!(status = response.status, body_len = response.body.len(), "post: response received");
        Ok(response)
    }
}

/// Resource instance id from a course-module record
pub fn resource_id_from_module_info(info: &Map<String, Value>) -> Option<u64> {
    info.get("instance")
        .and_then(value_as_u64)
        .or_else(|| info.get("cm").and_then(|cm| cm.get("instance")).and_then(value_as_u64))
}
