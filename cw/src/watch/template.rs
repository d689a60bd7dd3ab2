//! Progress request templates
//!
//! A template is the operator-supplied JSON body of a progress-update call,
//! with placeholders filled in per submission.

use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::rpc::RpcEnvelope;

/// Placeholders recognised in template text
pub const PLACEHOLDERS: [&str; 7] = [
    "{timestamp}",
    "{sesskey}",
    "{courseId}",
    "{contextInstanceId}",
    "{videoId}",
    "{fsresourceid}",
    "{time}",
];

/// Template failures; fatal to the run they occur in
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Failed to read template file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template is not a valid request envelope: {source} (rendered: {snippet})")]
    Parse {
        snippet: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Template contains no calls")]
    Empty,
}

/// Values substituted into a template for one submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateValues {
    pub timestamp: i64,
    pub security_token: String,
    pub course_id: Option<u64>,
    pub context_instance_id: Option<u64>,
    pub video_id: u64,
    pub resource_id: u64,
    /// Seconds of playback to report
    pub time: u64,
}

fn optional(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "null".to_string())
}

/// Raw template text; never mutated once loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressTemplate {
    text: String,
}

impl ProgressTemplate {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Load template text from a file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TemplateError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "ProgressTemplate::from_file: called");
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(text))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Pre-fill one placeholder, leaving the rest for render time
    pub fn with_fixed(&self, placeholder: &str, value: &str) -> Self {
        Self::new(self.text.replace(placeholder, value))
    }

    /// Substitute every placeholder; absent ids become `null`
    pub fn substitute(&self, values: &TemplateValues) -> String {
        self.text
            .replace("{timestamp}", &values.timestamp.to_string())
            .replace("{sesskey}", &values.security_token)
            .replace("{courseId}", &optional(values.course_id))
            .replace("{contextInstanceId}", &optional(values.context_instance_id))
            .replace("{videoId}", &values.video_id.to_string())
            .replace("{fsresourceid}", &values.resource_id.to_string())
            .replace("{time}", &values.time.to_string())
    }

    /// Substitute and parse into an envelope
    pub fn render(&self, values: &TemplateValues) -> Result<RpcEnvelope, TemplateError> {
        let rendered = self.substitute(values);
        let envelope: RpcEnvelope = serde_json::from_str(&rendered).map_err(|source| TemplateError::Parse {
            snippet: rendered.chars().take(160).collect(),
            source,
        })?;
        if envelope.calls().is_empty() {
            return Err(TemplateError::Empty);
        }
        Ok(envelope)
    }
}
