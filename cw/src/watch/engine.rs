//! Per-video progress engine

use std::fmt;
use std::time::Duration;

use serde_json::{Value, json};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::progress::{
    elapsed_seconds, finish_flag, format_fraction, is_completion_signal, next_sleep, progress_fraction,
    uniqueness_token,
};
use super::stop::StopSignal;
use super::template::{ProgressTemplate, TemplateError, TemplateValues};
use crate::config::WatchDefaults;
use crate::extract::SessionContext;
use crate::rpc::{RpcCapture, RpcError, RpcGateway, RpcResult, now_millis, resource_id_from_module_info};
use crate::transport::NetworkError;

/// Playback seconds reported by a probe submission
pub const PROBE_TIME_SECS: u64 = 3;

/// Raw response characters shown for a probe
pub const PROBE_PREVIEW_CHARS: usize = 500;

/// Path of a video's resource page
pub fn resource_page_path(video_id: u64) -> String {
    format!("/mod/fsresource/view.php?id={}", video_id)
}

/// Settings for one watch run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    /// Wall-clock budget for the polling loop
    pub duration: Duration,
    /// Pause between submissions
    pub interval: Duration,
    /// Overrides the duration found on the page
    pub target_seconds: Option<u64>,
    /// Overrides any resource id found or looked up
    pub resource_id_override: Option<u64>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::from_defaults(&WatchDefaults::default())
    }
}

impl WatchConfig {
    pub fn from_defaults(defaults: &WatchDefaults) -> Self {
        Self {
            duration: Duration::from_secs(defaults.duration_secs),
            interval: Duration::from_secs(defaults.interval_secs),
            target_seconds: None,
            resource_id_override: None,
        }
    }
}

/// Why a run stopped before its loop could finish
#[derive(Debug, Error)]
pub enum AbortReason {
    #[error("Failed to fetch resource page: {0}")]
    PageFetch(#[from] NetworkError),

    #[error("No session key could be resolved")]
    ContextUnresolved,

    #[error("Bad progress template: {0}")]
    Template(#[from] TemplateError),
}

/// Terminal state of one run
#[derive(Debug)]
pub enum WatchOutcome {
    Completed,
    TimedOut,
    Aborted(AbortReason),
    Cancelled,
}

impl WatchOutcome {
    /// Completed and timed-out runs are both normal outcomes
    pub fn is_success(&self) -> bool {
        matches!(self, WatchOutcome::Completed | WatchOutcome::TimedOut)
    }
}

impl fmt::Display for WatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchOutcome::Completed => write!(f, "completed"),
            WatchOutcome::TimedOut => write!(f, "timed out"),
            WatchOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
            WatchOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Where the submitted resource id came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceIdSource {
    Override,
    Page,
    ModuleInfo,
    /// The video id itself; a best-effort guess the server may or may not accept
    VideoIdFallback,
}

/// Everything a run needs once resolution succeeded
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub video_id: u64,
    pub resource_id: u64,
    pub resource_id_source: ResourceIdSource,
    /// Page context with the session key filled in
    pub context: SessionContext,
    pub target_seconds: Option<u64>,
}

/// Loop bookkeeping for one run
#[derive(Debug, Clone)]
struct PollState {
    start: Instant,
    deadline: Instant,
    call_count: u32,
    last_progress_fraction: Option<f64>,
}

/// Summary of one run
#[derive(Debug)]
pub struct WatchReport {
    pub video_id: u64,
    pub title: Option<String>,
    pub resource_id: Option<u64>,
    pub outcome: WatchOutcome,
    pub calls: u32,
    pub failed_calls: u32,
    pub last_fraction: Option<f64>,
    pub last_error: Option<String>,
}

impl WatchReport {
    fn new(video_id: u64) -> Self {
        Self {
            video_id,
            title: None,
            resource_id: None,
            outcome: WatchOutcome::TimedOut,
            calls: 0,
            failed_calls: 0,
            last_fraction: None,
            last_error: None,
        }
    }
}

/// Diagnostic result of a single probe submission
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub video_id: u64,
    pub resource_id: u64,
    pub capture: RpcCapture,
}

/// Fields worth showing from a probe response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeSummary {
    pub status: Option<Value>,
    pub progress: Option<Value>,
    pub totaltime: Option<Value>,
    pub completion: Option<Value>,
}

impl ProbeReport {
    /// Raw body cut to `limit` characters
    pub fn raw_preview(&self, limit: usize) -> &str {
        match self.capture.raw.char_indices().nth(limit) {
            Some((idx, _)) => &self.capture.raw[..idx],
            None => &self.capture.raw,
        }
    }

    /// Status fields of the unwrapped data, when the body parsed
    pub fn summary(&self) -> Option<ProbeSummary> {
        match self.capture.result()? {
            RpcResult::Data(data) => Some(ProbeSummary {
                status: data.get("status").cloned(),
                progress: data.get("progress").cloned(),
                totaltime: data.get("totaltime").cloned(),
                completion: data.get("completion").cloned(),
            }),
            RpcResult::Error(_) => None,
        }
    }
}

/// Probe failures
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("No progress template given")]
    MissingTemplate,

    #[error(transparent)]
    Aborted(#[from] AbortReason),

    #[error("Probe call failed: {0}")]
    Rpc(#[from] RpcError),
}

/// Drives progress submissions for one video at a time
#[derive(Clone)]
pub struct WatchEngine {
    gateway: RpcGateway,
    config: WatchConfig,
    stop: StopSignal,
}

impl WatchEngine {
    pub fn new(gateway: RpcGateway, config: WatchConfig) -> Self {
        debug!(?config, "WatchEngine::new: called");
        Self {
            gateway,
            config,
            stop: StopSignal::new(),
        }
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn gateway(&self) -> &RpcGateway {
        &self.gateway
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Fetch the resource page once and settle session key, resource id and target
    pub async fn resolve(&self, video_id: u64) -> Result<ResolvedTarget, AbortReason> {
        debug!(%video_id, "resolve: called");
        let html = self.gateway.transport().get_text(&resource_page_path(video_id)).await?;
        let mut context = self.gateway.extractor().extract_context(&html);
        info!(
            %video_id,
            has_key = context.security_token.is_some(),
            course_id = ?context.container_id,
            context_instance_id = ?context.context_instance_id,
            session_timeout = ?context.session_timeout_seconds,
            resource_id = ?context.resource_id,
            duration = ?context.target_duration_seconds,
            "resolve: page context extracted"
        );

        let token = self
            .gateway
            .resolve_security_token(&context)
            .await
            .ok_or(AbortReason::ContextUnresolved)?;
        context.security_token = Some(token);

        let (resource_id, resource_id_source) = self.resolve_resource_id(video_id, &context).await;
        let target_seconds = self.config.target_seconds.or(context.target_duration_seconds);
        debug!(%resource_id, ?resource_id_source, ?target_seconds, "resolve: target settled");

        Ok(ResolvedTarget {
            video_id,
            resource_id,
            resource_id_source,
            context,
            target_seconds,
        })
    }

    async fn resolve_resource_id(&self, video_id: u64, context: &SessionContext) -> (u64, ResourceIdSource) {
        if let Some(id) = self.config.resource_id_override {
            return (id, ResourceIdSource::Override);
        }
        if let Some(id) = context.resource_id {
            return (id, ResourceIdSource::Page);
        }
        if let Some(cmid) = context.context_instance_id {
            let info = self.gateway.course_module_info(cmid, context).await;
            if let Some(id) = resource_id_from_module_info(&info) {
                return (id, ResourceIdSource::ModuleInfo);
            }
        }
        warn!(%video_id, "resolve_resource_id: no resource id found, using the video id");
        (video_id, ResourceIdSource::VideoIdFallback)
    }

    /// Resolve then loop until completion, deadline, abort or stop
    pub async fn run(&self, video_id: u64, template: Option<&ProgressTemplate>) -> WatchReport {
        debug!(%video_id, has_template = template.is_some(), "run: called");
        let mut report = WatchReport::new(video_id);

        if self.stop.is_stopped() {
            report.outcome = WatchOutcome::Cancelled;
            return report;
        }

        let target = match self.resolve(video_id).await {
            Ok(target) => target,
            Err(reason) => {
                warn!(%video_id, error = %reason, "run: resolution failed");
                report.outcome = WatchOutcome::Aborted(reason);
                return report;
            }
        };
        report.title = target.context.title.clone();
        report.resource_id = Some(target.resource_id);

        report.outcome = self.poll(&target, template, &mut report).await;
        info!(%video_id, outcome = %report.outcome, calls = report.calls, failed = report.failed_calls, "run: finished");
        report
    }

    async fn poll(
        &self,
        target: &ResolvedTarget,
        template: Option<&ProgressTemplate>,
        report: &mut WatchReport,
    ) -> WatchOutcome {
        let start = Instant::now();
        let mut state = PollState {
            start,
            deadline: start + self.config.duration,
            call_count: 0,
            last_progress_fraction: None,
        };
        let video_id = target.video_id;

        while Instant::now() < state.deadline {
            if self.stop.is_stopped() {
                return WatchOutcome::Cancelled;
            }
            state.call_count += 1;
            report.calls = state.call_count;
            let elapsed = elapsed_seconds(state.start.elapsed(), self.config.duration);

            let Some(template) = template else {
                info!(%video_id, call = state.call_count, elapsed, "poll: no template, skipping submission");
                if !self.stop.sleep(self.config.interval).await {
                    return WatchOutcome::Cancelled;
                }
                continue;
            };

            let timestamp = now_millis();
            let values = self.template_values(target, timestamp, elapsed);
            let mut envelope = match template.render(&values) {
                Ok(envelope) => envelope,
                Err(e) => return WatchOutcome::Aborted(AbortReason::Template(e)),
            };

            if let Some(fraction) = progress_fraction(elapsed, target.target_seconds) {
                state.last_progress_fraction = Some(fraction);
                report.last_fraction = Some(fraction);
                envelope.set_declared("progress", json!(format_fraction(fraction)));
                envelope.set_declared("finish", json!(finish_flag(fraction)));
            }
            envelope.set_declared("unique", json!(uniqueness_token(timestamp)));

            match self
                .gateway
                .submit(&envelope, &target.context, Some(timestamp))
                .await
                .and_then(RpcResult::into_data)
            {
                Ok(data) => {
                    info!(
                        %video_id,
                        call = state.call_count,
                        elapsed,
                        fraction = ?state.last_progress_fraction,
                        response = %snippet(&data),
                        "poll: progress submitted"
                    );
                    if is_completion_signal(&data) {
                        return WatchOutcome::Completed;
                    }
                }
                Err(e) => {
                    report.failed_calls += 1;
                    let detail = e.detail();
                    warn!(%video_id, call = state.call_count, error = %e, %detail, "poll: submission failed");
                    report.last_error = Some(detail);
                }
            }

            let pause = next_sleep(self.config.interval, target.context.session_timeout_seconds);
            if !self.stop.sleep(pause).await {
                return WatchOutcome::Cancelled;
            }
        }

        WatchOutcome::TimedOut
    }

    /// Resolve and send one capture-mode submission reporting a few seconds played
    pub async fn probe(&self, video_id: u64, template: Option<&ProgressTemplate>) -> Result<ProbeReport, ProbeError> {
        debug!(%video_id, "probe: called");
        let template = template.ok_or(ProbeError::MissingTemplate)?;
        let target = self.resolve(video_id).await?;

        let timestamp = now_millis();
        let values = self.template_values(&target, timestamp, PROBE_TIME_SECS);
        let mut envelope = template.render(&values).map_err(AbortReason::from)?;
        envelope.set_declared("unique", json!(uniqueness_token(timestamp)));

        let capture = self
            .gateway
            .submit_capture(&envelope, &target.context, Some(timestamp))
            .await?;
        debug!(status = capture.status, raw_len = capture.raw.len(), "probe: captured");
        Ok(ProbeReport {
            video_id,
            resource_id: target.resource_id,
            capture,
        })
    }

    fn template_values(&self, target: &ResolvedTarget, timestamp: i64, time: u64) -> TemplateValues {
        TemplateValues {
            timestamp,
            security_token: target.context.security_token.clone().unwrap_or_default(),
            course_id: target.context.container_id,
            context_instance_id: target.context.context_instance_id,
            video_id: target.video_id,
            resource_id: target.resource_id,
            time,
        }
    }
}

fn snippet(value: &Value) -> String {
    value.to_string().chars().take(160).collect()
}
