//! Sequential runs over a course's incomplete videos

use std::time::Duration;

use tracing::{debug, info};

use super::engine::{WatchEngine, WatchOutcome, WatchReport};
use super::template::ProgressTemplate;
use crate::config::WatchDefaults;
use crate::discovery::{Discovery, VideoItem};
use crate::transport::NetworkError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Process at most this many videos
    pub limit: Option<usize>,
    /// Pause between videos
    pub gap: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_defaults(&WatchDefaults::default())
    }
}

impl BatchConfig {
    pub fn from_defaults(defaults: &WatchDefaults) -> Self {
        Self {
            limit: None,
            gap: Duration::from_secs(defaults.gap_secs),
        }
    }
}

/// Per-video results of a batch, in processing order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub reports: Vec<WatchReport>,
    /// Videos selected but not started because of a stop request
    pub skipped: usize,
}

impl BatchReport {
    /// No incomplete videos were found
    pub fn nothing_to_do(&self) -> bool {
        self.reports.is_empty() && self.skipped == 0
    }

    pub fn completed(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.outcome, WatchOutcome::Completed))
            .count()
    }
}

/// Videos a batch would process: known-incomplete only, capped by `limit`
pub fn select_incomplete(items: &[VideoItem], limit: Option<usize>) -> Vec<&VideoItem> {
    items
        .iter()
        .filter(|item| item.incomplete == Some(true))
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Run the engine over each incomplete video in turn
///
/// Every video's outcome is recorded and the batch always moves on; only a
/// stop request ends it early.
pub async fn run_batch(
    engine: &WatchEngine,
    items: &[VideoItem],
    template: Option<&ProgressTemplate>,
    config: &BatchConfig,
) -> BatchReport {
    let selected = select_incomplete(items, config.limit);
    debug!(total = items.len(), selected = selected.len(), ?config, "run_batch: called");

    let mut report = BatchReport::default();
    if selected.is_empty() {
        info!("run_batch: nothing to do");
        return report;
    }

    let count = selected.len();
    for (idx, item) in selected.iter().enumerate() {
        if engine.stop_signal().is_stopped() {
            report.skipped = count - idx;
            break;
        }

        info!(video_id = item.id, name = %item.name, position = idx + 1, count, "run_batch: starting video");
        let watch = engine.run(item.id, template).await;
        info!(video_id = item.id, outcome = %watch.outcome, "run_batch: video finished");
        report.reports.push(watch);

        if idx + 1 < count && !engine.stop_signal().sleep(config.gap).await {
            report.skipped = count - idx - 1;
            break;
        }
    }
    report
}

/// List a course's videos and run the batch over the incomplete ones
pub async fn watch_course_incomplete(
    engine: &WatchEngine,
    course_id: u64,
    template: Option<&ProgressTemplate>,
    config: &BatchConfig,
) -> Result<BatchReport, NetworkError> {
    debug!(%course_id, "watch_course_incomplete: called");
    let items = Discovery::new(engine.gateway().clone())
        .list_videos(course_id, false)
        .await?;
    Ok(run_batch(engine, &items, template, config).await)
}
