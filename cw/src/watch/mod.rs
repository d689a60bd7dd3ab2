//! Progress engine
//!
//! A run resolves one video's session context, then submits templated
//! progress updates at a fixed interval until the server reports completion,
//! the time budget runs out, or a stop is requested. Batches run videos one
//! after another; there is never more than one submission in flight.

mod batch;
mod engine;
mod progress;
mod stop;
mod template;

pub use batch::{BatchConfig, BatchReport, run_batch, select_incomplete, watch_course_incomplete};
pub use engine::{
    AbortReason, PROBE_PREVIEW_CHARS, PROBE_TIME_SECS, ProbeError, ProbeReport, ProbeSummary, ResolvedTarget,
    ResourceIdSource, WatchConfig, WatchEngine, WatchOutcome, WatchReport, resource_page_path,
};
pub use progress::{
    COMPLETION_MARKERS, FINISH_THRESHOLD, elapsed_seconds, finish_flag, format_fraction, is_completion_signal,
    next_sleep, progress_fraction, uniqueness_token,
};
pub use stop::StopSignal;
pub use template::{PLACEHOLDERS, ProgressTemplate, TemplateError, TemplateValues};
