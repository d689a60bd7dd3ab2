//! CLI argument parsing for coursewatch

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::WatchDefaults;
use crate::watch::{BatchConfig, ProgressTemplate, TemplateError, WatchConfig};

#[derive(Parser, Debug)]
#[command(name = "cw")]
#[command(author, version, about = "Course video progress automation for Moodle sites", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    /// Full Cookie header, e.g. "MoodleSession=abc; other=1"
    #[arg(long, global = true)]
    pub cookie: Option<String>,

    /// Raw MoodleSession value (falls back to $MOODLE_SESSION)
    #[arg(long = "cookie-value", global = true)]
    pub cookie_value: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List courses from the dashboard overview
    ListCourses,

    /// List video activities in a course
    ListVideos {
        #[arg(long = "course-id")]
        course_id: u64,

        /// Only show videos marked incomplete
        #[arg(long = "only-incomplete")]
        only_incomplete: bool,
    },

    /// Submit progress for one video
    WatchVideo {
        #[arg(long = "video-id")]
        video_id: u64,

        #[command(flatten)]
        watch: WatchArgs,
    },

    /// Send a single progress call and show the raw response
    ProbeService {
        #[arg(long = "video-id")]
        video_id: u64,

        #[command(flatten)]
        watch: WatchArgs,
    },

    /// Watch every incomplete video of a course, one after another
    WatchCourseIncomplete {
        #[arg(long = "course-id")]
        course_id: u64,

        /// Process at most this many videos
        #[arg(long)]
        limit: Option<usize>,

        /// Seconds to wait between videos
        #[arg(long)]
        gap: Option<u64>,

        #[command(flatten)]
        watch: WatchArgs,
    },
}

/// Options shared by the commands that submit progress
#[derive(Args, Debug, Clone, Default)]
pub struct WatchArgs {
    /// Seconds to keep submitting progress per video
    #[arg(long)]
    pub duration: Option<u64>,

    /// Seconds between submissions
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval: Option<u64>,

    /// Video length in seconds, when the page does not give it
    #[arg(long = "target-seconds")]
    pub target_seconds: Option<u64>,

    /// Resource id to submit, when it cannot be resolved
    #[arg(long)]
    pub fsresourceid: Option<u64>,

    /// Progress request body as JSON text with placeholders
    #[arg(long = "payload-template", conflicts_with = "payload_file")]
    pub payload_template: Option<String>,

    /// File holding the progress request body
    #[arg(long = "payload-file")]
    pub payload_file: Option<PathBuf>,
}

impl WatchArgs {
    /// Engine settings, with unset flags taken from the config
    pub fn watch_config(&self, defaults: &WatchDefaults) -> WatchConfig {
        WatchConfig {
            duration: Duration::from_secs(self.duration.unwrap_or(defaults.duration_secs)),
            interval: Duration::from_secs(self.interval.unwrap_or(defaults.interval_secs)),
            target_seconds: self.target_seconds,
            resource_id_override: self.fsresourceid,
        }
    }

    /// Template from inline text or file, if either was given
    pub fn template(&self) -> Result<Option<ProgressTemplate>, TemplateError> {
        if let Some(text) = &self.payload_template {
            return Ok(Some(ProgressTemplate::new(text.clone())));
        }
        self.payload_file.as_ref().map(ProgressTemplate::from_file).transpose()
    }
}

/// Batch settings, with unset flags taken from the config
pub fn batch_config(limit: Option<usize>, gap: Option<u64>, defaults: &WatchDefaults) -> BatchConfig {
    BatchConfig {
        limit,
        gap: Duration::from_secs(gap.unwrap_or(defaults.gap_secs)),
    }
}
