//! coursewatch CLI entry point

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

use coursewatch::cli::{Cli, Command, WatchArgs, batch_config};
use coursewatch::config::{Config, SESSION_ENV, resolve_cookie_header};
use coursewatch::discovery::{CourseSource, Discovery};
use coursewatch::rpc::RpcGateway;
use coursewatch::transport::{ReqwestBackend, RetryPolicy, Transport};
use coursewatch::watch::{
    BatchConfig, PROBE_PREVIEW_CHARS, StopSignal, WatchEngine, WatchOutcome, WatchReport, watch_course_incomplete,
};

/// Exit code for missing credentials or arguments
const EXIT_USAGE: u8 = 2;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("coursewatch")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("coursewatch.log")).context("Failed to create log file")?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(log_file))
                .with_ansi(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let env_session = std::env::var(SESSION_ENV).ok();
    let Some(cookie) = resolve_cookie_header(
        cli.cookie.as_deref(),
        cli.cookie_value.as_deref(),
        env_session.as_deref(),
    ) else {
        eprintln!(
            "{} no session cookie: pass --cookie, --cookie-value or set {}",
            "error:".red().bold(),
            SESSION_ENV
        );
        return Ok(ExitCode::from(EXIT_USAGE));
    };

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    debug!(base_url = %config.site.base_url, "main: config loaded");

    let backend = ReqwestBackend::new(&config.http, Some(&cookie)).context("Failed to build HTTP client")?;
    let transport = Transport::new(
        Arc::new(backend),
        config.site.base_url.clone(),
        RetryPolicy::from_config(&config.http),
    );
    let gateway = RpcGateway::new(transport, &config.site);

    let stop = StopSignal::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("main: interrupt received, stopping after the current call");
            ctrl_c.stop();
        }
    });

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::ListCourses => cmd_list_courses(gateway).await,
        Command::ListVideos {
            course_id,
            only_incomplete,
        } => cmd_list_videos(gateway, course_id, only_incomplete).await,
        Command::WatchVideo { video_id, watch } => cmd_watch_video(gateway, &config, stop, video_id, &watch).await,
        Command::ProbeService { video_id, watch } => cmd_probe_service(gateway, &config, stop, video_id, &watch).await,
        Command::WatchCourseIncomplete {
            course_id,
            limit,
            gap,
            watch,
        } => {
            let batch = batch_config(limit, gap, &config.watch);
            cmd_watch_course_incomplete(gateway, &config, stop, course_id, &watch, &batch).await
        }
    }
}

async fn cmd_list_courses(gateway: RpcGateway) -> Result<ExitCode> {
    debug!("cmd_list_courses: called");
    let listing = Discovery::new(gateway)
        .list_courses()
        .await
        .context("Failed to load the dashboard page")?;

    if listing.source == CourseSource::Service {
        println!("{}", "Overview block not found in HTML, listed via the service".yellow());
    }
    println!("{}", format!("Found {} courses", listing.courses.len()).cyan());
    for (idx, course) in listing.courses.iter().enumerate() {
        let id = course.id.map(|id| id.to_string()).unwrap_or_else(|| "?".to_string());
        println!("[{}] id={} name={} url={}", idx + 1, id.yellow(), course.name, course.url);
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_list_videos(gateway: RpcGateway, course_id: u64, only_incomplete: bool) -> Result<ExitCode> {
    debug!(%course_id, %only_incomplete, "cmd_list_videos: called");
    let items = Discovery::new(gateway)
        .list_videos(course_id, only_incomplete)
        .await
        .context("Failed to load the course page")?;

    println!("{}", format!("Found {} videos in course {}", items.len(), course_id).cyan());
    for (idx, item) in items.iter().enumerate() {
        let state = match item.incomplete {
            Some(true) => item.state_label().yellow(),
            Some(false) => item.state_label().green(),
            None => item.state_label().dimmed(),
        };
        println!("[{}] id={} name={} state={} url={}", idx + 1, item.id, item.name, state, item.url);
    }
    Ok(ExitCode::SUCCESS)
}

fn build_engine(gateway: RpcGateway, config: &Config, stop: StopSignal, watch: &WatchArgs) -> WatchEngine {
    WatchEngine::new(gateway, watch.watch_config(&config.watch)).with_stop_signal(stop)
}

fn print_report(report: &WatchReport) {
    let title = report.title.as_deref().unwrap_or("untitled");
    let outcome = match &report.outcome {
        WatchOutcome::Completed => report.outcome.to_string().green(),
        WatchOutcome::TimedOut => report.outcome.to_string().yellow(),
        WatchOutcome::Aborted(_) | WatchOutcome::Cancelled => report.outcome.to_string().red(),
    };
    let fraction = report
        .last_fraction
        .map(|f| format!("{:.0}%", f * 100.0))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "video {} ({}): {} after {} calls, {} failed, progress {}",
        report.video_id.to_string().cyan(),
        title,
        outcome,
        report.calls,
        report.failed_calls,
        fraction
    );
    if let Some(error) = &report.last_error {
        println!("  last error: {}", error.dimmed());
    }
}

async fn cmd_watch_video(
    gateway: RpcGateway,
    config: &Config,
    stop: StopSignal,
    video_id: u64,
    watch: &WatchArgs,
) -> Result<ExitCode> {
    debug!(%video_id, "cmd_watch_video: called");
    let template = watch.template().context("Failed to load progress template")?;
    if template.is_none() {
        println!("{}", "No payload template given: visiting the page without submitting progress".yellow());
    }

    let engine = build_engine(gateway, config, stop, watch);
    let report = engine.run(video_id, template.as_ref()).await;
    print_report(&report);

    if report.outcome.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

async fn cmd_probe_service(
    gateway: RpcGateway,
    config: &Config,
    stop: StopSignal,
    video_id: u64,
    watch: &WatchArgs,
) -> Result<ExitCode> {
    debug!(%video_id, "cmd_probe_service: called");
    let template = watch.template().context("Failed to load progress template")?;
    let engine = build_engine(gateway, config, stop, watch);

    let report = match engine.probe(video_id, template.as_ref()).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("{} {}", "probe failed:".red().bold(), e);
            return Ok(ExitCode::FAILURE);
        }
    };

    println!(
        "{} video={} fsresourceid={} http={}",
        "probe".cyan(),
        report.video_id,
        report.resource_id,
        report.capture.status
    );
    println!("raw: {}", report.raw_preview(PROBE_PREVIEW_CHARS));
    match report.summary() {
        Some(summary) => {
            let show = |v: &Option<serde_json::Value>| v.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "-".to_string());
            println!(
                "status={} progress={} totaltime={} completion={}",
                show(&summary.status),
                show(&summary.progress),
                show(&summary.totaltime),
                show(&summary.completion)
            );
        }
        None => println!("{}", "response carried no data entry".yellow()),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_watch_course_incomplete(
    gateway: RpcGateway,
    config: &Config,
    stop: StopSignal,
    course_id: u64,
    watch: &WatchArgs,
    batch: &BatchConfig,
) -> Result<ExitCode> {
    debug!(%course_id, ?batch, "cmd_watch_course_incomplete: called");
    let template = watch.template().context("Failed to load progress template")?;
    let engine = build_engine(gateway, config, stop, watch);

    let report = watch_course_incomplete(&engine, course_id, template.as_ref(), batch)
        .await
        .context("Failed to load the course page")?;

    if report.nothing_to_do() {
        println!("{}", format!("No incomplete videos in course {}, nothing to do", course_id).green());
        return Ok(ExitCode::SUCCESS);
    }

    for watch_report in &report.reports {
        print_report(watch_report);
    }
    println!(
        "{}",
        format!(
            "{} of {} videos completed{}",
            report.completed(),
            report.reports.len(),
            if report.skipped > 0 {
                format!(", {} skipped after interrupt", report.skipped)
            } else {
                String::new()
            }
        )
        .cyan()
    );
    Ok(ExitCode::SUCCESS)
}
