//! Course and video discovery
//!
//! Courses come from the overview block on the dashboard page, falling back to
//! the enrolled-courses service call when the block is rendered client-side.
//! Videos come from the activity list on a course page.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::extract::{element_text, selector, value_as_u64};
use crate::rpc::RpcGateway;
use crate::transport::NetworkError;

static COURSE_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/course/view\.php\?id=(\d+)").expect("valid course link regex"));

static VIDEO_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"mod/fsresource/view\.php\?id=(\d+)").expect("valid video link regex"));

/// Containers of the course overview block across theme variants
const OVERVIEW_BLOCK: &str =
    "section#block-myoverview, div#block-myoverview, .block_myoverview, [id^='block-myoverview']";

const VIDEO_ANCHOR: &str = "a[href*='mod/fsresource/view.php?id=']";

/// Button label the course page shows on activities still to do
const TODO_LABEL: &str = "待办事项";

/// Path of a course page
pub fn course_page_path(course_id: u64) -> String {
    format!("/course/view.php?id={}", course_id)
}

/// An enrolled course
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Course {
    pub id: Option<u64>,
    pub name: String,
    pub url: String,
}

/// A video activity on a course page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoItem {
    pub id: u64,
    pub name: String,
    pub url: String,
    /// `None` when the page gives no completion hint
    pub incomplete: Option<bool>,
}

impl VideoItem {
    pub fn state_label(&self) -> &'static str {
        match self.incomplete {
            Some(true) => "incomplete",
            Some(false) => "complete",
            None => "unknown",
        }
    }
}

/// Where a course list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CourseSource {
    Overview,
    Service,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseListing {
    pub source: CourseSource,
    pub courses: Vec<Course>,
}

/// Anchor text, then its title attribute
fn anchor_name(anchor: ElementRef<'_>) -> Option<String> {
    Some(element_text(anchor))
        .filter(|n| !n.is_empty())
        .or_else(|| anchor.value().attr("title").map(str::to_string))
}

/// Courses linked from the overview block; empty when the block is absent
pub fn parse_overview_courses(html: &str) -> Vec<Course> {
    let document = Html::parse_document(html);
    let links = selector("a[href]");

    let mut seen_urls = HashSet::new();
    let mut seen_ids = HashSet::new();
    let mut courses = Vec::new();
    for block in document.select(&selector(OVERVIEW_BLOCK)) {
        for anchor in block.select(&links) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Some(link) = COURSE_LINK.captures(href) else {
                continue;
            };
            let id = link[1].parse::<u64>().ok();
            if !seen_urls.insert(href.to_string()) || id.is_some_and(|id| !seen_ids.insert(id)) {
                continue;
            }
            let name = anchor_name(anchor).unwrap_or_else(|| href.to_string());
            courses.push(Course {
                id,
                name,
                url: href.to_string(),
            });
        }
    }
    debug!(count = courses.len(), "parse_overview_courses: done");
    courses
}

/// Course records from the enrolled-courses service
pub fn courses_from_service(records: &[Value], base_url: &str) -> Vec<Course> {
    records
        .iter()
        .map(|record| {
            let id = record.get("id").and_then(value_as_u64);
            let name = ["fullname", "shortname"]
                .iter()
                .find_map(|key| record.get(*key).and_then(Value::as_str).filter(|s| !s.is_empty()))
                .map(str::to_string)
                .or_else(|| id.map(|id| id.to_string()))
                .unwrap_or_default();
            let url = record
                .get("viewurl")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| id.map(|id| format!("{}{}", base_url.trim_end_matches('/'), course_page_path(id))))
                .unwrap_or_default();
            Course { id, name, url }
        })
        .collect()
}

fn completion_hint(activity: ElementRef<'_>) -> Option<bool> {
    if let Some(marker) = activity.select(&selector(".activity-completion")).next() {
        let marker = marker.value();
        let hint = match marker.attr("data-completionstate").or_else(|| marker.attr("data-state")) {
            Some(state) => state.trim().parse::<i64>().ok().map(|s| s == 0),
            None => {
                let classes = marker.classes().collect::<Vec<_>>().join(" ");
                // "notcompleted" contains "completed"; test it first
                if classes.contains("notcompleted") || classes.contains("incomplete") {
                    Some(true)
                } else if classes.contains("completed") {
                    Some(false)
                } else {
                    None
                }
            }
        };
        if hint.is_some() {
            return hint;
        }
    }

    activity
        .select(&selector("button"))
        .any(|button| button.text().any(|t| t.contains(TODO_LABEL)))
        .then_some(true)
}

fn video_from_activity(activity: ElementRef<'_>) -> Option<VideoItem> {
    let mut id = None;
    let mut name = None;
    let mut url = None;

    if let Some(anchor) = activity.select(&selector(VIDEO_ANCHOR)).next() {
        let href = anchor.value().attr("href").unwrap_or_default();
        id = VIDEO_LINK.captures(href).and_then(|m| m[1].parse::<u64>().ok());
        if id.is_some() {
            name = anchor_name(anchor);
            url = Some(href.to_string());
        }
    }

    let video_icon = activity
        .select(&selector("img.activityicon"))
        .find(|icon| icon.value().attr("src").is_some_and(|src| src.contains("/f/video")));
    if let Some(icon) = video_icon {
        if id.is_none() {
            id = icon.value().attr("data-id").and_then(|v| v.trim().parse::<u64>().ok());
        }
        if name.is_none() {
            name = activity
                .select(&selector(".instancename"))
                .next()
                .map(element_text)
                .filter(|n| !n.is_empty());
        }
    }

    let id = id?;
    Some(VideoItem {
        id,
        name: name.unwrap_or_else(|| format!("fsresource-{}", id)),
        url: url.unwrap_or_else(|| format!("/mod/fsresource/view.php?id={}", id)),
        incomplete: completion_hint(activity),
    })
}

/// Video activities on a course page, deduplicated by id
pub fn parse_course_videos(html: &str) -> Vec<VideoItem> {
    let document = Html::parse_document(html);
    let mut items: Vec<VideoItem> = document
        .select(&selector("li.activity"))
        .filter_map(video_from_activity)
        .collect();

    if items.is_empty() {
        debug!("parse_course_videos: no activity items, scanning all links");
        items = document
            .select(&selector("a[href]"))
            .filter_map(|anchor| {
                let href = anchor.value().attr("href")?;
                let id = VIDEO_LINK.captures(href)?[1].parse::<u64>().ok()?;
                Some(VideoItem {
                    id,
                    name: anchor_name(anchor).unwrap_or_else(|| format!("fsresource-{}", id)),
                    url: href.to_string(),
                    incomplete: None,
                })
            })
            .collect();
    }

    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.id));
    debug!(count = items.len(), "parse_course_videos: done");
    items
}

/// Page-level discovery on top of the gateway
pub struct Discovery {
    gateway: RpcGateway,
}

impl Discovery {
    pub fn new(gateway: RpcGateway) -> Self {
        Self { gateway }
    }

    /// Enrolled courses from the dashboard, or the service when the block is empty
    pub async fn list_courses(&self) -> Result<CourseListing, NetworkError> {
        debug!("list_courses: called");
        let html = self.gateway.transport().get_text(self.gateway.entry_path()).await?;
        let courses = parse_overview_courses(&html);
        if !courses.is_empty() {
            return Ok(CourseListing {
                source: CourseSource::Overview,
                courses,
            });
        }

        info!("list_courses: overview block empty, asking the service");
        let context = self.gateway.extractor().extract_context(&html);
        let records = match self.gateway.enrolled_courses("all", &context).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "list_courses: service lookup failed");
                Vec::new()
            }
        };
        Ok(CourseListing {
            source: CourseSource::Service,
            courses: courses_from_service(&records, self.gateway.transport().base_url()),
        })
    }

    /// Videos on a course page, optionally only those known to be incomplete
    pub async fn list_videos(&self, course_id: u64, only_incomplete: bool) -> Result<Vec<VideoItem>, NetworkError> {
        debug!(%course_id, %only_incomplete, "list_videos: called");
        let html = self.gateway.transport().get_text(&course_page_path(course_id)).await?;
        let mut items = parse_course_videos(&html);
        if only_incomplete {
            items.retain(|item| item.incomplete == Some(true));
        }
        Ok(items)
    }
}
