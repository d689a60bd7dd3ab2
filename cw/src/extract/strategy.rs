//! Extraction strategies
//!
//! Each strategy reads one kind of evidence from a page and returns whatever
//! fields it found. The extractor runs them in a fixed order and keeps the
//! first value seen for every field.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use tracing::debug;

use super::literal::{find_object_literal, parse_object_literal, value_as_token, value_as_u64};

/// Fields recovered by one strategy; `None` means "not found here"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialContext {
    pub security_token: Option<String>,
    pub resource_id: Option<u64>,
    pub container_id: Option<u64>,
    pub context_instance_id: Option<u64>,
    pub session_timeout_seconds: Option<u64>,
    pub target_duration_seconds: Option<u64>,
    pub title: Option<String>,
}

impl PartialContext {
    /// Fill fields still absent here from `other`; present fields are kept
    pub fn fill_from(&mut self, other: PartialContext) {
        self.security_token = self.security_token.take().or(other.security_token);
        self.resource_id = self.resource_id.or(other.resource_id);
        self.container_id = self.container_id.or(other.container_id);
        self.context_instance_id = self.context_instance_id.or(other.context_instance_id);
        self.session_timeout_seconds = self.session_timeout_seconds.or(other.session_timeout_seconds);
        self.target_duration_seconds = self.target_duration_seconds.or(other.target_duration_seconds);
        self.title = self.title.take().or(other.title);
    }

    pub fn is_empty(&self) -> bool {
        *self == PartialContext::default()
    }
}

/// One way of reading session context out of a page
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Extract whatever fields this strategy can find; must not panic
    fn extract(&self, html: &str) -> PartialContext;
}

fn regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static extraction pattern")
}

static PAGE_CFG_ANCHORS: LazyLock<[Regex; 2]> = LazyLock::new(|| [regex(r"M\.cfg\s*=\s*"), regex(r"\bcfg\s*:\s*")]);

static PLAYER_ANCHORS: LazyLock<[Regex; 1]> = LazyLock::new(|| [regex(r"\bplayerdata\s*[=:]\s*")]);

/// The page configuration object, `M.cfg = {...};`
///
/// Carries the session key, course id, context instance id and the session
/// timeout.
pub struct PageConfigStrategy;

impl PageConfigStrategy {
    pub fn parse(html: &str) -> Map<String, Value> {
        let anchors: Vec<&Regex> = PAGE_CFG_ANCHORS.iter().collect();
        find_object_literal(html, &anchors)
            .map(parse_object_literal)
            .unwrap_or_default()
    }
}

impl ExtractionStrategy for PageConfigStrategy {
    fn name(&self) -> &'static str {
        "page-config"
    }

    fn extract(&self, html: &str) -> PartialContext {
        let cfg = Self::parse(html);
        debug!(keys = cfg.len(), "PageConfigStrategy::extract: parsed config object");
        PartialContext {
            security_token: cfg.get("sesskey").and_then(value_as_token),
            container_id: cfg.get("courseId").and_then(value_as_u64),
            context_instance_id: cfg.get("contextInstanceId").and_then(value_as_u64),
            session_timeout_seconds: cfg.get("sessiontimeout").and_then(value_as_u64),
            ..Default::default()
        }
    }
}

/// The video player configuration, `playerdata = {...}`
pub struct PlayerDataStrategy;

impl ExtractionStrategy for PlayerDataStrategy {
    fn name(&self) -> &'static str {
        "player-data"
    }

    fn extract(&self, html: &str) -> PartialContext {
        let anchors: Vec<&Regex> = PLAYER_ANCHORS.iter().collect();
        let data = find_object_literal(html, &anchors)
            .map(parse_object_literal)
            .unwrap_or_default();
        debug!(keys = data.len(), "PlayerDataStrategy::extract: parsed player object");
        PartialContext {
            security_token: data.get("sesskey").and_then(value_as_token),
            resource_id: data.get("fsresourceid").and_then(value_as_u64),
            target_duration_seconds: data.get("duration").and_then(value_as_u64),
            ..Default::default()
        }
    }
}

static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        regex(r#"name=["']sesskey["']\s+value=["']([A-Za-z0-9]+)["']"#),
        regex(r#"value=["']([A-Za-z0-9]+)["']\s+name=["']sesskey["']"#),
        regex(r#"["']?sesskey["']?\s*[:=]\s*["']([A-Za-z0-9]+)["']"#),
    ]
});

static RESOURCE_ID_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        regex(r#"(?:^|[^\w-])["']?fsresourceid["']?\s*[:=]\s*["']?(\d+)"#),
        regex(r#"data-fsresourceid\s*=\s*["']?(\d+)"#),
        regex(r#"\bfsresource\s*:\s*\{[^}]*?\bid\s*:\s*(\d+)"#),
    ]
});

static DURATION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        regex(r#"(?:^|[^\w-])["']?duration["']?\s*[:=]\s*["']?(\d+)"#),
        regex(r#"data-duration\s*=\s*["']?(\d+)"#),
    ]
});

static COURSE_ID_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| vec![regex(r#"["']?courseId["']?\s*:\s*["']?(\d+)"#)]);

static CONTEXT_INSTANCE_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| vec![regex(r#"["']?contextInstanceId["']?\s*:\s*["']?(\d+)"#)]);

static SESSION_TIMEOUT_PATTERNS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| vec![regex(r#"["']?sessiontimeout["']?\s*:\s*["']?(\d+)"#)]);

/// First capture of the first pattern that matches
fn first_capture<'a>(html: &'a str, patterns: &[Regex]) -> Option<&'a str> {
    patterns
        .iter()
        .find_map(|re| re.captures(html).and_then(|c| c.get(1)).map(|m| m.as_str()))
}

fn first_number(html: &str, patterns: &[Regex]) -> Option<u64> {
    patterns.iter().find_map(|re| {
        re.captures(html)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// Line-oriented patterns, for pages where the objects are missing or unparsable
pub struct InlinePatternStrategy;

impl ExtractionStrategy for InlinePatternStrategy {
    fn name(&self) -> &'static str {
        "inline-patterns"
    }

    fn extract(&self, html: &str) -> PartialContext {
        PartialContext {
            security_token: first_capture(html, &TOKEN_PATTERNS).map(str::to_string),
            resource_id: first_number(html, &RESOURCE_ID_PATTERNS),
            container_id: first_number(html, &COURSE_ID_PATTERNS),
            context_instance_id: first_number(html, &CONTEXT_INSTANCE_PATTERNS),
            session_timeout_seconds: first_number(html, &SESSION_TIMEOUT_PATTERNS),
            target_duration_seconds: first_number(html, &DURATION_PATTERNS),
            title: None,
        }
    }
}

/// Build a selector from a fixed pattern
pub fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

/// Visible text of an element, whitespace squeezed; entities are already decoded by the parser
pub fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Title from the first level-2 heading
pub struct HeadingStrategy;

impl ExtractionStrategy for HeadingStrategy {
    fn name(&self) -> &'static str {
        "heading"
    }

    fn extract(&self, html: &str) -> PartialContext {
        let document = Html::parse_document(html);
        let title = document
            .select(&selector("h2"))
            .next()
            .map(element_text)
            .filter(|t| !t.is_empty());
        PartialContext {
            title,
            ..Default::default()
        }
    }
}
