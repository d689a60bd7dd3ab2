//! Session-context extraction from resource pages
//!
//! `ContextExtractor` runs an ordered chain of strategies over one HTML
//! document and merges their results first-match-wins:
//!
//! 1. page configuration object (`M.cfg`)
//! 2. player configuration object (`playerdata`)
//! 3. inline patterns, one candidate list per field
//! 4. the first `<h2>` heading, for the title
//!
//! Extraction never fails; fields it cannot find stay `None`.

mod literal;
mod strategy;

pub use literal::{find_object_literal, parse_object_literal, value_as_token, value_as_u64};
pub use strategy::{
    ExtractionStrategy, HeadingStrategy, InlinePatternStrategy, PageConfigStrategy, PartialContext, PlayerDataStrategy,
    element_text, selector,
};

use serde::Serialize;
use tracing::debug;

/// Session context resolved from one resource page
///
/// Immutable once built. A context without `security_token` cannot be used
/// to submit progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionContext {
    pub security_token: Option<String>,
    pub resource_id: Option<u64>,
    pub container_id: Option<u64>,
    pub context_instance_id: Option<u64>,
    pub session_timeout_seconds: Option<u64>,
    pub target_duration_seconds: Option<u64>,
    pub title: Option<String>,
}

impl SessionContext {
    pub fn is_usable(&self) -> bool {
        self.security_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl From<PartialContext> for SessionContext {
    fn from(p: PartialContext) -> Self {
        Self {
            security_token: p.security_token,
            resource_id: p.resource_id,
            container_id: p.container_id,
            context_instance_id: p.context_instance_id,
            session_timeout_seconds: p.session_timeout_seconds,
            target_duration_seconds: p.target_duration_seconds,
            title: p.title,
        }
    }
}

/// Resource-level metadata: what the player needs to know about one video
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceMeta {
    pub resource_id: Option<u64>,
    pub duration_seconds: Option<u64>,
    pub title: Option<String>,
    pub security_token: Option<String>,
}

/// Ordered chain of extraction strategies
pub struct ContextExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for ContextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextExtractor {
    /// The standard chain: page config, player data, inline patterns, heading
    pub fn new() -> Self {
        Self::with_strategies(vec![
            Box::new(PageConfigStrategy),
            Box::new(PlayerDataStrategy),
            Box::new(InlinePatternStrategy),
            Box::new(HeadingStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Resolve the full session context from a page
    pub fn extract_context(&self, html: &str) -> SessionContext {
        debug!(html_len = html.len(), strategies = self.strategies.len(), "extract_context: called");
        let mut merged = PartialContext::default();
        for strategy in &self.strategies {
            let partial = strategy.extract(html);
            debug!(strategy = strategy.name(), found = ?partial, "extract_context: strategy result");
            merged.fill_from(partial);
        }
        merged.into()
    }

    /// Only the session key
    pub fn extract_security_token(&self, html: &str) -> Option<String> {
        self.extract_context(html).security_token
    }

    /// Resource id, duration, title and session key
    pub fn extract_resource_meta(&self, html: &str) -> ResourceMeta {
        let ctx = self.extract_context(html);
        ResourceMeta {
            resource_id: ctx.resource_id,
            duration_seconds: ctx.target_duration_seconds,
            title: ctx.title,
            security_token: ctx.security_token,
        }
    }
}

/// Extract with the standard chain
pub fn extract_context(html: &str) -> SessionContext {
    ContextExtractor::new().extract_context(html)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const VIDEO_PAGE: &str = r#"
<html><head><script>
M.cfg = {"sesskey":"cfgKey01","sessiontimeout":"1440","courseId":2545,"contextInstanceId":159716};
</script></head><body>
<h2>第三章 视频</h2>
<script>
var playerdata = {
    fsresourceid: 4821,
    duration: 600,
    sesskey: 'playerKey', // fallback only
};
</script></body></html>
"#;

    #[test]
    fn test_extract_full_page() {
        let ctx = extract_context(VIDEO_PAGE);
        assert_eq!(
            ctx,
            SessionContext {
                security_token: Some("cfgKey01".to_string()),
                resource_id: Some(4821),
                container_id: Some(2545),
                context_instance_id: Some(159716),
                session_timeout_seconds: Some(1440),
                target_duration_seconds: Some(600),
                title: Some("第三章 视频".to_string()),
            }
        );
        assert!(ctx.is_usable());
    }

    #[test]
    fn test_player_scenario() {
        let ctx = extract_context("playerdata = {fsresourceid: 4821, duration: 600, sesskey: 'abc123'}");
        assert_eq!(ctx.resource_id, Some(4821));
        assert_eq!(ctx.target_duration_seconds, Some(600));
        assert_eq!(ctx.security_token.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_player_token_is_fallback_for_page_config() {
        let html = r#"M.cfg = {"courseId": 3}; playerdata = {"sesskey": "fromPlayer"};"#;
        let ctx = extract_context(html);
        assert_eq!(ctx.security_token.as_deref(), Some("fromPlayer"));
        assert_eq!(ctx.container_id, Some(3));
    }

    #[test]
    fn test_missing_everything() {
        let ctx = extract_context("<html><body>Please log in</body></html>");
        assert_eq!(ctx, SessionContext::default());
        assert!(!ctx.is_usable());
    }

    #[test]
    fn test_duration_stays_absent() {
        let ctx = extract_context(r#"M.cfg = {"sesskey": "k"};"#);
        assert_eq!(ctx.target_duration_seconds, None);
    }

    #[test]
    fn test_resource_meta() {
        let meta = ContextExtractor::new().extract_resource_meta(VIDEO_PAGE);
        assert_eq!(meta.resource_id, Some(4821));
        assert_eq!(meta.duration_seconds, Some(600));
        assert_eq!(meta.title.as_deref(), Some("第三章 视频"));
        assert_eq!(meta.security_token.as_deref(), Some("cfgKey01"));
    }

    #[test]
    fn test_security_token_from_input_field() {
        let html = r#"<form><input type="hidden" name="sesskey" value="a1B2c3"></form>"#;
        assert_eq!(
            ContextExtractor::new().extract_security_token(html),
            Some("a1B2c3".to_string())
        );
    }

    #[test]
    fn test_custom_chain_order_decides() {
        let html = r#"M.cfg = {"sesskey": "cfg"}; <input name="sesskey" value="form">"#;
        let extractor =
            ContextExtractor::with_strategies(vec![Box::new(InlinePatternStrategy), Box::new(PageConfigStrategy)]);
        assert_eq!(extractor.extract_security_token(html).as_deref(), Some("form"));
    }

    #[test]
    fn test_commented_player_data_beats_earlier_literal() {
        let html = "<script>var anim = {duration: 30};</script>\n\
<script>var playerdata = {fsresourceid: 4821, // the video's id\n duration: 600, sesskey: 'abc123'};</script>";
        let context = extract_context(html);
        assert_eq!(context.resource_id, Some(4821));
        assert_eq!(context.target_duration_seconds, Some(600));
        assert_eq!(context.security_token.as_deref(), Some("abc123"));
    }

    proptest! {
        #[test]
        fn prop_near_json_never_panics_and_is_idempotent(
            keys in proptest::collection::vec("[a-z]{1,8}", 0..6),
            values in proptest::collection::vec("[0-9]{1,5}|'[a-z]{0,5}'|\"[a-z]{0,5}\"|true|null", 0..6),
            trailing in any::<bool>(),
            junk in "[ ,;:'\"{}\\[\\]a-z0-9/*\n]{0,40}",
        ) {
            let mut body = keys
                .iter()
                .zip(values.iter())
                .map(|(k, v)| format!("{}: {}", k, v))
                .collect::<Vec<_>>()
                .join(", ");
            if trailing {
                body.push(',');
            }
            let html = format!("<script>playerdata = {{{}}}; M.cfg = {{{}}};</script>", body, junk);

            let first = extract_context(&html);
            let second = extract_context(&html);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_fsresourceid_survives_quote_styles(
            id in 1u64..10_000_000,
            quoted_key in any::<bool>(),
            single in any::<bool>(),
            trailing in any::<bool>(),
            commented in any::<bool>(),
        ) {
            let q = if single { "'" } else { "\"" };
            let key = if quoted_key { format!("{q}fsresourceid{q}") } else { "fsresourceid".to_string() };
            let comma = if trailing { "," } else { "" };
            let note = if commented { "// the video's id\n" } else { "" };
            let html = format!("playerdata = {{{key}: {id}, {note}{q}name{q}: {q}x{q}{comma}}};");
            prop_assert_eq!(extract_context(&html).resource_id, Some(id));
        }
    }
}
