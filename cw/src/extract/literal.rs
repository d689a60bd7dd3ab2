//! Locating and parsing JavaScript object literals embedded in pages
//!
//! Pages carry configuration as inline script (`M.cfg = {...};`,
//! `playerdata = {...}`), which is near-JSON at best. Parsing goes through two
//! normalization passes and gives up with an empty map rather than an error.

use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Find the first object literal following any of the anchors
///
/// Each anchor must match text that ends right before the opening brace, or
/// be separated from it only by whitespace. The literal is bounded by a
/// balanced-brace scan that skips strings and comments.
pub fn find_object_literal<'a>(text: &'a str, anchors: &[&Regex]) -> Option<&'a str> {
    for anchor in anchors {
        for m in anchor.find_iter(text) {
            let rest = &text[m.end()..];
            let offset = rest.len() - rest.trim_start().len();
            if !rest[offset..].starts_with('{') {
                continue;
            }
            let start = m.end() + offset;
            if let Some(end) = balanced_end(&text[start..]) {
                return Some(&text[start..start + end]);
            }
        }
    }
    None
}

/// Byte length of the balanced `{...}` prefix of `text`, if it closes
fn balanced_end(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '/' if matches!(chars.peek(), Some((_, '/'))) => {
                for (_, c) in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut star = false;
                for (_, c) in chars.by_ref() {
                    if star && c == '/' {
                        break;
                    }
                    star = c == '*';
                }
            }
            '"' | '\'' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i + c.len_utf8());
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a near-JSON object literal into a map; never fails
pub fn parse_object_literal(raw: &str) -> Map<String, Value> {
    if let Some(map) = parse_as_object(&normalize(raw, false)) {
        return map;
    }
    debug!(len = raw.len(), "parse_object_literal: strict pass failed, trying relaxed pass");
    if let Some(map) = parse_as_object(&normalize(raw, true)) {
        return map;
    }
    debug!(len = raw.len(), "parse_object_literal: relaxed pass failed, giving up");
    Map::new()
}

fn parse_as_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Rewrite script text towards strict JSON
///
/// Always strips comments and trailing commas. In relaxed mode it also turns
/// single-quoted strings into double-quoted ones and quotes bare keys.
fn normalize(raw: &str, relaxed: bool) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let mut out = String::with_capacity(raw.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '"' | '\'' | '`' => {
                i = copy_string(&chars, i, relaxed, &mut out);
            }
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            ',' => {
                let j = skip_trivia(&chars, i + 1);
                if !matches!(chars.get(j), Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if relaxed && (c.is_alphabetic() || c == '_' || c == '$') => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                let j = skip_trivia(&chars, i);
                let is_key = chars.get(j) == Some(&':')
                    && matches!(out.trim_end().chars().last(), Some('{') | Some(','));
                if is_key {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// Index of the next character that is neither whitespace nor inside a comment
fn skip_trivia(chars: &[char], mut i: usize) -> usize {
    loop {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        match (chars.get(i), chars.get(i + 1)) {
            (Some('/'), Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            (Some('/'), Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
            }
            _ => return i,
        }
    }
}

/// Copy the string literal starting at `start`, returning the index after it
fn copy_string(chars: &[char], start: usize, relaxed: bool, out: &mut String) -> usize {
    let quote = chars[start];
    let convert = relaxed && quote != '"';
    out.push(if convert { '"' } else { quote });

    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        if c == '\\' {
            match chars.get(i + 1) {
                Some('\'') if convert => out.push('\''),
                Some(&n) => {
                    out.push('\\');
                    out.push(n);
                }
                None => out.push('\\'),
            }
            i += 2;
            continue;
        }
        if c == quote {
            out.push(if convert { '"' } else { quote });
            return i + 1;
        }
        if convert && c == '"' {
            out.push_str("\\\"");
        } else {
            out.push(c);
        }
        i += 1;
    }
    i
}

/// Read an integer from a JSON number or a digit string
pub fn value_as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a non-empty string
pub fn value_as_token(value: &Value) -> Option<String> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(pattern: &str) -> Regex {
        Regex::new(pattern).unwrap()
    }

    #[test]
    fn test_find_object_literal_skips_comments() {
        let html = "var playerdata = {fsresourceid: 4821, // the video's id\n duration: 600, /* don't } */ sesskey: 'abc123'};";
        let re = anchor(r"playerdata\s*=\s*");
        let raw = find_object_literal(html, &[&re]).unwrap();
        assert!(raw.ends_with("sesskey: 'abc123'}"));

        let map = parse_object_literal(raw);
        assert_eq!(map.get("fsresourceid"), Some(&Value::from(4821)));
        assert_eq!(map.get("duration"), Some(&Value::from(600)));
        assert_eq!(map.get("sesskey"), Some(&Value::from("abc123")));
    }

    #[test]
    fn test_unterminated_block_comment_does_not_close() {
        let re = anchor(r"cfg\s*=\s*");
        assert_eq!(find_object_literal("cfg = {a: 1 /* } ", &[&re]), None);
    }

    #[test]
    fn test_find_object_literal_balanced() {
        let html = r#"<script>M.cfg = {"a": {"b": 1}, "c": "}"};</script>"#;
        let re = anchor(r"M\.cfg\s*=\s*");
        assert_eq!(find_object_literal(html, &[&re]), Some(r#"{"a": {"b": 1}, "c": "}"}"#));
    }

    #[test]
    fn test_find_object_literal_tries_anchors_in_order() {
        let html = "var x = 1; cfg: {\"sesskey\": \"k\"}";
        let first = anchor(r"M\.cfg\s*=\s*");
        let second = anchor(r"cfg\s*:\s*");
        assert_eq!(find_object_literal(html, &[&first, &second]), Some("{\"sesskey\": \"k\"}"));
    }

    #[test]
    fn test_find_object_literal_unterminated() {
        let re = anchor(r"playerdata\s*=\s*");
        assert_eq!(find_object_literal("playerdata = {\"a\": 1", &[&re]), None);
        assert_eq!(find_object_literal("playerdata = 5;", &[&re]), None);
    }

    #[test]
    fn test_parse_strict_json() {
        let map = parse_object_literal(r#"{"sesskey": "abc", "courseId": 12}"#);
        assert_eq!(map["sesskey"], "abc");
        assert_eq!(map["courseId"], 12);
    }

    #[test]
    fn test_parse_trailing_commas_and_comments() {
        let map = parse_object_literal("{\"a\": [1, 2,], // note\n \"b\": 3, /* x */ }");
        assert_eq!(map["a"], serde_json::json!([1, 2]));
        assert_eq!(map["b"], 3);
    }

    #[test]
    fn test_parse_single_quotes_and_bare_keys() {
        let map = parse_object_literal("{fsresourceid: 4821, duration: 600, sesskey: 'abc123'}");
        assert_eq!(map["fsresourceid"], 4821);
        assert_eq!(map["duration"], 600);
        assert_eq!(map["sesskey"], "abc123");
    }

    #[test]
    fn test_parse_mixed_quotes_keep_content() {
        let map = parse_object_literal(r#"{'title': 'say "hi"', "it's": 'don\'t', url: 'http://x/y'}"#);
        assert_eq!(map["title"], "say \"hi\"");
        assert_eq!(map["it's"], "don't");
        assert_eq!(map["url"], "http://x/y");
    }

    #[test]
    fn test_parse_live_expression_gives_empty() {
        let map = parse_object_literal("{a: new Date(), b: function() { return 1; }}");
        assert!(map.is_empty());
    }

    #[test]
    fn test_parse_non_object_gives_empty() {
        assert!(parse_object_literal("[1, 2]").is_empty());
        assert!(parse_object_literal("").is_empty());
    }

    #[test]
    fn test_value_as_u64() {
        assert_eq!(value_as_u64(&serde_json::json!(42)), Some(42));
        assert_eq!(value_as_u64(&serde_json::json!("7200")), Some(7200));
        assert_eq!(value_as_u64(&serde_json::json!(600.0)), Some(600));
        assert_eq!(value_as_u64(&serde_json::json!("abc")), None);
        assert_eq!(value_as_u64(&serde_json::json!(-1)), None);
        assert_eq!(value_as_u64(&serde_json::json!(null)), None);
    }

    #[test]
    fn test_value_as_token() {
        assert_eq!(value_as_token(&serde_json::json!("abc")), Some("abc".to_string()));
        assert_eq!(value_as_token(&serde_json::json!("  ")), None);
        assert_eq!(value_as_token(&serde_json::json!(5)), None);
    }
}
