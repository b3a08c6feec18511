//! Direct matching of the three-section answer inside raw event data.
//!
//! The upstream answer is headed by `旅行推荐:`, `行程规划:` and `旅行红黑榜:`.
//! When those anchors appear in order inside raw (still JSON-escaped) data, the
//! answer can be lifted out without decoding the payload. Matches stop at the
//! first unescaped `"`, i.e. at the end of the enclosing JSON string literal.

use std::sync::LazyLock;

use regex::Regex;

/// All three anchors, in order, up to the end of the enclosing string literal.
static ANSWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"旅行推荐\s*[:：](?:[^"\\]|\\.)*?行程规划\s*[:：](?:[^"\\]|\\.)*?旅行红黑榜\s*[:：](?:[^"\\]|\\.)*"#,
    )
    .expect("answer anchor regex")
});

/// A single `"content":"..."` field, captured without decoding.
static CONTENT_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("content field regex")
});

/// Find the anchored three-section answer in `raw` and unescape it.
pub fn find_answer(raw: &str) -> Option<String> {
    ANSWER_RE
        .find(raw)
        .map(|m| unescape(m.as_str()))
        .filter(|text| !text.trim().is_empty())
}

/// Find the first non-empty `"content"` string field in `raw` and unescape it.
pub fn find_content_field(raw: &str) -> Option<String> {
    CONTENT_FIELD_RE
        .captures(raw)
        .map(|caps| unescape(&caps[1]))
        .filter(|text| !text.trim().is_empty())
}

/// Undo JSON string escaping.
///
/// Decodes as a JSON string literal when possible; otherwise only `\n`, `\"`
/// and `\\` are rewritten.
pub fn unescape(escaped: &str) -> String {
    if let Ok(decoded) = serde_json::from_str::<String>(&format!("\"{escaped}\"")) {
        return decoded;
    }

    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
