//! Last-resort text recovery from the unframed bytes left after a stream ends.
//!
//! Only used when the frames yielded no text. Strategies, first success wins:
//! 1. JSON objects embedded in the leftovers, read through [`RuleChain::recovery`]
//! 2. The anchored three-section answer, matched directly
//! 3. The leftovers verbatim
//!
//! Nothing left at all is the one unrecoverable case.

use serde_json::Value;
use tracing::{debug, info};

use itinera_shared::{ItineraError, Result};

use crate::anchors;
use crate::rules::RuleChain;

/// Which strategy produced the recovered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    EmbeddedJson,
    AnchoredText,
    RawBuffer,
}

/// Text salvaged from leftover bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovered {
    pub text: String,
    pub strategy: RecoveryStrategy,
}

/// Recover answer text from `buffer`, or fail with [`ItineraError::EmptyResponse`].
pub fn recover(buffer: &str) -> Result<Recovered> {
    if buffer.trim().is_empty() {
        return Err(ItineraError::EmptyResponse);
    }

    let rules = RuleChain::recovery();
    for candidate in json_object_spans(buffer) {
        let Ok(value) = serde_json::from_str::<Value>(candidate) else {
            continue;
        };
        if let Some(m) = rules.first_match(&value) {
            info!(rule = m.rule, "recovered text from embedded JSON");
            return Ok(Recovered {
                text: m.text.to_string(),
                strategy: RecoveryStrategy::EmbeddedJson,
            });
        }
    }

    if let Some(text) = anchors::find_answer(buffer) {
        info!("recovered anchored answer from raw buffer");
        return Ok(Recovered {
            text,
            strategy: RecoveryStrategy::AnchoredText,
        });
    }

    debug!(len = buffer.len(), "using raw buffer verbatim");
    Ok(Recovered {
        text: buffer.to_string(),
        strategy: RecoveryStrategy::RawBuffer,
    })
}

/// Every balanced `{...}` span in `text`, in order of its opening brace.
///
/// Braces inside JSON string literals are ignored. Nested spans are yielded
/// too, so an inner object can still be tried when its parent is truncated.
fn json_object_spans(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .filter_map(move |(start, _)| balanced_end(text, start).map(|end| &text[start..end]))
}

/// Byte index just past the `}` that closes the `{` at `start`.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer_is_empty_response() {
        assert!(matches!(recover(""), Err(ItineraError::EmptyResponse)));
        assert!(matches!(recover(" \n\t"), Err(ItineraError::EmptyResponse)));
    }

    #[test]
    fn recovers_top_level_content_field() {
        let buffer = r#"event: conversation.message.delta
data: {"type":"answer","content":"残留的回答"}"#;
        let r = recover(buffer).unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::EmbeddedJson);
        assert_eq!(r.text, "残留的回答");
    }

    #[test]
    fn recovers_long_nested_string() {
        let buffer = r#"data: {"id":"abc","payload":{"k":"v","body":"这是一段来自嵌套对象的足够长的回答文本内容，用于测试恢复逻辑"}}"#;
        let r = recover(buffer).unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::EmbeddedJson);
        assert_eq!(r.text, "这是一段来自嵌套对象的足够长的回答文本内容，用于测试恢复逻辑");
    }

    #[test]
    fn truncated_outer_object_still_yields_inner() {
        let buffer = r#"data: {"meta":{"content":"内层内容"},"tail":"unterminated"#;
        let r = recover(buffer).unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::EmbeddedJson);
        assert_eq!(r.text, "内层内容");
    }

    #[test]
    fn falls_back_to_anchored_text() {
        let buffer = "data: {\"type\":\"answer\",\"content\":\"旅行推荐:A\\n行程规划:B\\n旅行红黑榜:C";
        let r = recover(buffer).unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::AnchoredText);
        assert_eq!(r.text, "旅行推荐:A\n行程规划:B\n旅行红黑榜:C");
    }

    #[test]
    fn falls_back_to_raw_buffer() {
        let r = recover("  just some trailing words  ").unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::RawBuffer);
        assert_eq!(r.text, "  just some trailing words  ");
    }

    #[test]
    fn blank_embedded_fields_are_not_recovered() {
        let buffer = r#"data: {"type":"answer","content":"   "}"#;
        let r = recover(buffer).unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::RawBuffer);
        assert_eq!(r.text, buffer);
    }

    #[test]
    fn objects_without_text_are_skipped() {
        let buffer = r#"data: {"id":1} data: {"code":0}"#;
        let r = recover(buffer).unwrap();
        assert_eq!(r.strategy, RecoveryStrategy::RawBuffer);
    }

    #[test]
    fn balanced_end_ignores_braces_in_strings() {
        let text = r#"{"a":"}{","b":{"c":1}} rest"#;
        let end = balanced_end(text, 0).unwrap();
        assert_eq!(&text[..end], r#"{"a":"}{","b":{"c":1}}"#);
    }

    #[test]
    fn spans_include_nested_objects() {
        let spans: Vec<&str> = json_object_spans(r#"{"x":{"y":1}}"#).collect();
        assert_eq!(spans, vec![r#"{"x":{"y":1}}"#, r#"{"y":1}"#]);
    }
}
