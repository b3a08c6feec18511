//! Prioritized text-extraction rules over loosely-structured JSON payloads.
//!
//! The upstream service puts answer text in different places depending on the
//! payload shape. Each place is a [`FieldRule`]; a [`RuleChain`] tries its
//! rules in priority order and returns the first hit. Structured path lookups
//! come first, and a depth-first search is always the last resort.

use serde_json::Value;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One way of locating a text fragment inside a payload.
pub trait FieldRule: Send + Sync {
    /// Return the text this rule finds, if any.
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str>;

    /// Human-readable rule name for tracing.
    fn name(&self) -> &str;
}

/// A successful rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuleMatch<'a> {
    pub rule: &'a str,
    pub text: &'a str,
}

// ---------------------------------------------------------------------------
// Built-in rules
// ---------------------------------------------------------------------------

/// Non-empty string at a fixed object path, e.g. `message.content`.
pub struct PathRule {
    name: &'static str,
    path: &'static [&'static str],
    allow_blank: bool,
}

impl PathRule {
    /// Accepts whitespace-only strings; fragments like `"\n"` are real text.
    pub const fn new(name: &'static str, path: &'static [&'static str]) -> Self {
        Self {
            name,
            path,
            allow_blank: true,
        }
    }

    /// Rejects whitespace-only strings. For rules whose hit is taken as a
    /// whole answer.
    pub const fn non_blank(name: &'static str, path: &'static [&'static str]) -> Self {
        Self {
            name,
            path,
            allow_blank: false,
        }
    }
}

impl FieldRule for PathRule {
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        let mut current = payload;
        for key in self.path {
            current = current.get(key)?;
        }
        current
            .as_str()
            .filter(|s| !s.is_empty() && (self.allow_blank || !s.trim().is_empty()))
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Depth-first search for the first non-empty string under one of `keys`.
///
/// At every object the listed keys are checked before descending, so a
/// matching field name wins over nesting order.
pub struct NamedFieldSearch {
    keys: &'static [&'static str],
}

impl NamedFieldSearch {
    pub const fn new(keys: &'static [&'static str]) -> Self {
        Self { keys }
    }

    fn search<'a>(&self, value: &'a Value) -> Option<&'a str> {
        match value {
            Value::Object(map) => {
                let direct = self.keys.iter().find_map(|key| {
                    map.get(*key)
                        .and_then(Value::as_str)
                        .filter(|s| !s.is_empty())
                });
                direct.or_else(|| map.values().find_map(|child| self.search(child)))
            }
            Value::Array(items) => items.iter().find_map(|item| self.search(item)),
            _ => None,
        }
    }
}

impl FieldRule for NamedFieldSearch {
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        self.search(payload)
    }

    fn name(&self) -> &str {
        "recursive-named-field"
    }
}

/// Depth-first search of nested objects for the first string whose trimmed
/// length exceeds `min_chars` characters. Short strings are usually ids or keys.
pub struct LongStringSearch {
    min_chars: usize,
}

impl LongStringSearch {
    pub const fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }

    fn is_long(&self, s: &str) -> bool {
        s.trim().chars().count() > self.min_chars
    }

    fn search<'a>(&self, value: &'a Value) -> Option<&'a str> {
        match value {
            Value::String(s) if self.is_long(s) => Some(s.as_str()),
            Value::Object(map) => map.values().find_map(|child| self.search(child)),
            Value::Array(items) => items.iter().find_map(|item| self.search(item)),
            _ => None,
        }
    }
}

impl FieldRule for LongStringSearch {
    fn extract<'a>(&self, payload: &'a Value) -> Option<&'a str> {
        // Top-level strings are covered by the named rules; only look deeper.
        match payload {
            Value::Object(map) => map
                .values()
                .filter(|v| v.is_object() || v.is_array())
                .find_map(|child| self.search(child)),
            Value::Array(items) => items.iter().find_map(|item| self.search(item)),
            _ => None,
        }
    }

    fn name(&self) -> &str {
        "nested-long-string"
    }
}

// ---------------------------------------------------------------------------
// Chain
// ---------------------------------------------------------------------------

/// Rules in priority order; the first one that finds text wins.
pub struct RuleChain {
    rules: Vec<Box<dyn FieldRule>>,
}

impl RuleChain {
    pub fn new(rules: Vec<Box<dyn FieldRule>>) -> Self {
        Self { rules }
    }

    /// Where answer fragments live in `message` / `answer` payloads.
    pub fn answer_fragments() -> Self {
        Self::new(vec![
            Box::new(PathRule::new("message.content", &["message", "content"])),
            Box::new(PathRule::new("object.value", &["object", "value"])),
            Box::new(PathRule::new("delta.content", &["delta", "content"])),
            Box::new(PathRule::new("content", &["content"])),
            Box::new(PathRule::new("answer", &["answer"])),
            Box::new(PathRule::new("text", &["text"])),
            Box::new(NamedFieldSearch::new(&[
                "content", "text", "value", "answer", "message",
            ])),
        ])
    }

    /// Structured fallbacks for the complete-answer delta.
    pub fn complete_answer() -> Self {
        Self::new(vec![
            Box::new(PathRule::non_blank("object.value", &["object", "value"])),
            Box::new(PathRule::non_blank("message.content", &["message", "content"])),
        ])
    }

    /// What raw recovery accepts from an object found in leftover bytes.
    pub fn recovery() -> Self {
        Self::new(vec![
            Box::new(PathRule::non_blank("content", &["content"])),
            Box::new(PathRule::non_blank("text", &["text"])),
            Box::new(PathRule::non_blank("answer", &["answer"])),
            Box::new(PathRule::non_blank("value", &["value"])),
            Box::new(PathRule::non_blank("message", &["message"])),
            Box::new(LongStringSearch::new(20)),
        ])
    }

    /// Evaluate the rules in order.
    pub fn first_match<'a>(&'a self, payload: &'a Value) -> Option<RuleMatch<'a>> {
        self.rules.iter().find_map(|rule| {
            rule.extract(payload).map(|text| RuleMatch {
                rule: rule.name(),
                text,
            })
        })
    }
}
