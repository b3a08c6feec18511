//! Splitting an answer into its title / plan / highlights sections.
//!
//! The anchored layout (`旅行推荐:` / `行程规划:` / `旅行红黑榜:`) is tried
//! first. Only when none of the anchors is present does the splitter fall back
//! to paragraph, then line, heuristics.

use std::sync::LazyLock;

use regex::Regex;

/// Title used when the answer has no recognizable structure.
pub const PLACEHOLDER_TITLE: &str = "你的旅行计划";

/// Highlights used when the answer has no recognizable structure.
pub const PLACEHOLDER_HIGHLIGHTS: &str = "根据AI生成";

/// The three sections of an answer. Unmatched sections are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    /// "旅行推荐"
    pub title: String,
    /// "行程规划"
    pub plan: String,
    /// "旅行红黑榜"
    pub highlights: String,
}

/// Which tier of the cascade produced the sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitMethod {
    Anchors,
    Paragraphs,
    Lines,
    Whole,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Title,
    Plan,
    Highlights,
}

/// A section header, with any Markdown heading/emphasis markers around it.
static ANCHOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[#*]+[ \t]*)?(旅行推荐|行程规划|旅行红黑榜)\**\s*[:：][ \t]*(?:\*+)?")
        .expect("section anchor regex")
});

/// A blank line (possibly holding whitespace).
static PARAGRAPH_BREAK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n[ \t]*\n").expect("paragraph break regex"));

static MULTI_BLANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("multi blank regex"));

/// Split `text` into sections.
pub fn split_sections(text: &str) -> (Sections, SplitMethod) {
    if let Some(sections) = split_by_anchors(text) {
        return (sections, SplitMethod::Anchors);
    }

    let body = text.trim();

    let paragraphs: Vec<&str> = PARAGRAPH_BREAK_RE
        .split(body)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.len() >= 3 {
        let last = paragraphs.len() - 1;
        return (
            Sections {
                title: clean_section(paragraphs[0]),
                plan: clean_section(&paragraphs[1..last].join("\n\n")),
                highlights: clean_section(paragraphs[last]),
            },
            SplitMethod::Paragraphs,
        );
    }

    let lines: Vec<&str> = body
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.len() >= 2 {
        return (
            Sections {
                title: clean_section(lines[0]),
                plan: clean_section(&lines[1..].join("\n")),
                highlights: String::new(),
            },
            SplitMethod::Lines,
        );
    }

    (
        Sections {
            title: PLACEHOLDER_TITLE.to_string(),
            plan: clean_section(body),
            highlights: PLACEHOLDER_HIGHLIGHTS.to_string(),
        },
        SplitMethod::Whole,
    )
}

/// Each found anchor owns the text up to the next found anchor (or the end).
/// Returns `None` when no anchor occurs at all.
fn split_by_anchors(text: &str) -> Option<Sections> {
    // (anchor, header start, body start); first occurrence of each anchor only.
    let mut found: Vec<(Anchor, usize, usize)> = Vec::with_capacity(3);
    for caps in ANCHOR_RE.captures_iter(text) {
        let anchor = match &caps[1] {
            "旅行推荐" => Anchor::Title,
            "行程规划" => Anchor::Plan,
            _ => Anchor::Highlights,
        };
        if found.iter().any(|(a, _, _)| *a == anchor) {
            continue;
        }
        let whole = caps.get(0)?;
        found.push((anchor, whole.start(), whole.end()));
    }

    if found.is_empty() {
        return None;
    }

    let mut sections = Sections::default();
    for (i, &(anchor, _, body_start)) in found.iter().enumerate() {
        let body_end = found.get(i + 1).map_or(text.len(), |&(_, start, _)| start);
        let body = clean_section(&text[body_start..body_end]);
        match anchor {
            Anchor::Title => sections.title = body,
            Anchor::Plan => sections.plan = body,
            Anchor::Highlights => sections.highlights = body,
        }
    }
    Some(sections)
}

/// Trim, drop trailing whitespace on each line, and collapse blank-line runs.
fn clean_section(raw: &str) -> String {
    let trimmed_lines = raw
        .trim()
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    MULTI_BLANK_RE.replace_all(&trimmed_lines, "\n\n").to_string()
}
