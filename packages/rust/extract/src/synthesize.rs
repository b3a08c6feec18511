//! Building an [`ExtractedItinerary`] from split sections and request params.

use std::sync::LazyLock;

use chrono::{Days, NaiveDate};
use regex::Regex;
use tracing::debug;

use itinera_shared::{
    Activity, DailyPlan, ExtractedItinerary, Recommendations, TravelRequestParams,
};

use crate::sections::{PLACEHOLDER_TITLE, Sections};

/// Summaries at or past this many characters are cut and ellipsized.
pub const SUMMARY_LIMIT: usize = 200;

/// Destination used when nothing better can be inferred.
pub const UNKNOWN_DESTINATION: &str = "未知目的地";

/// Characters of the title considered by the title-prefix rule.
const TITLE_PREFIX_CHARS: usize = 10;

static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"目的地\s*[:：]\s*([^\n,，。;；、]+)").expect("destination marker regex")
});

static ADMIN_SUFFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\p{Han}{1,10}?(?:特别行政区|自治区|市|县|省)").expect("admin suffix regex")
});

static PUNCT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\p{P}\p{S}\s]+").expect("punctuation regex"));

/// A destination rule sees the full answer text and the title section.
type DestinationRule = fn(text: &str, title: &str) -> Option<String>;

/// Tried in order; the request's own destination and the unknown placeholder
/// come after all of these.
const DESTINATION_RULES: &[(&str, DestinationRule)] = &[
    ("marker", from_marker),
    ("admin-suffix", from_admin_suffix),
    ("title-prefix", from_title_prefix),
];

/// Assemble the itinerary for `params` from the split `sections` of `text`.
pub fn synthesize(
    params: &TravelRequestParams,
    sections: Sections,
    text: &str,
    today: NaiveDate,
) -> ExtractedItinerary {
    // The placeholder title says nothing about where the trip goes.
    let title = if sections.title == PLACEHOLDER_TITLE {
        ""
    } else {
        sections.title.as_str()
    };
    let destination = infer_destination(text, title, params);
    let days = params.day_count();
    let (start_date, end_date) = trip_dates(today, days);

    ExtractedItinerary {
        summary: summarize(&sections.title, text),
        budget: budget_line(params),
        daily_plans: daily_skeleton(&destination, start_date, days),
        recommendations: recommendations(&destination),
        destination,
        start_date,
        end_date,
        title: sections.title,
        plan: sections.plan,
        highlights: sections.highlights,
    }
}

/// Pick a destination: text rules first, then the request, then a placeholder.
pub fn infer_destination(text: &str, title: &str, params: &TravelRequestParams) -> String {
    for (name, rule) in DESTINATION_RULES {
        if let Some(found) = rule(text, title) {
            debug!(rule = *name, destination = %found, "destination inferred");
            return found;
        }
    }
    params
        .explicit_destination()
        .unwrap_or(UNKNOWN_DESTINATION)
        .to_string()
}

fn from_marker(text: &str, _title: &str) -> Option<String> {
    let caps = MARKER_RE.captures(text)?;
    let value = caps[1].trim_matches(|c: char| c.is_whitespace() || c == '*');
    (!value.is_empty()).then(|| value.to_string())
}

fn from_admin_suffix(_text: &str, title: &str) -> Option<String> {
    ADMIN_SUFFIX_RE.find(title).map(|m| m.as_str().to_string())
}

fn from_title_prefix(_text: &str, title: &str) -> Option<String> {
    let prefix: String = title.trim().chars().take(TITLE_PREFIX_CHARS).collect();
    let stripped = PUNCT_RE.replace_all(&prefix, "");
    (!stripped.is_empty()).then(|| stripped.into_owned())
}

/// The title section, or the whole text when the title is blank, cut at
/// [`SUMMARY_LIMIT`] characters.
pub fn summarize(title: &str, text: &str) -> String {
    let source = if title.trim().is_empty() {
        text.trim()
    } else {
        title.trim()
    };
    if source.chars().count() >= SUMMARY_LIMIT {
        let head: String = source.chars().take(SUMMARY_LIMIT).collect();
        format!("{head}...")
    } else {
        source.to_string()
    }
}

/// Human-readable budget line.
pub fn budget_line(params: &TravelRequestParams) -> String {
    match params.numeric_budget() {
        Some(yuan) => format!("预算约{yuan}元人民币"),
        None => "预算不限".to_string(),
    }
}

/// Start today, end `days` days later.
pub fn trip_dates(today: NaiveDate, days: u32) -> (NaiveDate, NaiveDate) {
    let end = today
        .checked_add_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MAX);
    (today, end)
}

/// One placeholder day per trip day, dated consecutively from `start`.
pub fn daily_skeleton(destination: &str, start: NaiveDate, days: u32) -> Vec<DailyPlan> {
    (1..=days)
        .map_while(|day| {
            let date = start.checked_add_days(Days::new(u64::from(day - 1)))?;
            Some(DailyPlan {
                day,
                date,
                title: day_title(destination, day, days),
                activities: day_activities(destination, day, days),
            })
        })
        .collect()
}

fn day_title(destination: &str, day: u32, days: u32) -> String {
    if day == 1 {
        format!("第{day}天：抵达{destination}")
    } else if day == days {
        format!("第{day}天：告别{destination}")
    } else {
        format!("第{day}天：探索{destination}")
    }
}

fn day_activities(destination: &str, day: u32, days: u32) -> Vec<Activity> {
    let activity = |time: &str, description: String| Activity {
        time: time.to_string(),
        description,
        location: destination.to_string(),
    };

    let morning = if day == 1 {
        format!("抵达{destination}，办理入住")
    } else {
        format!("游览{destination}标志性景点")
    };
    let evening = if day == days {
        "整理行李，准备返程".to_string()
    } else {
        format!("品尝{destination}当地美食")
    };

    vec![
        activity("09:00", morning),
        activity("12:00", "午餐".to_string()),
        activity("14:00", format!("深度体验{destination}人文风情")),
        activity("18:00", evening),
    ]
}

/// Fixed recommendation lists for `destination`.
pub fn recommendations(destination: &str) -> Recommendations {
    Recommendations {
        accommodation: vec![
            format!("{destination}市中心酒店"),
            format!("{destination}特色民宿"),
        ],
        transportation: vec!["公共交通（地铁/公交）".to_string(), "出租车或网约车".to_string()],
        must_visit: vec![
            format!("{destination}标志性景点"),
            format!("{destination}历史文化街区"),
        ],
    }
}
