//! Offline itinerary used when the upstream service is unavailable.
//!
//! The mock answer is written in the same anchored layout the upstream uses
//! and then goes through the regular splitter and synthesizer, so its shape
//! matches a real extraction.

use chrono::NaiveDate;

use itinera_shared::{ExtractedItinerary, TravelRequestParams};

use crate::extract_itinerary;
use crate::synthesize::UNKNOWN_DESTINATION;

/// Build a canned itinerary for `params`, dated from `today`.
///
/// The destination is the requested one, or the origin when none was given.
pub fn mock_itinerary(params: &TravelRequestParams, today: NaiveDate) -> ExtractedItinerary {
    let text = mock_answer(params);
    extract_itinerary(params, &text, today)
}

/// The anchored answer text behind [`mock_itinerary`].
pub fn mock_answer(params: &TravelRequestParams) -> String {
    let destination = params
        .explicit_destination()
        .or_else(|| Some(params.location.trim()).filter(|l| !l.is_empty()))
        .unwrap_or(UNKNOWN_DESTINATION);
    let days = params.day_count();
    let theme = params
        .preference
        .as_deref()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or("经典");

    let plan = (1..=days)
        .map(|day| match day {
            1 => format!("第{day}天：抵达{destination}，城市漫步，适应节奏"),
            d if d == days => format!("第{day}天：自由活动，购买特产后返程"),
            _ => format!("第{day}天：{theme}主题深度游，走访{destination}代表性景点"),
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "目的地：{destination}\n\
         旅行推荐：{destination}{days}日{theme}之旅\n\
         行程规划：\n{plan}\n\
         旅行红黑榜：\n\
         推荐：提前预约热门景点，错峰出行\n\
         避坑：远离景区门口的高价餐饮和非正规导游"
    )
}
