//! Turning final answer text into an [`ExtractedItinerary`].
//!
//! - [`sections`] splits the answer into title / plan / highlights
//! - [`synthesize`] infers the destination and builds dates, budget,
//!   the day-by-day skeleton and recommendations
//! - [`mock`] produces an offline itinerary in the same shape

pub mod mock;
pub mod sections;
pub mod synthesize;

use chrono::NaiveDate;
use tracing::debug;

use itinera_shared::{ExtractedItinerary, TravelRequestParams};

pub use mock::{mock_answer, mock_itinerary};
pub use sections::{PLACEHOLDER_HIGHLIGHTS, PLACEHOLDER_TITLE, Sections, SplitMethod, split_sections};
pub use synthesize::{SUMMARY_LIMIT, UNKNOWN_DESTINATION, infer_destination, synthesize};

/// Split `text` and synthesize the itinerary for `params`, dated from `today`.
pub fn extract_itinerary(
    params: &TravelRequestParams,
    text: &str,
    today: NaiveDate,
) -> ExtractedItinerary {
    let (sections, method) = split_sections(text);
    debug!(
        ?method,
        title_len = sections.title.len(),
        plan_len = sections.plan.len(),
        highlights_len = sections.highlights.len(),
        "answer split into sections"
    );
    synthesize(params, sections, text, today)
}
