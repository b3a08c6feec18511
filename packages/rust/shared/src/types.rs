//! Core domain types: trip requests and extracted itineraries.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ItineraError, Result};

/// Day count used when the request's day field cannot be parsed.
pub const DEFAULT_DAY_COUNT: u32 = 3;

/// Longest trip that can be planned, in days.
pub const MAX_DAY_COUNT: u32 = 365;

// ---------------------------------------------------------------------------
// RequestId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper identifying one upstream conversation (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Generate a new time-sortable request identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CountExpr
// ---------------------------------------------------------------------------

/// A count given either as a single integer (`"5"`) or an inclusive range (`"5-7"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountExpr {
    Exact(u32),
    Range(u32, u32),
}

impl CountExpr {
    /// Parse `"N"` or `"N-M"`. Returns `None` if either number is not an integer.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        match raw.split_once('-') {
            Some((lo, hi)) => {
                let lo = lo.trim().parse().ok()?;
                let hi = hi.trim().parse().ok()?;
                Some(Self::Range(lo, hi))
            }
            None => raw.parse().ok().map(Self::Exact),
        }
    }

    /// The value used for planning: `N`, or the larger bound of a range.
    pub fn upper(&self) -> u32 {
        match *self {
            Self::Exact(n) => n,
            Self::Range(lo, hi) => lo.max(hi),
        }
    }
}

// ---------------------------------------------------------------------------
// TravelRequestParams
// ---------------------------------------------------------------------------

/// Trip parameters supplied by the caller. Read-only to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TravelRequestParams {
    /// Origin location (required).
    pub location: String,
    /// Desired destination, if the traveler already has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Day count: `"N"` or `"N-M"`.
    pub days: String,
    /// Traveler count: `"N"` or `"N-M"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travelers: Option<String>,
    /// Free-text preference ("food", "museums", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preference: Option<String>,
    /// Budget in yuan, as entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<String>,
}

impl TravelRequestParams {
    /// Reject requests that cannot be planned at all.
    pub fn validate(&self) -> Result<()> {
        if self.location.trim().is_empty() {
            return Err(ItineraError::validation("origin location is required"));
        }
        if let Some(days) = CountExpr::parse(&self.days).map(|c| c.upper()) {
            if days > MAX_DAY_COUNT {
                return Err(ItineraError::validation(format!(
                    "trip of {days} days exceeds the {MAX_DAY_COUNT}-day limit"
                )));
            }
        }
        Ok(())
    }

    /// Number of days to plan for, falling back to [`DEFAULT_DAY_COUNT`] and
    /// capped at [`MAX_DAY_COUNT`].
    pub fn day_count(&self) -> u32 {
        CountExpr::parse(&self.days)
            .map(|c| c.upper().min(MAX_DAY_COUNT))
            .unwrap_or(DEFAULT_DAY_COUNT)
    }

    /// The budget as a whole number of yuan, if one was supplied and is numeric.
    pub fn numeric_budget(&self) -> Option<u64> {
        self.budget.as_deref()?.trim().parse().ok()
    }

    /// Non-blank destination, if any.
    pub fn explicit_destination(&self) -> Option<&str> {
        self.destination
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
    }
}

// ---------------------------------------------------------------------------
// ExtractedItinerary
// ---------------------------------------------------------------------------

/// One scheduled activity within a day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Local time, `HH:MM`.
    pub time: String,
    pub description: String,
    pub location: String,
}

/// Placeholder schedule for a single day of the trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPlan {
    /// 1-based day index.
    pub day: u32,
    pub date: NaiveDate,
    pub title: String,
    pub activities: Vec<Activity>,
}

/// Fixed recommendation lists attached to every itinerary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    pub accommodation: Vec<String>,
    pub transportation: Vec<String>,
    pub must_visit: Vec<String>,
}

/// The structured result of one ingestion call. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedItinerary {
    pub destination: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Title section, or the head of the answer, ellipsized past the limit.
    pub summary: String,
    /// Human-readable budget line.
    pub budget: String,
    /// "旅行推荐" section.
    pub title: String,
    /// "行程规划" section.
    pub plan: String,
    /// "旅行红黑榜" section.
    pub highlights: String,
    pub daily_plans: Vec<DailyPlan>,
    pub recommendations: Recommendations,
}

impl ExtractedItinerary {
    /// Number of calendar days between start and end.
    pub fn duration_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days()
    }
}
